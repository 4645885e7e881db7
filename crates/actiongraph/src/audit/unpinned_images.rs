use actions_models::{
    Uses,
    action::{DockerImage, Runs},
    common::is_expression,
    document::Route,
    route,
    uses::DockerUses,
};

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{AsDocument, StepCommon, action::Action, workflow::NormalJob},
    state::AuditState,
};

pub(crate) const UNPINNABLE_DOCKER_IMAGE: FindingKind =
    FindingKind::new("unpinnable_docker_image", Severity::High);
pub(crate) const UNPINNED_CONTAINER_IMAGE: FindingKind =
    FindingKind::new("unpinned_container_image", Severity::Medium);

pub(crate) struct UnpinnedImages;

audit_meta!(
    UnpinnedImages,
    "unpinned-images",
    "unpinned image references",
    [UNPINNABLE_DOCKER_IMAGE, UNPINNED_CONTAINER_IMAGE]
);

impl UnpinnedImages {
    fn step_image(&self, step: &impl StepCommon) -> Option<Finding> {
        let Some(Uses::Docker(image)) = step.step().uses() else {
            return None;
        };

        (!image.is_digest_pinned()).then(|| {
            Self::finding(UNPINNED_CONTAINER_IMAGE)
                .message(format!("docker://{} is not pinned by digest", image.raw()))
                .at(step.step().route.with_key("uses"))
                .build(step)
        })
    }

    fn container_image(&self, image: &str, route: Route, doc: &impl AsDocument) -> Option<Finding> {
        // Images computed at runtime can't be judged statically.
        if image.contains("${{") || is_expression(image) {
            return None;
        }

        let pinned = DockerUses::parse(image).is_ok_and(|image| image.is_digest_pinned());
        (!pinned).then(|| {
            Self::finding(UNPINNED_CONTAINER_IMAGE)
                .message(format!("container image {image} is not pinned by digest"))
                .at(route)
                .within(image)
                .build(doc)
        })
    }
}

impl Audit for UnpinnedImages {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_normal_job(&self, job: &NormalJob<'_>) -> Result<Vec<Finding>, AuditError> {
        let mut findings = vec![];

        for container in job.containers() {
            if let Some(image) = &container.image {
                findings.extend(self.container_image(image, container.route.clone(), job));
            }
        }

        for step in job.steps() {
            findings.extend(self.step_image(&step));
        }

        Ok(findings)
    }

    fn audit_action(&self, action: &Action) -> Result<Vec<Finding>, AuditError> {
        let mut findings = vec![];

        if let Runs::Docker {
            image: DockerImage::Registry(image),
            ..
        } = &action.runs
            && !image.is_digest_pinned()
        {
            findings.push(
                Self::finding(UNPINNABLE_DOCKER_IMAGE)
                    .message(format!(
                        "action image docker://{} is not pinned by digest; callers can't pin it",
                        image.raw()
                    ))
                    .at(route!["runs", "image"])
                    .build(action),
            );
        }

        for step in action.composite_steps() {
            findings.extend(self.step_image(&step));
        }

        Ok(findings)
    }
}
