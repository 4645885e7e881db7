use std::collections::HashSet;

use actions_models::{Uses, document::Route};

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{
        AsDocument, StepCommon,
        action::CompositeStep,
        workflow::{ReusableWorkflowCallJob, Step},
    },
    state::AuditState,
};

pub(crate) const UNTRUSTED_ACTION_UNPINNED: FindingKind =
    FindingKind::new("untrusted_action_unpinned", Severity::High);

/// Owners whose actions are trusted without hash pinning.
const TRUSTED_OWNERS: &[&str] = &[
    "actions",
    "aws-actions",
    "azure",
    "dependabot",
    "docker",
    "github",
    "google-github-actions",
    "hashicorp",
    "microsoft",
];

pub(crate) struct UntrustedActions {
    trusted: HashSet<String>,
}

audit_meta!(
    UntrustedActions,
    "untrusted-actions",
    "third-party action not pinned to a commit",
    [UNTRUSTED_ACTION_UNPINNED]
);

impl UntrustedActions {
    fn check(&self, uses: Option<&Uses>, route: Route, doc: &impl AsDocument) -> Vec<Finding> {
        let Some(Uses::Repository(reference)) = uses else {
            return vec![];
        };

        if reference.is_hash_pinned() || self.trusted.contains(reference.owner()) {
            return vec![];
        }

        vec![
            Self::finding(UNTRUSTED_ACTION_UNPINNED)
                .message(format!(
                    "{} is maintained by {}, a third party, and isn't pinned to a commit",
                    reference.raw(),
                    reference.owner()
                ))
                .at(route)
                .build(doc),
        ]
    }
}

impl Audit for UntrustedActions {
    fn new(state: &AuditState) -> Result<Self, AuditLoadError> {
        let trusted = TRUSTED_OWNERS
            .iter()
            .map(|owner| owner.to_string())
            .chain(state.config.trusted_owners.iter().cloned())
            .collect();

        Ok(Self { trusted })
    }

    fn audit_step(&self, step: &Step<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check(step.uses(), step.route.with_key("uses"), step))
    }

    fn audit_reusable_job(
        &self,
        job: &ReusableWorkflowCallJob<'_>,
    ) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check(job.uses(), job.route.with_key("uses"), job))
    }

    fn audit_composite_step(&self, step: &CompositeStep<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check(step.uses(), step.step().route.with_key("uses"), step))
    }
}
