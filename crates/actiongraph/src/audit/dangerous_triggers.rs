use std::sync::LazyLock;

use actions_models::{Uses, route};
use regex::Regex;

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{
        AsDocument, ReferenceExt as _,
        workflow::{Job, PRIVILEGED_TRIGGERS, Step, Workflow},
    },
    state::AuditState,
};

pub(crate) const DANGEROUS_TRIGGER: FindingKind =
    FindingKind::new("dangerous_trigger", Severity::Medium);
pub(crate) const INSECURE_PULL_REQUEST_TARGET: FindingKind =
    FindingKind::new("insecure_pull_request_target", Severity::Critical);
pub(crate) const ENVIRONMENT_BYPASS_RISK: FindingKind =
    FindingKind::new("environment_bypass_risk", Severity::High);
pub(crate) const ARTIFACT_POISONING_RISK: FindingKind =
    FindingKind::new("artifact_poisoning_risk", Severity::High);

#[allow(clippy::unwrap_used)]
static PR_HEAD_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"head\.(sha|ref)\b|github\.head_ref\b|refs/pull/|workflow_run\.head_(sha|branch)\b",
    )
    .unwrap()
});

#[allow(clippy::unwrap_used)]
static GIT_CHECKOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgit\s+(checkout|fetch|switch|pull)\b").unwrap());

#[allow(clippy::unwrap_used)]
static GH_PR_CHECKOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgh\s+pr\s+checkout\b").unwrap());

#[allow(clippy::unwrap_used)]
static GH_RUN_DOWNLOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgh\s+run\s+download\b").unwrap());

#[allow(clippy::unwrap_used)]
static SECRETS_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bsecrets\s*[.\[]").unwrap());

pub(crate) struct DangerousTriggers;

audit_meta!(
    DangerousTriggers,
    "dangerous-triggers",
    "use of fundamentally insecure workflow trigger",
    [
        DANGEROUS_TRIGGER,
        INSECURE_PULL_REQUEST_TARGET,
        ENVIRONMENT_BYPASS_RISK,
        ARTIFACT_POISONING_RISK
    ]
);

impl DangerousTriggers {
    /// Whether a step checks out the pull request's head, i.e. attacker
    /// controlled code.
    fn checks_out_head(step: &Step<'_>) -> bool {
        match step.uses() {
            Some(Uses::Repository(reference)) if reference.is_action("actions/checkout") => step
                .with()
                .and_then(|with| with.get("ref"))
                .and_then(|value| value.as_str())
                .is_some_and(|value| PR_HEAD_REF.is_match(value)),
            _ => step.run().is_some_and(|run| {
                GH_PR_CHECKOUT.is_match(run)
                    || (GIT_CHECKOUT.is_match(run) && PR_HEAD_REF.is_match(run))
            }),
        }
    }

    /// Whether a step downloads artifacts produced by the triggering run.
    fn downloads_run_artifacts(step: &Step<'_>) -> bool {
        match step.uses() {
            Some(Uses::Repository(reference)) if reference.is_action("actions/download-artifact") => {
                step.with().is_some_and(|with| {
                    with.contains_key("run-id") || with.contains_key("github-token")
                })
            }
            Some(Uses::Repository(reference)) => {
                reference.is_action("dawidd6/action-download-artifact")
            }
            _ => step.run().is_some_and(|run| GH_RUN_DOWNLOAD.is_match(run)),
        }
    }
}

impl Audit for DangerousTriggers {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_workflow(&self, workflow: &Workflow) -> Result<Vec<Finding>, AuditError> {
        let mut findings = vec![];

        for trigger in PRIVILEGED_TRIGGERS {
            if workflow.has_trigger(trigger) {
                findings.push(
                    Self::finding(DANGEROUS_TRIGGER)
                        .message(format!(
                            "{trigger} runs with repository privileges on attacker-influenced events"
                        ))
                        .at(route!["on", *trigger])
                        .within(*trigger)
                        .build(workflow),
                );
            }
        }

        if !workflow.has_privileged_trigger() {
            return Ok(findings);
        }

        let workflow_run = workflow.has_trigger("workflow_run");

        for job in workflow.jobs() {
            let Job::NormalJob(job) = job else {
                continue;
            };

            if job.environment.is_some()
                && let Some(span) = workflow.as_document().locate(&job.route)
                && let Some(source) = workflow.as_document().source().get(span.start..span.end)
                && SECRETS_REFERENCE.is_match(source)
            {
                findings.push(
                    Self::finding(ENVIRONMENT_BYPASS_RISK)
                        .message(format!(
                            "job {} uses secrets behind an environment in a privileged workflow",
                            job.id
                        ))
                        .at(job.route.with_key("environment"))
                        .build(workflow),
                );
            }

            for step in job.steps() {
                if Self::checks_out_head(&step) {
                    findings.push(
                        Self::finding(INSECURE_PULL_REQUEST_TARGET)
                            .message(format!(
                                "{} checks out untrusted pull request code in a privileged context",
                                step.display_name()
                            ))
                            .at(step.route.clone())
                            .build(&step),
                    );
                }

                if workflow_run && Self::downloads_run_artifacts(&step) {
                    findings.push(
                        Self::finding(ARTIFACT_POISONING_RISK)
                            .message(format!(
                                "{} downloads artifacts from the triggering workflow run",
                                step.display_name()
                            ))
                            .at(step.route.clone())
                            .build(&step),
                    );
                }
            }
        }

        Ok(findings)
    }
}
