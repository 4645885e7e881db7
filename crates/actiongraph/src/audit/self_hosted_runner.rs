//! Audits workflows for usage of self-hosted runners, which are frequently
//! unsafe to use in public repositories due to the risk of persistence.
//!
//! Repository visibility can't be known statically, so every repository
//! is treated as public.

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::workflow::{NormalJob, Workflow},
    state::AuditState,
};

pub(crate) const SELF_HOSTED_RUNNER: FindingKind =
    FindingKind::new("self_hosted_runner", Severity::Low);
pub(crate) const PR_EXPOSURE: FindingKind =
    FindingKind::new("self_hosted_runner_pr_exposure", Severity::Critical);
pub(crate) const ISSUE_EXPOSURE: FindingKind =
    FindingKind::new("self_hosted_runner_issue_exposure", Severity::High);

const PR_TRIGGERS: &[&str] = &["pull_request", "pull_request_target"];
const ISSUE_TRIGGERS: &[&str] = &["issues", "issue_comment"];

pub(crate) struct SelfHostedRunner;

audit_meta!(
    SelfHostedRunner,
    "self-hosted-runner",
    "runs on a self-hosted runner",
    [SELF_HOSTED_RUNNER, PR_EXPOSURE, ISSUE_EXPOSURE]
);

impl SelfHostedRunner {
    /// The most severe exposure a workflow's triggers give a
    /// self-hosted runner.
    fn exposure(workflow: &Workflow) -> (FindingKind, &'static str) {
        if PR_TRIGGERS.iter().any(|t| workflow.has_trigger(t)) {
            (
                PR_EXPOSURE,
                "self-hosted runner can be reached by pull requests from forks",
            )
        } else if ISSUE_TRIGGERS.iter().any(|t| workflow.has_trigger(t))
            || workflow.on.events().any(|e| e.starts_with("discussion"))
        {
            (
                ISSUE_EXPOSURE,
                "self-hosted runner can be triggered by anyone who opens an issue or discussion",
            )
        } else {
            (
                SELF_HOSTED_RUNNER,
                "self-hosted runners may persist state between jobs",
            )
        }
    }
}

impl Audit for SelfHostedRunner {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_normal_job(&self, job: &NormalJob<'_>) -> Result<Vec<Finding>, AuditError> {
        if !job.runs_on.is_self_hosted() {
            return Ok(vec![]);
        }

        let (kind, message) = Self::exposure(job.parent);
        Ok(vec![
            Self::finding(kind)
                .message(message)
                .at(job.route.with_key("runs-on"))
                .build(job),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::SelfHostedRunner;
    use crate::audit::test_support::{kinds, run, workflow};
    use crate::finding::Severity;

    fn source(trigger: &str, runner: &str) -> String {
        format!(
            r#"
on: {trigger}
jobs:
  build:
    runs-on: {runner}
    steps:
      - run: make
"#
        )
    }

    #[test]
    fn test_exposures() {
        for (trigger, expected) in [
            ("push", "self_hosted_runner"),
            ("[push, pull_request]", "self_hosted_runner_pr_exposure"),
            ("issue_comment", "self_hosted_runner_issue_exposure"),
            ("discussion_comment", "self_hosted_runner_issue_exposure"),
        ] {
            let findings = run::<SelfHostedRunner>(&workflow(&source(trigger, "[self-hosted, linux]")));
            assert_eq!(kinds(&findings), [expected], "{trigger}");
            assert_eq!(findings[0].evidence.line, 5);
        }

        let findings = run::<SelfHostedRunner>(&workflow(&source("pull_request", "self-hosted")));
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_github_hosted() {
        let findings = run::<SelfHostedRunner>(&workflow(&source("pull_request", "ubuntu-latest")));
        assert!(findings.is_empty());
    }
}
