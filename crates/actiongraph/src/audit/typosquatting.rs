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

pub(crate) const TYPOSQUATTING_ACTION: FindingKind =
    FindingKind::new("typosquatting_action", Severity::Critical);

/// Widely used actions, as `owner/repo`.
const KNOWN_ACTIONS: &[&str] = &[
    "actions/cache",
    "actions/checkout",
    "actions/configure-pages",
    "actions/create-release",
    "actions/deploy-pages",
    "actions/download-artifact",
    "actions/github-script",
    "actions/labeler",
    "actions/setup-dotnet",
    "actions/setup-go",
    "actions/setup-java",
    "actions/setup-node",
    "actions/setup-python",
    "actions/stale",
    "actions/upload-artifact",
    "actions/upload-pages-artifact",
    "aws-actions/configure-aws-credentials",
    "azure/login",
    "codecov/codecov-action",
    "docker/build-push-action",
    "docker/login-action",
    "docker/metadata-action",
    "docker/setup-buildx-action",
    "docker/setup-qemu-action",
    "github/codeql-action",
    "google-github-actions/auth",
    "hashicorp/setup-terraform",
    "peter-evans/create-pull-request",
    "pypa/gh-action-pypi-publish",
    "softprops/action-gh-release",
];

pub(crate) struct Typosquatting {
    known: Vec<String>,
}

audit_meta!(
    Typosquatting,
    "typosquatting",
    "action name one edit away from a well-known action",
    [TYPOSQUATTING_ACTION]
);

impl Typosquatting {
    /// The known action `slug` imitates, if any.
    fn imitated(&self, slug: &str) -> Option<&str> {
        if self.known.iter().any(|known| known == slug) {
            return None;
        }

        self.known
            .iter()
            .find(|known| strsim::levenshtein(known, slug) == 1)
            .map(String::as_str)
    }

    fn check(&self, uses: Option<&Uses>, route: Route, doc: &impl AsDocument) -> Vec<Finding> {
        let Some(Uses::Repository(reference)) = uses else {
            return vec![];
        };

        let slug = reference.slug();
        let Some(imitated) = self.imitated(&slug) else {
            return vec![];
        };

        vec![
            Self::finding(TYPOSQUATTING_ACTION)
                .message(format!(
                    "{slug} is one character away from {imitated}; it may be a typosquat"
                ))
                .at(route)
                .build(doc),
        ]
    }
}

impl Audit for Typosquatting {
    fn new(state: &AuditState) -> Result<Self, AuditLoadError> {
        let known = KNOWN_ACTIONS
            .iter()
            .map(|action| action.to_string())
            .chain(state.config.known_actions.iter().cloned())
            .collect();

        Ok(Self { known })
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

#[cfg(test)]
mod tests {
    use super::Typosquatting;
    use crate::audit::{
        Audit as _,
        test_support::{kinds, run, workflow},
    };
    use crate::state::AuditState;

    #[test]
    fn test_imitated() {
        let audit = Typosquatting::new(&AuditState::default()).unwrap();
        assert_eq!(audit.imitated("actions/chekout"), Some("actions/checkout"));
        assert_eq!(audit.imitated("actlons/checkout"), Some("actions/checkout"));
        assert_eq!(audit.imitated("actions/checkout"), None);
        assert_eq!(audit.imitated("actions/setup-rust"), None);
    }

    #[test]
    fn test_typosquatting() {
        let input = workflow(
            r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/chekout@v4
      - uses: actions/checkout@v4
      - uses: Docker/login-actions@v3
"#,
        );

        let findings = run::<Typosquatting>(&input);
        assert_eq!(
            kinds(&findings),
            ["typosquatting_action", "typosquatting_action"]
        );
        assert_eq!(findings[0].evidence.line, 7);
    }
}
