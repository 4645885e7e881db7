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

pub(crate) const OBFUSCATED_ACTION_REFERENCE: FindingKind =
    FindingKind::new("obfuscated_action_reference", Severity::Medium);

/// Whether a `uses:` path contains components that obscure what it
/// actually refers to: `.`, `..`, or empty components.
fn is_obfuscated(path: &str) -> bool {
    path.trim_end_matches('/')
        .split('/')
        .any(|component| matches!(component, "" | "." | ".."))
}

pub(crate) struct Obfuscation;

audit_meta!(
    Obfuscation,
    "obfuscation",
    "obfuscated usage of GitHub Actions features",
    [OBFUSCATED_ACTION_REFERENCE]
);

impl Obfuscation {
    fn check(&self, uses: Option<&Uses>, route: Route, doc: &impl AsDocument) -> Vec<Finding> {
        let path = match uses {
            Some(Uses::Repository(reference)) => reference
                .raw()
                .split_once('@')
                .map_or(reference.raw(), |(path, _)| path),
            Some(Uses::Local(local)) => {
                let path = local.path.trim();
                path.strip_prefix("./").unwrap_or(path)
            }
            _ => return vec![],
        };

        if !is_obfuscated(path) {
            return vec![];
        }

        vec![
            Self::finding(OBFUSCATED_ACTION_REFERENCE)
                .message(format!(
                    "{path} contains redundant path components that obscure what it refers to"
                ))
                .at(route)
                .build(doc),
        ]
    }
}

impl Audit for Obfuscation {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
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
    use super::{Obfuscation, is_obfuscated};
    use crate::audit::test_support::{kinds, run, workflow};

    #[test]
    fn test_is_obfuscated() {
        assert!(is_obfuscated("actions/checkout/./"));
        assert!(is_obfuscated("actions/checkout/../cache"));
        assert!(is_obfuscated("actions//checkout"));
        assert!(is_obfuscated("github/codeql-action/./init"));
        assert!(!is_obfuscated("actions/checkout"));
        assert!(!is_obfuscated("github/codeql-action/init/"));
    }

    #[test]
    fn test_obfuscation() {
        let input = workflow(
            r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout/.@v4
      - uses: actions/checkout@v4
      - uses: ./tools/../evil
      - uses: ./.github/actions/setup
"#,
        );

        let findings = run::<Obfuscation>(&input);
        assert_eq!(
            kinds(&findings),
            ["obfuscated_action_reference", "obfuscated_action_reference"]
        );
        assert_eq!(findings[1].evidence.line, 9);
    }
}
