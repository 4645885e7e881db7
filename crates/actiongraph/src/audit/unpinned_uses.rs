use actions_models::{ActionReference, RefKind, Uses, document::Route};

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

pub(crate) const UNPINNED_VERSION: FindingKind =
    FindingKind::new("unpinned_version", Severity::High);
pub(crate) const NO_HASH_PINNING: FindingKind = FindingKind::new("no_hash_pinning", Severity::High);
pub(crate) const SHORT_HASH_PINNING: FindingKind =
    FindingKind::new("short_hash_pinning", Severity::Medium);
pub(crate) const UNPINNABLE_COMPOSITE_SUBACTION: FindingKind =
    FindingKind::new("unpinnable_composite_subaction", Severity::High);

pub(crate) struct UnpinnedUses;

audit_meta!(
    UnpinnedUses,
    "unpinned-uses",
    "unpinned action reference",
    [
        UNPINNED_VERSION,
        NO_HASH_PINNING,
        SHORT_HASH_PINNING,
        UNPINNABLE_COMPOSITE_SUBACTION
    ]
);

impl UnpinnedUses {
    fn pinning_finding(
        &self,
        reference: &ActionReference,
        route: Route,
        doc: &impl AsDocument,
    ) -> Option<Finding> {
        let (kind, message) = match reference.ref_kind() {
            RefKind::FullSha => return None,
            RefKind::Unresolved => (
                NO_HASH_PINNING,
                format!("{} is not pinned to any ref", reference.raw()),
            ),
            RefKind::ShortSha => (
                SHORT_HASH_PINNING,
                format!(
                    "{} is pinned to a short commit hash, which can be ambiguous",
                    reference.raw()
                ),
            ),
            RefKind::Tag | RefKind::Branch => (
                UNPINNED_VERSION,
                format!(
                    "{} is pinned to a mutable {} rather than a commit hash",
                    reference.raw(),
                    reference.ref_kind().as_str()
                ),
            ),
        };

        Some(Self::finding(kind).message(message).at(route).build(doc))
    }

    fn check_uses(&self, uses: Option<&Uses>, route: Route, doc: &impl AsDocument) -> Vec<Finding> {
        match uses {
            Some(Uses::Repository(reference)) => self
                .pinning_finding(reference, route, doc)
                .into_iter()
                .collect(),
            _ => vec![],
        }
    }
}

impl Audit for UnpinnedUses {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_step(&self, step: &Step<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check_uses(step.uses(), step.route.with_key("uses"), step))
    }

    fn audit_reusable_job(
        &self,
        job: &ReusableWorkflowCallJob<'_>,
    ) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check_uses(job.uses(), job.route.with_key("uses"), job))
    }

    fn audit_composite_step(&self, step: &CompositeStep<'_>) -> Result<Vec<Finding>, AuditError> {
        let route = step.step().route.with_key("uses");
        let mut findings = self.check_uses(step.uses(), route.clone(), step);

        // Composite actions can't be pinned by their callers, so anything
        // short of a full SHA is also unpinnable from the outside.
        if let Some(Uses::Repository(reference)) = step.uses()
            && !reference.is_hash_pinned()
        {
            findings.push(
                Self::finding(UNPINNABLE_COMPOSITE_SUBACTION)
                    .message(format!(
                        "composite action uses {} without a full commit hash; callers can't pin it",
                        reference.raw()
                    ))
                    .at(route)
                    .build(step),
            );
        }

        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::UnpinnedUses;
    use crate::audit::test_support::{action, kinds, run, workflow};
    use crate::finding::Severity;

    #[test]
    fn test_workflow_pinning() {
        let input = workflow(
            r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: actions/setup-node
      - uses: actions/cache@abc1234
      - uses: actions/upload-artifact@0123456789abcdef0123456789abcdef01234567
      - uses: ./local/action
      - uses: docker://alpine:3.19
  call:
    uses: org/shared/.github/workflows/ci.yml@main
"#,
        );

        let findings = run::<UnpinnedUses>(&input);
        assert_eq!(
            kinds(&findings),
            [
                "unpinned_version",
                "no_hash_pinning",
                "short_hash_pinning",
                "unpinned_version"
            ]
        );
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].evidence.line, 7);
        assert_eq!(findings[0].evidence.path, ".github/workflows/test.yml");
        assert_eq!(findings[2].severity, Severity::Medium);
    }

    #[test]
    fn test_composite_subactions() {
        let input = action(
            r#"
name: composite
runs:
  using: composite
  steps:
    - uses: actions/checkout@v4
    - uses: actions/cache@0123456789abcdef0123456789abcdef01234567
"#,
        );

        let findings = run::<UnpinnedUses>(&input);
        assert_eq!(
            kinds(&findings),
            ["unpinned_version", "unpinnable_composite_subaction"]
        );
    }

    #[test]
    fn test_trailing_comment() {
        let input = workflow(
            r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4 # actiongraph: ignore[unpinned-uses]
"#,
        );

        // Comments in the analyzed YAML never suppress findings.
        let findings = run::<UnpinnedUses>(&input);
        assert_eq!(kinds(&findings), ["unpinned_version"]);
        assert_eq!(
            findings[0].evidence.snippet,
            "- uses: actions/checkout@v4 # actiongraph: ignore[unpinned-uses]"
        );
    }
}
