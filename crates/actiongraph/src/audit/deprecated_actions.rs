use actions_models::{ActionReference, Uses, action::Runs, document::Route, route};

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{
        AsDocument, ReferenceExt as _, StepCommon,
        action::{Action, CompositeStep},
        workflow::Step,
    },
    state::AuditState,
};

pub(crate) const DEPRECATED_ACTION: FindingKind =
    FindingKind::new("deprecated_action", Severity::Low);
pub(crate) const DEPRECATED_NODE_RUNTIME: FindingKind =
    FindingKind::new("deprecated_node_runtime", Severity::Medium);

/// Node runtimes GitHub no longer runs actions on.
const DEPRECATED_RUNTIMES: &[&str] = &["node10", "node12", "node16"];

struct Deprecation {
    /// `owner/repo`, or `owner/*` for every action by an owner.
    pattern: &'static str,
    /// Only majors up to this one are deprecated; `None` for all.
    through_major: Option<u64>,
    replacement: &'static str,
}

const DEPRECATIONS: &[Deprecation] = &[
    Deprecation {
        pattern: "actions/create-release",
        through_major: None,
        replacement: "softprops/action-gh-release or `gh release create`",
    },
    Deprecation {
        pattern: "actions/upload-release-asset",
        through_major: None,
        replacement: "softprops/action-gh-release or `gh release upload`",
    },
    Deprecation {
        pattern: "actions/setup-ruby",
        through_major: None,
        replacement: "ruby/setup-ruby",
    },
    Deprecation {
        pattern: "actions/setup-elixir",
        through_major: None,
        replacement: "erlef/setup-beam",
    },
    Deprecation {
        pattern: "actions/setup-haskell",
        through_major: None,
        replacement: "haskell-actions/setup",
    },
    Deprecation {
        pattern: "actions-rs/*",
        through_major: None,
        replacement: "dtolnay/rust-toolchain or plain cargo commands",
    },
    Deprecation {
        pattern: "actions/upload-artifact",
        through_major: Some(3),
        replacement: "actions/upload-artifact@v4",
    },
    Deprecation {
        pattern: "actions/download-artifact",
        through_major: Some(3),
        replacement: "actions/download-artifact@v4",
    },
    Deprecation {
        pattern: "actions/cache",
        through_major: Some(2),
        replacement: "actions/cache@v4",
    },
];

impl Deprecation {
    fn applies_to(&self, reference: &ActionReference) -> bool {
        let matches = match self.pattern.strip_suffix("/*") {
            Some(owner) => reference.owner() == owner,
            None => reference.is_action(self.pattern),
        };

        matches
            && self.through_major.is_none_or(|through| {
                reference
                    .major_version()
                    .is_some_and(|major| major <= through)
            })
    }
}

pub(crate) struct DeprecatedActions;

audit_meta!(
    DeprecatedActions,
    "deprecated-actions",
    "deprecated action or runtime",
    [DEPRECATED_ACTION, DEPRECATED_NODE_RUNTIME]
);

impl DeprecatedActions {
    fn check(&self, uses: Option<&Uses>, route: Route, doc: &impl AsDocument) -> Vec<Finding> {
        let Some(Uses::Repository(reference)) = uses else {
            return vec![];
        };

        DEPRECATIONS
            .iter()
            .find(|deprecation| deprecation.applies_to(reference))
            .map(|deprecation| {
                Self::finding(DEPRECATED_ACTION)
                    .message(format!(
                        "{} is deprecated; use {} instead",
                        reference.raw(),
                        deprecation.replacement
                    ))
                    .at(route)
                    .build(doc)
            })
            .into_iter()
            .collect()
    }
}

impl Audit for DeprecatedActions {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_step(&self, step: &Step<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check(step.uses(), step.route.with_key("uses"), step))
    }

    fn audit_composite_step(&self, step: &CompositeStep<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check(step.uses(), step.step().route.with_key("uses"), step))
    }

    fn audit_action(&self, action: &Action) -> Result<Vec<Finding>, AuditError> {
        let mut findings = vec![];

        if let Runs::JavaScript { using, .. } = &action.runs
            && DEPRECATED_RUNTIMES.contains(&using.trim())
        {
            findings.push(
                Self::finding(DEPRECATED_NODE_RUNTIME)
                    .message(format!("{using} is no longer supported by GitHub-hosted runners"))
                    .at(route!["runs", "using"])
                    .build(action),
            );
        }

        for step in action.composite_steps() {
            findings.extend(self.audit_composite_step(&step)?);
        }

        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::DeprecatedActions;
    use crate::audit::test_support::{action, kinds, run, workflow};
    use crate::finding::Severity;

    #[test]
    fn test_deprecated_actions() {
        let input = workflow(
            r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/upload-artifact@v3
      - uses: actions/upload-artifact@v4
      - uses: actions-rs/toolchain@v1
      - uses: actions/cache@v2.1.0
      - uses: actions/cache@v3
      - uses: actions/create-release@v1
"#,
        );

        let findings = run::<DeprecatedActions>(&input);
        assert_eq!(
            findings.iter().map(|f| f.evidence.line).collect::<Vec<_>>(),
            [7, 9, 10, 12]
        );
        assert!(findings.iter().all(|f| f.severity == Severity::Low));
    }

    #[test]
    fn test_node_runtime() {
        let input = action(
            r#"
name: old
runs:
  using: node16
  main: index.js
"#,
        );
        assert_eq!(
            kinds(&run::<DeprecatedActions>(&input)),
            ["deprecated_node_runtime"]
        );

        let input = action(
            r#"
name: current
runs:
  using: node20
  main: index.js
"#,
        );
        assert!(run::<DeprecatedActions>(&input).is_empty());
    }
}
