use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{ReferenceExt as _, repository_reference, workflow::Step},
    state::AuditState,
};

pub(crate) const UNSAFE_CHECKOUT: FindingKind = FindingKind::new("unsafe_checkout", Severity::High);

pub(crate) struct UnsafeCheckout;

audit_meta!(
    UnsafeCheckout,
    "unsafe-checkout",
    "credential persistence through checkout in a writable job",
    [UNSAFE_CHECKOUT]
);

impl Audit for UnsafeCheckout {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_step(&self, step: &Step<'_>) -> Result<Vec<Finding>, AuditError> {
        let Some(reference) = repository_reference(step.uses()) else {
            return Ok(vec![]);
        };
        if !reference.is_action("actions/checkout") {
            return Ok(vec![]);
        }

        // An expression might be false at runtime; only flag the cases
        // where credentials definitely persist.
        let persists = step
            .with()
            .and_then(|with| with.get("persist-credentials"))
            .is_none_or(|value| value.is_truthy());

        let permissions = step.job.effective_permissions();
        if !persists || !(permissions.is_default() || permissions.grants_write()) {
            return Ok(vec![]);
        }

        Ok(vec![
            Self::finding(UNSAFE_CHECKOUT)
                .message(format!(
                    "{} persists a token with write access in .git/config; set persist-credentials: false",
                    reference.raw()
                ))
                .at(step.route.with_key("uses"))
                .build(step),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::UnsafeCheckout;
    use crate::audit::test_support::{kinds, run, workflow};

    #[test]
    fn test_unsafe_checkout() {
        let input = workflow(
            r#"
on: push
jobs:
  defaults:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
  writable:
    runs-on: ubuntu-latest
    permissions:
      contents: write
    steps:
      - uses: actions/checkout@v4
        with:
          persist-credentials: false
      - uses: actions/checkout@v4
  readonly:
    runs-on: ubuntu-latest
    permissions:
      contents: read
    steps:
      - uses: actions/checkout@v4
"#,
        );

        let findings = run::<UnsafeCheckout>(&input);
        assert_eq!(kinds(&findings), ["unsafe_checkout", "unsafe_checkout"]);
        assert_eq!(findings[0].evidence.line, 7);
        assert_eq!(findings[1].evidence.line, 16);
    }
}
