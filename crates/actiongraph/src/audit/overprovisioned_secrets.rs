use std::sync::LazyLock;

use regex::Regex;

use super::{Audit, AuditError, AuditInput, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::AsDocument as _,
    state::AuditState,
    utils::extract_expressions,
};

pub(crate) const OVERPROVISIONED_SECRETS: FindingKind =
    FindingKind::new("overprovisioned_secrets", Severity::Medium);

#[allow(clippy::unwrap_used)]
static TOJSON_SECRETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btojson\s*\(\s*secrets\s*\)").unwrap());

pub(crate) struct OverprovisionedSecrets;

audit_meta!(
    OverprovisionedSecrets,
    "overprovisioned-secrets",
    "excessively provisioned secrets",
    [OVERPROVISIONED_SECRETS]
);

impl Audit for OverprovisionedSecrets {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_raw(&self, input: &AuditInput) -> Result<Vec<Finding>, AuditError> {
        Ok(extract_expressions(input.as_document().source())
            .into_iter()
            .filter(|(expr, _)| TOJSON_SECRETS.is_match(expr.as_bare()))
            .map(|(expr, span)| {
                Self::finding(OVERPROVISIONED_SECRETS)
                    .message(format!(
                        "{} exposes every secret, not just the ones needed",
                        expr.as_raw()
                    ))
                    .at_offset(span.start)
                    .build(input)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::OverprovisionedSecrets;
    use crate::audit::test_support::{kinds, run, workflow};

    #[test]
    fn test_overprovisioned_secrets() {
        let input = workflow(
            r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: ./build.sh
        env:
          ALL: ${{ toJSON(secrets) }}
          ONE: ${{ secrets.ONE }}
          CTX: ${{ toJson(github) }}
"#,
        );

        let findings = run::<OverprovisionedSecrets>(&input);
        assert_eq!(kinds(&findings), ["overprovisioned_secrets"]);
        assert_eq!(findings[0].evidence.line, 9);
    }
}
