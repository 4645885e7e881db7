use super::{Audit, AuditError, AuditInput, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    state::AuditState,
};

pub(crate) const INVALID_STRUCTURE: FindingKind =
    FindingKind::new("invalid_structure", Severity::Low);

pub(crate) struct MalformedDefinition;

audit_meta!(
    MalformedDefinition,
    "malformed-definition",
    "structural problems in the definition",
    [INVALID_STRUCTURE]
);

impl Audit for MalformedDefinition {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_raw(&self, input: &AuditInput) -> Result<Vec<Finding>, AuditError> {
        Ok(input
            .diagnostics()
            .iter()
            .map(|diagnostic| {
                Self::finding(INVALID_STRUCTURE)
                    .message(diagnostic.to_string())
                    .at(diagnostic.route.clone())
                    .build(input)
            })
            .collect())
    }
}
