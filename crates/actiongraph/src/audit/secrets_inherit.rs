use actions_models::workflow::SecretsSpec;

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::workflow::ReusableWorkflowCallJob,
    state::AuditState,
};

pub(crate) const SECRETS_INHERIT: FindingKind = FindingKind::new("secrets_inherit", Severity::Medium);

pub(crate) struct SecretsInherit;

audit_meta!(
    SecretsInherit,
    "secrets-inherit",
    "secrets unconditionally inherited by called workflow",
    [SECRETS_INHERIT]
);

impl Audit for SecretsInherit {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_reusable_job(
        &self,
        job: &ReusableWorkflowCallJob<'_>,
    ) -> Result<Vec<Finding>, AuditError> {
        if !matches!(job.secrets, Some(SecretsSpec::Inherit)) {
            return Ok(vec![]);
        }

        Ok(vec![
            Self::finding(SECRETS_INHERIT)
                .message(format!(
                    "job {} passes every secret to the called workflow",
                    job.id
                ))
                .at(job.route.with_key("secrets"))
                .build(job),
        ])
    }
}
