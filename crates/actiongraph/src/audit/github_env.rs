use std::sync::LazyLock;

use regex::Regex;

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::workflow::Step,
    state::AuditState,
};

pub(crate) const GITHUB_ENV_INJECTION: FindingKind =
    FindingKind::new("github_env_injection", Severity::High);

#[allow(clippy::unwrap_used)]
static GITHUB_ENV_WRITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{?(?:env:)?GITHUB_(ENV|PATH)\b").unwrap());

pub(crate) struct GitHubEnv;

audit_meta!(
    GitHubEnv,
    "github-env",
    "dangerous use of environment file",
    [GITHUB_ENV_INJECTION]
);

impl Audit for GitHubEnv {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_step(&self, step: &Step<'_>) -> Result<Vec<Finding>, AuditError> {
        if !step.workflow().has_privileged_trigger() {
            return Ok(vec![]);
        }

        let Some(run) = step.run() else {
            return Ok(vec![]);
        };

        Ok(GITHUB_ENV_WRITE
            .captures(run)
            .map(|caps| {
                let file = caps.get(1).map_or("ENV", |m| m.as_str());
                let matched = caps.get(0).map_or("", |m| m.as_str());
                Self::finding(GITHUB_ENV_INJECTION)
                    .message(format!(
                        "writes to GITHUB_{file} in a privileged workflow can alter later steps"
                    ))
                    .at(step.route.with_key("run"))
                    .within(matched)
                    .build(step)
            })
            .into_iter()
            .collect())
    }
}
