use std::sync::LazyLock;

use regex::Regex;

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{
        StepCommon,
        action::CompositeStep,
        workflow::{NormalJob, Step},
    },
    state::AuditState,
    utils::extract_expressions,
};

pub(crate) const SECRETS_IN_MATRIX: FindingKind =
    FindingKind::new("secrets_in_matrix", Severity::Medium);
pub(crate) const SECRET_IN_ENVIRONMENT: FindingKind =
    FindingKind::new("secret_in_environment", Severity::Medium);
pub(crate) const SECRET_IN_RUN_OUTPUT: FindingKind =
    FindingKind::new("secret_in_run_output", Severity::Medium);

#[allow(clippy::unwrap_used)]
static ECHO_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(echo|printf|print|Write-Host|Write-Output|cat)\b").unwrap()
});

#[allow(clippy::unwrap_used)]
static SECRETS_CONTEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bsecrets\s*[.\[]").unwrap());

/// Whether a script line prints to the log. Redirected or piped output
/// and masking commands don't count.
fn prints_to_log(line: &str) -> bool {
    ECHO_LIKE.is_match(line)
        && !line.contains('>')
        && !line.contains('|')
        && !line.contains("::add-mask::")
}

/// Whether a script line references the shell variable `name`.
fn references_variable(line: &str, name: &str) -> bool {
    [
        format!("${name}"),
        format!("${{{name}}}"),
        format!("$env:{name}"),
        format!("%{name}%"),
    ]
    .iter()
    .any(|pattern| {
        line.match_indices(pattern.as_str()).any(|(idx, _)| {
            // `$TOKEN_SUFFIX` isn't `$TOKEN`.
            !line[idx + pattern.len()..]
                .starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
        })
    })
}

pub(crate) struct SecretExposure;

audit_meta!(
    SecretExposure,
    "secret-exposure",
    "secrets exposed in logs or job matrices",
    [SECRETS_IN_MATRIX, SECRET_IN_ENVIRONMENT, SECRET_IN_RUN_OUTPUT]
);

impl SecretExposure {
    fn check_step(&self, step: &impl StepCommon) -> Vec<Finding> {
        let inner = step.step();
        let Some(run) = inner.run() else {
            return vec![];
        };
        let route = inner.route.with_key("run");

        let secret_vars = step
            .env_scopes()
            .into_iter()
            .flat_map(|env| env.iter())
            .filter(|(_, value)| {
                value
                    .as_str()
                    .is_some_and(|value| SECRETS_CONTEXT.is_match(value))
            })
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>();

        let mut findings = vec![];
        for line in run.lines().filter(|line| prints_to_log(line)) {
            let direct = extract_expressions(line)
                .into_iter()
                .find(|(expr, _)| SECRETS_CONTEXT.is_match(expr.as_bare()));

            if let Some((expr, _)) = direct {
                findings.push(
                    Self::finding(SECRET_IN_RUN_OUTPUT)
                        .message(format!("{} is printed to the job log", expr.as_raw()))
                        .at(route.clone())
                        .within(line.trim())
                        .build(step),
                );
            } else if let Some(name) = secret_vars
                .iter()
                .find(|name| references_variable(line, name))
            {
                findings.push(
                    Self::finding(SECRET_IN_ENVIRONMENT)
                        .message(format!(
                            "{name} holds a secret and is printed to the job log"
                        ))
                        .at(route.clone())
                        .within(line.trim())
                        .build(step),
                );
            }
        }

        findings
    }
}

impl Audit for SecretExposure {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_normal_job(&self, job: &NormalJob<'_>) -> Result<Vec<Finding>, AuditError> {
        let mut findings = vec![];

        if let Some(matrix) = job.strategy.as_ref().and_then(|s| s.matrix.as_ref()) {
            for value in matrix.strings() {
                if extract_expressions(&value)
                    .iter()
                    .any(|(expr, _)| SECRETS_CONTEXT.is_match(expr.as_bare()))
                {
                    findings.push(
                        Self::finding(SECRETS_IN_MATRIX)
                            .message(format!(
                                "{value} places a secret in the job matrix, where it is visible in job names and logs"
                            ))
                            .at(job.route.with_keys(["strategy", "matrix"]))
                            .within(value.as_str())
                            .build(job),
                    );
                }
            }
        }

        for step in job.steps() {
            findings.extend(self.audit_step(&step)?);
        }

        Ok(findings)
    }

    fn audit_step(&self, step: &Step<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check_step(step))
    }

    fn audit_composite_step(&self, step: &CompositeStep<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check_step(step))
    }
}
