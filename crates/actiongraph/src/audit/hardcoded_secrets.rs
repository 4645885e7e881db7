use std::sync::LazyLock;

use actions_models::{action::Runs, common::Env, document::Route, route};
use regex::Regex;

use super::{Audit, AuditError, AuditInput, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{AsDocument, action::Action, workflow::Workflow},
    state::AuditState,
    utils::shannon_entropy,
};

pub(crate) const POTENTIAL_HARDCODED_SECRET: FindingKind =
    FindingKind::new("potential_hardcoded_secret", Severity::High);
pub(crate) const HARDCODED_CONTAINER_CREDENTIALS: FindingKind =
    FindingKind::new("hardcoded_container_credentials", Severity::High);

/// Minimum bits per character for a literal to look like a credential.
const ENTROPY_THRESHOLD: f64 = 3.5;
const MIN_SECRET_LEN: usize = 8;

#[allow(clippy::unwrap_used)]
static KNOWN_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\b(",
        r"gh[pousr]_[A-Za-z0-9]{36}",
        r"|github_pat_[A-Za-z0-9_]{22,}",
        r"|AKIA[0-9A-Z]{16}",
        r"|xox[abprs]-[A-Za-z0-9-]{10,}",
        r"|AIza[0-9A-Za-z_-]{35}",
        r"|sk_live_[0-9A-Za-z]{24,}",
        r"|npm_[A-Za-z0-9]{36}",
        r"|glpat-[A-Za-z0-9_-]{20}",
        r")\b",
        r"|-----BEGIN [A-Z ]*PRIVATE KEY-----",
    ))
    .unwrap()
});

#[allow(clippy::unwrap_used)]
static CREDENTIAL_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(password|passwd|secret|token|api[_-]?key|access[_-]?key|private[_-]?key|credential)",
    )
    .unwrap()
});

/// Whether `value` is a literal (not computed by an expression) that
/// looks like a credential.
fn looks_like_secret(value: &str) -> bool {
    let value = value.trim();
    !value.contains("${{")
        && value.len() >= MIN_SECRET_LEN
        && !value.contains(char::is_whitespace)
        && shannon_entropy(value) >= ENTROPY_THRESHOLD
}

pub(crate) struct HardcodedSecrets;

audit_meta!(
    HardcodedSecrets,
    "hardcoded-secrets",
    "credentials embedded in the definition",
    [POTENTIAL_HARDCODED_SECRET, HARDCODED_CONTAINER_CREDENTIALS]
);

impl HardcodedSecrets {
    /// Flags credential-shaped keys with literal high-entropy values.
    /// Values with a recognizable token format are left to the raw scan.
    fn check_env(&self, env: &Env, route: Route, doc: &impl AsDocument) -> Vec<Finding> {
        env.iter()
            .filter(|(key, _)| CREDENTIAL_KEY.is_match(key))
            .filter_map(|(key, value)| {
                let value = value.as_str()?;
                (looks_like_secret(value) && !KNOWN_TOKEN.is_match(value)).then(|| {
                    Self::finding(POTENTIAL_HARDCODED_SECRET)
                        .message(format!("{key} appears to hold a hardcoded credential"))
                        .at(route.with_key(key))
                        .build(doc)
                })
            })
            .collect()
    }
}

impl Audit for HardcodedSecrets {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_workflow(&self, workflow: &Workflow) -> Result<Vec<Finding>, AuditError> {
        let mut findings = self.check_env(&workflow.env, route!["env"], workflow);

        for job in &workflow.jobs {
            findings.extend(self.check_env(&job.env, job.route.with_key("env"), workflow));
            findings.extend(self.check_env(&job.with, job.route.with_key("with"), workflow));

            for container in job.containers() {
                findings.extend(self.check_env(
                    &container.env,
                    container.route.with_key("env"),
                    workflow,
                ));

                let password = container
                    .credentials
                    .as_ref()
                    .and_then(|creds| creds.password.as_deref());
                if let Some(password) = password
                    && !password.contains("${{")
                    && !password.trim().is_empty()
                {
                    findings.push(
                        Self::finding(HARDCODED_CONTAINER_CREDENTIALS)
                            .message("container registry password is hardcoded")
                            .at(container.route.with_keys(["credentials", "password"]))
                            .build(workflow),
                    );
                }
            }

            for step in &job.steps {
                findings.extend(self.check_env(&step.env, step.route.with_key("env"), workflow));
                if let Some(with) = step.with() {
                    findings.extend(self.check_env(with, step.route.with_key("with"), workflow));
                }
            }
        }

        Ok(findings)
    }

    fn audit_action(&self, action: &Action) -> Result<Vec<Finding>, AuditError> {
        let mut findings = vec![];

        if let Runs::Docker { env, .. } = &action.runs {
            findings.extend(self.check_env(env, route!["runs", "env"], action));
        }

        for step in action.steps() {
            findings.extend(self.check_env(&step.env, step.route.with_key("env"), action));
            if let Some(with) = step.with() {
                findings.extend(self.check_env(with, step.route.with_key("with"), action));
            }
        }

        Ok(findings)
    }

    fn audit_raw(&self, input: &AuditInput) -> Result<Vec<Finding>, AuditError> {
        let source = input.as_document().source();

        Ok(KNOWN_TOKEN
            .find_iter(source)
            .map(|token| {
                Self::finding(POTENTIAL_HARDCODED_SECRET)
                    .message("value matches the format of a known access token or key")
                    .at_offset(token.start())
                    .build(input)
            })
            .collect())
    }
}
