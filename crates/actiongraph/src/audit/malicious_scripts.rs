use std::sync::LazyLock;

use regex::Regex;

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{StepCommon, action::CompositeStep, workflow::Step},
    state::AuditState,
};

pub(crate) const MALICIOUS_CURL_PIPE_BASH: FindingKind =
    FindingKind::new("malicious_curl_pipe_bash", Severity::Critical);
pub(crate) const MALICIOUS_BASE64_DECODE: FindingKind =
    FindingKind::new("malicious_base64_decode", Severity::Critical);
pub(crate) const UNVERIFIED_BINARY_DOWNLOAD: FindingKind =
    FindingKind::new("unverified_binary_download", Severity::Medium);

#[allow(clippy::unwrap_used)]
static CURL_PIPE_SHELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(curl|wget)\b[^|\n]*\|\s*(sudo\s+)?(ba|z|k|da)?sh\b").unwrap()
});

#[allow(clippy::unwrap_used)]
static BASE64_EXEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bbase64\s+(-d|--decode|-D)\b[^\n]*\|\s*(sudo\s+)?(ba|z|k|da)?sh\b|\beval\s+\S*\$\(\s*echo\s[^)]*\|\s*base64\s+(-d|--decode)").unwrap()
});

#[allow(clippy::unwrap_used)]
static DOWNLOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(curl|wget|Invoke-WebRequest)\b").unwrap());

#[allow(clippy::unwrap_used)]
static MAKE_EXECUTABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bchmod\s+(\+x|[0-7]*[1357][0-7]{0,2}\b|u\+x|a\+x)").unwrap());

#[allow(clippy::unwrap_used)]
static CHECKSUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(sha256sum|sha512sum|shasum|gpg\s+--verify|cosign\s+verify|Get-FileHash)\b")
        .unwrap()
});

pub(crate) struct MaliciousScripts;

audit_meta!(
    MaliciousScripts,
    "malicious-scripts",
    "remote code executed without verification",
    [
        MALICIOUS_CURL_PIPE_BASH,
        MALICIOUS_BASE64_DECODE,
        UNVERIFIED_BINARY_DOWNLOAD
    ]
);

impl MaliciousScripts {
    fn check(&self, step: &impl StepCommon) -> Vec<Finding> {
        let inner = step.step();
        let Some(run) = inner.run() else {
            return vec![];
        };
        let route = inner.route.with_key("run");
        let mut findings = vec![];

        for matched in CURL_PIPE_SHELL.find_iter(run) {
            findings.push(
                Self::finding(MALICIOUS_CURL_PIPE_BASH)
                    .message("remote script is piped directly into a shell")
                    .at(route.clone())
                    .within(matched.as_str())
                    .build(step),
            );
        }

        for matched in BASE64_EXEC.find_iter(run) {
            findings.push(
                Self::finding(MALICIOUS_BASE64_DECODE)
                    .message("base64-decoded payload is executed")
                    .at(route.clone())
                    .within(matched.as_str())
                    .build(step),
            );
        }

        if DOWNLOAD.is_match(run) && !CHECKSUM.is_match(run)
            && let Some(chmod) = MAKE_EXECUTABLE.find(run)
        {
            findings.push(
                Self::finding(UNVERIFIED_BINARY_DOWNLOAD)
                    .message("downloaded file is made executable without verifying a checksum")
                    .at(route)
                    .within(chmod.as_str())
                    .build(step),
            );
        }

        findings
    }
}

impl Audit for MaliciousScripts {
    fn new(_state: &AuditState) -> Result<Self, AuditLoadError> {
        Ok(Self)
    }

    fn audit_step(&self, step: &Step<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check(step))
    }

    fn audit_composite_step(&self, step: &CompositeStep<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(self.check(step))
    }
}
