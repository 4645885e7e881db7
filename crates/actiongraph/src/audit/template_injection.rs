//! Detects expressions in script sinks that expand attacker-controllable
//! text before the shell (or JavaScript runtime) sees it.

use std::sync::LazyLock;

use actions_models::{Uses, document::Route};
use regex::Regex;

use super::{Audit, AuditError, AuditLoadError, audit_meta};
use crate::{
    finding::{Finding, FindingKind, Severity},
    models::{ReferenceExt as _, StepCommon, action::CompositeStep, workflow::Step},
    state::AuditState,
    utils::extract_expressions,
};

pub(crate) const SCRIPT_INJECTION: FindingKind =
    FindingKind::new("script_injection", Severity::High);
pub(crate) const CODE_INJECTION_VIA_INPUT: FindingKind =
    FindingKind::new("code_injection_via_input", Severity::Medium);

/// Trailing fields of `github.event.*` that carry attacker-controlled text.
const RISKY_FIELDS: &[&str] = &[
    "body",
    "title",
    "ref",
    "head_ref",
    "label",
    "message",
    "email",
    "default_branch",
    "page_name",
];

/// Parents whose `name` is attacker-controlled.
const RISKY_NAME_PARENTS: &[&str] = &["author", "committer", "label"];

#[allow(clippy::unwrap_used)]
static GITHUB_CONTEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bgithub\.(head_ref\b|event(?:\.[A-Za-z0-9_*-]+|\[[^\]]*\])*)").unwrap()
});

#[allow(clippy::unwrap_used)]
static INPUTS_CONTEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:github\.event\.)?inputs\.[A-Za-z0-9_-]+").unwrap());

/// Whether a `github.*` context path (without the `github.` prefix)
/// is attacker-controlled.
fn is_risky_context(path: &str) -> bool {
    if path == "head_ref" {
        return true;
    }

    let fields = path
        .split('.')
        .map(|field| field.split('[').next().unwrap_or(field))
        .collect::<Vec<_>>();

    // `github.event.inputs.*` is handled as an input.
    if fields.get(1) == Some(&"inputs") {
        return false;
    }

    match fields.as_slice() {
        [.., parent, "name"] => RISKY_NAME_PARENTS.contains(parent),
        [_, .., last] => RISKY_FIELDS.contains(last),
        _ => false,
    }
}

pub(crate) struct TemplateInjection;

audit_meta!(
    TemplateInjection,
    "template-injection",
    "code injection via template expansion",
    [SCRIPT_INJECTION, CODE_INJECTION_VIA_INPUT]
);

impl TemplateInjection {
    /// The script sinks in a step: its `run:`, or `actions/github-script`'s
    /// `script:` input.
    fn sinks<'s>(step: &'s impl StepCommon) -> Option<(&'s str, Route)> {
        let inner = step.step();

        if let Some(run) = inner.run() {
            return Some((run, inner.route.with_key("run")));
        }

        match inner.uses() {
            Some(Uses::Repository(reference)) if reference.is_action("actions/github-script") => {
                let script = inner.with()?.get("script")?.as_str()?;
                Some((script, inner.route.with_keys(["with", "script"])))
            }
            _ => None,
        }
    }

    fn check(&self, step: &impl StepCommon) -> Vec<Finding> {
        let Some((script, route)) = Self::sinks(step) else {
            return vec![];
        };

        let escalate = step.is_self_hosted();
        let mut findings = vec![];

        for (expr, _) in extract_expressions(script) {
            let bare = expr.as_bare();

            let risky = GITHUB_CONTEXT
                .captures_iter(bare)
                .filter_map(|caps| caps.get(1))
                .find(|path| is_risky_context(path.as_str()));

            let (kind, severity, context) = if let Some(path) = risky {
                let severity = if escalate {
                    Severity::Critical
                } else {
                    SCRIPT_INJECTION.severity
                };
                (SCRIPT_INJECTION, severity, format!("github.{}", path.as_str()))
            } else if let Some(input) = INPUTS_CONTEXT.find(bare) {
                let severity = if escalate {
                    Severity::High
                } else {
                    CODE_INJECTION_VIA_INPUT.severity
                };
                (CODE_INJECTION_VIA_INPUT, severity, input.as_str().to_string())
            } else {
                continue;
            };

            let runner = if escalate { " on a self-hosted runner" } else { "" };
            findings.push(
                Self::finding(kind)
                    .severity(severity)
                    .message(format!(
                        "{context} is expanded directly into a script{runner}; pass it through an environment variable instead"
                    ))
                    .at(route.clone())
                    .within(expr.as_raw())
                    .build(step),
            );
        }

        findings
    }
}

impl Audit for TemplateInjection {
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
