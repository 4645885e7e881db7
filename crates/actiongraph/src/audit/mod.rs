//! Core namespace for actiongraph's audits.

use std::sync::Arc;

use actions_models::{Diagnostic, Document, ParseError};
use thiserror::Error;
use tracing::instrument;

use crate::{
    finding::{Finding, FindingBuilder, FindingKind},
    models::{
        AsDocument,
        action::{Action, CompositeStep},
        workflow::{Job, NormalJob, ReusableWorkflowCallJob, Step, Workflow},
    },
    registry::input::InputKey,
    state::AuditState,
};

pub(crate) mod bot_conditions;
pub(crate) mod dangerous_triggers;
pub(crate) mod deprecated_actions;
pub(crate) mod excessive_permissions;
pub(crate) mod github_env;
pub(crate) mod hardcoded_secrets;
pub(crate) mod insecure_commands;
pub(crate) mod malformed_definition;
pub(crate) mod malicious_scripts;
pub(crate) mod obfuscation;
pub(crate) mod overprovisioned_secrets;
pub(crate) mod secret_exposure;
pub(crate) mod secrets_inherit;
pub(crate) mod self_hosted_runner;
pub(crate) mod template_injection;
pub(crate) mod typosquatting;
pub(crate) mod unpinned_images;
pub(crate) mod unpinned_uses;
pub(crate) mod unsafe_checkout;
pub(crate) mod untrusted_actions;

/// A single input to the audits: a workflow or an action definition.
#[derive(Debug)]
pub enum AuditInput {
    Workflow(Arc<Workflow>),
    Action(Arc<Action>),
}

impl AuditInput {
    pub fn key(&self) -> &InputKey {
        match self {
            AuditInput::Workflow(workflow) => &workflow.key,
            AuditInput::Action(action) => &action.key,
        }
    }

    /// The fatal parse error, if the input couldn't be parsed at all.
    pub fn parse_error(&self) -> Option<&ParseError> {
        match self {
            AuditInput::Workflow(workflow) => workflow.parse_error.as_ref(),
            AuditInput::Action(action) => action.parse_error.as_ref(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            AuditInput::Workflow(workflow) => &workflow.diagnostics,
            AuditInput::Action(action) => &action.diagnostics,
        }
    }
}

impl AsDocument for AuditInput {
    fn as_document(&self) -> &Document {
        match self {
            AuditInput::Workflow(workflow) => workflow.as_document(),
            AuditInput::Action(action) => action.as_document(),
        }
    }

    fn input_key(&self) -> &InputKey {
        self.key()
    }
}

impl From<Workflow> for AuditInput {
    fn from(value: Workflow) -> Self {
        Self::Workflow(Arc::new(value))
    }
}

impl From<Action> for AuditInput {
    fn from(value: Action) -> Self {
        Self::Action(Arc::new(value))
    }
}

impl From<Arc<Workflow>> for AuditInput {
    fn from(value: Arc<Workflow>) -> Self {
        Self::Workflow(value)
    }
}

impl From<Arc<Action>> for AuditInput {
    fn from(value: Arc<Action>) -> Self {
        Self::Action(value)
    }
}

/// A supertrait for all audits.
///
/// Audits implement this via the [`audit_meta`] macro.
pub(crate) trait AuditCore {
    fn ident() -> &'static str
    where
        Self: Sized;

    fn desc() -> &'static str
    where
        Self: Sized;

    /// Every kind of finding this audit can produce.
    fn kinds() -> &'static [FindingKind]
    where
        Self: Sized;

    fn finding(kind: FindingKind) -> FindingBuilder
    where
        Self: Sized,
    {
        FindingBuilder::new(kind)
    }

    fn err(error: impl Into<anyhow::Error>) -> AuditError
    where
        Self: Sized,
    {
        AuditError {
            ident: Self::ident(),
            source: error.into(),
        }
    }
}

/// A convenience macro for implementing [`AuditCore`] on a type.
///
/// ```ignore
/// struct SomeAudit;
///
/// audit_meta!(SomeAudit, "some-audit", "brief description", [SOME_KIND]);
/// ```
macro_rules! audit_meta {
    ($t:ty, $id:literal, $desc:expr, [$($kind:expr),+ $(,)?]) => {
        use crate::audit::AuditCore;

        impl AuditCore for $t {
            fn ident() -> &'static str {
                $id
            }

            fn desc() -> &'static str {
                $desc
            }

            fn kinds() -> &'static [crate::finding::FindingKind] {
                &[$($kind),+]
            }
        }
    };
}

pub(crate) use audit_meta;

#[derive(Error, Debug)]
pub(crate) enum AuditLoadError {
    /// The audit's initialization failed in a way that suggests it should
    /// be skipped, rather than failing the entire run.
    #[error("{0}")]
    Skip(anyhow::Error),
}

#[derive(Error, Debug)]
#[error("error in '{ident}' audit")]
pub(crate) struct AuditError {
    ident: &'static str,
    #[source]
    source: anyhow::Error,
}

impl AuditError {
    pub(crate) fn ident(&self) -> &'static str {
        self.ident
    }
}

/// Auditing trait.
///
/// Implementors pick the level of specificity they need. For workflows:
///
/// 1. [`Audit::audit_workflow`]: runs once per workflow (most general)
/// 1. [`Audit::audit_normal_job`] and/or [`Audit::audit_reusable_job`]:
///    runs on each normal/reusable job
/// 1. [`Audit::audit_step`]: runs on each step within each normal job
///
/// For actions:
///
/// 1. [`Audit::audit_action`]: runs once per action
/// 1. [`Audit::audit_composite_step`]: runs on each composite step
///
/// For both, [`Audit::audit_raw`] runs on the raw document source.
///
/// Overriding a more general hook shadows the more specific ones beneath
/// it.
pub(crate) trait Audit: AuditCore {
    fn new(state: &AuditState) -> Result<Self, AuditLoadError>
    where
        Self: Sized;

    fn audit_step(&self, _step: &Step<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(vec![])
    }

    fn audit_normal_job(&self, job: &NormalJob<'_>) -> Result<Vec<Finding>, AuditError> {
        let mut results = vec![];
        for step in job.steps() {
            results.extend(self.audit_step(&step)?);
        }
        Ok(results)
    }

    fn audit_reusable_job(
        &self,
        _job: &ReusableWorkflowCallJob<'_>,
    ) -> Result<Vec<Finding>, AuditError> {
        Ok(vec![])
    }

    fn audit_workflow(&self, workflow: &Workflow) -> Result<Vec<Finding>, AuditError> {
        let mut results = vec![];

        for job in workflow.jobs() {
            match job {
                Job::NormalJob(normal) => {
                    results.extend(self.audit_normal_job(&normal)?);
                }
                Job::ReusableWorkflowCallJob(reusable) => {
                    results.extend(self.audit_reusable_job(&reusable)?);
                }
            }
        }

        Ok(results)
    }

    fn audit_composite_step(&self, _step: &CompositeStep<'_>) -> Result<Vec<Finding>, AuditError> {
        Ok(vec![])
    }

    fn audit_action(&self, action: &Action) -> Result<Vec<Finding>, AuditError> {
        let mut results = vec![];
        for step in action.composite_steps() {
            results.extend(self.audit_composite_step(&step)?);
        }
        Ok(results)
    }

    fn audit_raw(&self, _input: &AuditInput) -> Result<Vec<Finding>, AuditError> {
        Ok(vec![])
    }

    /// The top-level auditing function for both workflows and actions.
    ///
    /// Implementors **should not** override this blanket implementation,
    /// since it's marked with tracing instrumentation.
    #[instrument(skip_all, fields(input = %input.key()))]
    fn audit(&self, input: &AuditInput) -> Result<Vec<Finding>, AuditError> {
        let mut results = match input {
            AuditInput::Workflow(workflow) => self.audit_workflow(workflow),
            AuditInput::Action(action) => self.audit_action(action),
        }?;

        results.extend(self.audit_raw(input)?);

        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{
        audit::{Audit, AuditInput},
        finding::Finding,
        models::{action::Action, workflow::Workflow},
        registry::input::InputKey,
        state::AuditState,
    };

    #[allow(clippy::unwrap_used)]
    pub(crate) fn workflow(source: &str) -> AuditInput {
        let key = InputKey::local(".github/workflows/test.yml", None).unwrap();
        Workflow::from_string(source, key).into()
    }

    #[allow(clippy::unwrap_used)]
    pub(crate) fn action(source: &str) -> AuditInput {
        let key = InputKey::local("action.yml", None).unwrap();
        Action::from_string(source, key).into()
    }

    /// Runs a single audit with default state, returning the finding
    /// types it produced in order.
    #[allow(clippy::unwrap_used)]
    pub(crate) fn run<A: Audit>(input: &AuditInput) -> Vec<Finding> {
        A::new(&AuditState::default())
            .unwrap()
            .audit(input)
            .unwrap()
    }

    pub(crate) fn kinds(findings: &[Finding]) -> Vec<&'static str> {
        findings.iter().map(|f| f.kind).collect()
    }
}
