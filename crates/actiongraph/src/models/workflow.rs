//! Workflow wrappers and their per-job and per-step views.

use std::ops::Deref;

use actions_models::{
    Document, ParseError, Uses,
    common::{Env, PermissionsSpec},
    document::Route,
    step, workflow,
};

use crate::{
    models::{AsDocument, StepCommon},
    registry::input::InputKey,
};

/// Triggers that run with the base repository's privileges on
/// attacker-influenced input.
pub(crate) const PRIVILEGED_TRIGGERS: &[&str] = &["pull_request_target", "workflow_run"];

/// A single workflow, keyed within the current analysis.
///
/// This type implements [`Deref`] for [`workflow::Workflow`].
pub struct Workflow {
    pub key: InputKey,
    inner: workflow::Workflow,
    /// Set when the source couldn't be parsed at all, in which case
    /// `inner` is empty.
    pub parse_error: Option<ParseError>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{key}", key = self.key)
    }
}

impl Deref for Workflow {
    type Target = workflow::Workflow;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl AsDocument for Workflow {
    fn as_document(&self) -> &Document {
        self.inner.document()
    }

    fn input_key(&self) -> &InputKey {
        &self.key
    }
}

impl Workflow {
    /// Loads a workflow, keeping an empty model if it can't be parsed.
    pub fn from_string(contents: &str, key: InputKey) -> Self {
        let (inner, parse_error) = workflow::Workflow::parse_lenient(contents);
        if let Some(err) = &parse_error {
            tracing::debug!("{key} failed to parse: {err}");
        }

        Self {
            key,
            inner,
            parse_error,
        }
    }

    pub fn jobs(&self) -> impl Iterator<Item = Job<'_>> {
        self.inner.jobs.iter().map(|job| {
            if job.is_reusable() {
                Job::ReusableWorkflowCallJob(ReusableWorkflowCallJob {
                    inner: job,
                    parent: self,
                })
            } else {
                Job::NormalJob(NormalJob {
                    inner: job,
                    parent: self,
                })
            }
        })
    }

    /// Whether this workflow has a `pull_request_target` or
    /// `workflow_run` trigger.
    pub fn has_privileged_trigger(&self) -> bool {
        PRIVILEGED_TRIGGERS
            .iter()
            .any(|trigger| self.has_trigger(trigger))
    }

    /// Every action or reusable workflow the workflow depends on, in
    /// document order, alongside the route of its `uses:` clause.
    ///
    /// Docker images aren't dependencies in this sense.
    pub fn dependencies(&self) -> Vec<(&Uses, Route)> {
        let mut dependencies = vec![];
        for job in &self.inner.jobs {
            if let Some(uses) = &job.uses {
                dependencies.push((uses, job.route.with_key("uses")));
            }
            for step in &job.steps {
                if let Some(uses) = step.uses() {
                    dependencies.push((uses, step.route.with_key("uses")));
                }
            }
        }

        dependencies.retain(|(uses, _)| !matches!(uses, Uses::Docker(_)));
        dependencies
    }
}

pub enum Job<'doc> {
    NormalJob(NormalJob<'doc>),
    ReusableWorkflowCallJob(ReusableWorkflowCallJob<'doc>),
}

/// A job with `steps:`.
#[derive(Clone, Copy)]
pub struct NormalJob<'doc> {
    inner: &'doc workflow::Job,
    pub parent: &'doc Workflow,
}

impl<'doc> NormalJob<'doc> {
    pub fn steps(&self) -> impl Iterator<Item = Step<'doc>> + use<'doc> {
        let job = *self;
        let steps: &'doc [step::Step] = &job.inner.steps;
        steps.iter().map(move |inner| Step { inner, job })
    }

    /// The permissions the job's token actually gets: the job's own
    /// block, else the workflow's.
    pub fn effective_permissions(&self) -> &'doc PermissionsSpec {
        if self.inner.permissions.is_default() {
            &self.parent.permissions
        } else {
            &self.inner.permissions
        }
    }
}

impl Deref for NormalJob<'_> {
    type Target = workflow::Job;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl AsDocument for NormalJob<'_> {
    fn as_document(&self) -> &Document {
        self.parent.as_document()
    }

    fn input_key(&self) -> &InputKey {
        &self.parent.key
    }
}

/// A job that calls a reusable workflow with `uses:`.
#[derive(Clone, Copy)]
pub struct ReusableWorkflowCallJob<'doc> {
    inner: &'doc workflow::Job,
    pub parent: &'doc Workflow,
}

impl<'doc> ReusableWorkflowCallJob<'doc> {
    pub fn uses(&self) -> Option<&'doc Uses> {
        self.inner.uses.as_ref()
    }
}

impl Deref for ReusableWorkflowCallJob<'_> {
    type Target = workflow::Job;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl AsDocument for ReusableWorkflowCallJob<'_> {
    fn as_document(&self) -> &Document {
        self.parent.as_document()
    }

    fn input_key(&self) -> &InputKey {
        &self.parent.key
    }
}

/// A step within a [`NormalJob`].
#[derive(Clone, Copy)]
pub struct Step<'doc> {
    inner: &'doc step::Step,
    pub job: NormalJob<'doc>,
}

impl<'doc> Step<'doc> {
    pub fn workflow(&self) -> &'doc Workflow {
        self.job.parent
    }
}

impl Deref for Step<'_> {
    type Target = step::Step;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl AsDocument for Step<'_> {
    fn as_document(&self) -> &Document {
        self.job.parent.as_document()
    }

    fn input_key(&self) -> &InputKey {
        &self.job.parent.key
    }
}

impl StepCommon for Step<'_> {
    fn step(&self) -> &step::Step {
        self.inner
    }

    fn is_self_hosted(&self) -> bool {
        self.job.runs_on.is_self_hosted()
    }

    fn has_trigger(&self, event: &str) -> bool {
        self.job.parent.has_trigger(event)
    }

    fn env_scopes(&self) -> Vec<&Env> {
        vec![&self.inner.env, &self.job.inner.env, &self.job.parent.env]
    }
}
