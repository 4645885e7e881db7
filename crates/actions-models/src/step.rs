//! Steps, shared by workflow jobs and composite actions.

use serde_yaml::{Mapping, Value};

use crate::{
    common::Env,
    document::Route,
    parse::{Extractor, untag},
    uses::Uses,
};

/// The body of a step: what it actually does.
#[derive(Clone, Debug, PartialEq)]
pub enum StepBody {
    /// `uses: ...` with its `with:` inputs.
    Uses { uses: Uses, with: Env },
    /// `run: ...`.
    Run {
        run: String,
        /// The `shell:` as written, including any flags.
        shell: Option<String>,
        working_directory: Option<String>,
    },
    /// Neither a valid `uses:` nor a `run:`. A diagnostic explains why.
    Invalid,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    /// The step's index within its job or composite action.
    pub index: usize,
    /// Where the step lives in its document.
    pub route: Route,
    pub line: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub if_cond: Option<String>,
    pub env: Env,
    pub continue_on_error: bool,
    pub body: StepBody,
}

impl Step {
    pub(crate) fn extract(ex: &mut Extractor<'_>, index: usize, value: &Value, route: Route) -> Self {
        let empty = Mapping::new();
        let step = match untag(value) {
            Value::Mapping(step) => step,
            _ => {
                ex.diag(&route, "step is not a mapping");
                &empty
            }
        };

        let body = Self::extract_body(ex, step, &route);

        Self {
            index,
            line: ex.line(&route),
            id: ex.string(step.get("id"), &route.with_key("id")),
            name: ex.string(step.get("name"), &route.with_key("name")),
            if_cond: ex.string(step.get("if"), &route.with_key("if")),
            env: ex.env(step.get("env"), &route.with_key("env")),
            continue_on_error: ex.flag(
                step.get("continue-on-error"),
                &route.with_key("continue-on-error"),
            ),
            body,
            route,
        }
    }

    fn extract_body(ex: &mut Extractor<'_>, step: &Mapping, route: &Route) -> StepBody {
        let uses = ex.string(step.get("uses"), &route.with_key("uses"));
        let run = ex.string(step.get("run"), &route.with_key("run"));

        match (uses, run) {
            (Some(_), Some(_)) => {
                ex.diag(route, "step has both `uses` and `run`");
                StepBody::Invalid
            }
            (Some(uses), None) => match Uses::parse(&uses) {
                Ok(uses) => StepBody::Uses {
                    uses,
                    with: ex.env(step.get("with"), &route.with_key("with")),
                },
                Err(e) => {
                    ex.diag(&route.with_key("uses"), e.to_string());
                    StepBody::Invalid
                }
            },
            (None, Some(run)) => StepBody::Run {
                run,
                shell: ex.string(step.get("shell"), &route.with_key("shell")),
                working_directory: ex.string(
                    step.get("working-directory"),
                    &route.with_key("working-directory"),
                ),
            },
            (None, None) => {
                ex.diag(route, "step has neither `uses` nor `run`");
                StepBody::Invalid
            }
        }
    }

    /// A human-readable name: the step's `name:`, its `id:`, or its
    /// position.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| format!("step {}", self.index + 1))
    }

    pub fn uses(&self) -> Option<&Uses> {
        match &self.body {
            StepBody::Uses { uses, .. } => Some(uses),
            _ => None,
        }
    }

    pub fn with(&self) -> Option<&Env> {
        match &self.body {
            StepBody::Uses { with, .. } => Some(with),
            _ => None,
        }
    }

    pub fn run(&self) -> Option<&str> {
        match &self.body {
            StepBody::Run { run, .. } => Some(run),
            _ => None,
        }
    }
}

/// Extracts a `steps:` list.
pub(crate) fn extract_steps(ex: &mut Extractor<'_>, value: Option<&Value>, route: &Route) -> Vec<Step> {
    ex.sequence(value, route)
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(index, step)| Step::extract(ex, index, step, route.with_key(index)))
        .collect()
}
