//! Action definition wrappers.

use std::ops::Deref;

use actions_models::{
    Document, ParseError, Uses, action,
    common::Env,
    document::Route,
    step,
};

use crate::{
    models::{AsDocument, StepCommon},
    registry::input::InputKey,
};

/// An action definition, keyed within the current analysis.
///
/// This type implements [`Deref`] for [`action::Action`].
pub struct Action {
    pub key: InputKey,
    inner: action::Action,
    /// Set when the source couldn't be parsed at all, in which case
    /// `inner` is empty.
    pub parse_error: Option<ParseError>,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{key}", key = self.key)
    }
}

impl Deref for Action {
    type Target = action::Action;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl AsDocument for Action {
    fn as_document(&self) -> &Document {
        self.inner.document()
    }

    fn input_key(&self) -> &InputKey {
        &self.key
    }
}

impl Action {
    /// Loads an action, keeping an empty model if it can't be parsed.
    pub fn from_string(contents: &str, key: InputKey) -> Self {
        let (inner, parse_error) = action::Action::parse_lenient(contents);
        if let Some(err) = &parse_error {
            tracing::debug!("{key} failed to parse: {err}");
        }

        Self {
            key,
            inner,
            parse_error,
        }
    }

    /// Loads an action, failing if it can't be parsed at all.
    pub fn from_string_strict(contents: &str, key: InputKey) -> Result<Self, ParseError> {
        let inner = action::Action::parse(contents)?;

        Ok(Self {
            key,
            inner,
            parse_error: None,
        })
    }

    pub fn composite_steps(&self) -> impl Iterator<Item = CompositeStep<'_>> {
        self.inner
            .steps()
            .iter()
            .map(|inner| CompositeStep {
                inner,
                parent: self,
            })
    }

    /// Every action the composite steps depend on, in document order,
    /// alongside the route of its `uses:` clause.
    pub fn dependencies(&self) -> Vec<(&Uses, Route)> {
        self.inner
            .steps()
            .iter()
            .filter_map(|step| step.uses().map(|uses| (uses, step.route.with_key("uses"))))
            .filter(|(uses, _)| !matches!(uses, Uses::Docker(_)))
            .collect()
    }
}

/// A step within a composite action.
#[derive(Clone, Copy)]
pub struct CompositeStep<'doc> {
    inner: &'doc step::Step,
    pub parent: &'doc Action,
}

impl Deref for CompositeStep<'_> {
    type Target = step::Step;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl AsDocument for CompositeStep<'_> {
    fn as_document(&self) -> &Document {
        self.parent.as_document()
    }

    fn input_key(&self) -> &InputKey {
        &self.parent.key
    }
}

impl StepCommon for CompositeStep<'_> {
    fn step(&self) -> &step::Step {
        self.inner
    }

    fn is_self_hosted(&self) -> bool {
        false
    }

    fn has_trigger(&self, _event: &str) -> bool {
        false
    }

    fn env_scopes(&self) -> Vec<&Env> {
        vec![&self.inner.env]
    }
}
