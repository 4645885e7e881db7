//! Audit-facing wrappers around the models in [`actions_models`].
//!
//! The wrappers tie a parsed model to the [`InputKey`] it was loaded
//! under, and give audits contextual views (a job knows its workflow, a
//! step knows its job) without copying the underlying model.

use actions_models::{ActionReference, Document, RefKind, Uses, common::Env, step};

use crate::registry::input::InputKey;

pub mod action;
pub mod workflow;

/// Anything that findings can be located within.
pub trait AsDocument {
    fn as_document(&self) -> &Document;

    fn input_key(&self) -> &InputKey;
}

/// Common interfaces for workflow steps and composite action steps.
pub trait StepCommon: AsDocument {
    /// The underlying step model.
    fn step(&self) -> &step::Step;

    /// Whether this step is known to run on a self-hosted runner.
    ///
    /// Composite action steps run wherever their caller does, so this is
    /// always `false` for them.
    fn is_self_hosted(&self) -> bool;

    /// Whether the enclosing workflow is triggered by `event`.
    fn has_trigger(&self, event: &str) -> bool;

    /// The `env:` blocks in scope for this step, innermost first.
    fn env_scopes(&self) -> Vec<&Env>;
}

/// Helpers for matching repository references against well-known actions.
pub(crate) trait ReferenceExt {
    /// Whether this reference names `owner/repo[/subdirectory]`, at any ref.
    ///
    /// A pattern without a subdirectory matches only references without
    /// one.
    fn is_action(&self, pattern: &str) -> bool;

    /// The major version of a version-like tag, e.g. `3` for `v3.1.0`.
    fn major_version(&self) -> Option<u64>;
}

impl ReferenceExt for ActionReference {
    fn is_action(&self, pattern: &str) -> bool {
        let mut parts = pattern.splitn(3, '/');
        parts.next() == Some(self.owner())
            && parts.next() == Some(self.repo())
            && parts.next() == self.subdirectory()
    }

    fn major_version(&self) -> Option<u64> {
        if self.ref_kind() != RefKind::Tag {
            return None;
        }
        let git_ref = self.git_ref()?;
        let version = git_ref.strip_prefix('v').unwrap_or(git_ref);
        version.split('.').next()?.parse().ok()
    }
}

/// The repository reference in a `uses:` clause, if it is one.
pub(crate) fn repository_reference(uses: Option<&Uses>) -> Option<&ActionReference> {
    match uses {
        Some(Uses::Repository(reference)) => Some(reference),
        _ => None,
    }
}
