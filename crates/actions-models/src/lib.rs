//! Tolerant data models for GitHub Actions workflows and action
//! definitions.
//!
//! Parsing never fails on shape problems: unexpected types, missing
//! fields and malformed `uses:` clauses are recorded as
//! [`Diagnostic`]s on a best-effort partial model. Only input that isn't
//! a YAML mapping at all produces a [`ParseError`].

pub mod action;
pub mod common;
pub mod document;
mod parse;
pub mod step;
pub mod uses;
pub mod workflow;

pub use action::Action;
pub use common::{Diagnostic, ParseError};
pub use document::Document;
pub use uses::{ActionReference, RefKind, Uses};
pub use workflow::Workflow;
