//! Shared models for workflows and action definitions.

use std::fmt::Display;

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use crate::document::Route;

/// A fatal parse failure: the input isn't a YAML mapping at all.
///
/// Anything short of this degrades to a partial model with
/// [`Diagnostic`]s instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The input isn't syntactically valid YAML.
    #[error("invalid YAML syntax: {message}")]
    Syntax {
        message: String,
        /// The 1-based line the YAML parser stopped at, if known.
        line: Option<usize>,
    },
    /// The input is valid YAML, but its top level isn't a mapping.
    #[error("expected a mapping at the top level, found {found}")]
    NotAMapping { found: &'static str },
}

impl ParseError {
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::Syntax { line, .. } => *line,
            ParseError::NotAMapping { .. } => None,
        }
    }
}

/// A non-fatal problem encountered while extracting a model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// Where in the document the problem is.
    pub route: Route,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.route.is_root() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.route, self.message)
        }
    }
}

/// `permissions: read-all` / `permissions: write-all`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum BasePermission {
    ReadAll,
    WriteAll,
    Other(String),
}

/// A single scope's permission level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Permission {
    Read,
    Write,
    None,
    Other(String),
}

/// A `permissions:` block, at either the workflow or job level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum PermissionsSpec {
    /// No `permissions:` given; the token's defaults apply.
    #[default]
    Default,
    /// `permissions: read-all` or similar.
    Simple(BasePermission),
    /// `permissions: { scope: level, ... }`.
    Scoped(IndexMap<String, Permission>),
}

impl PermissionsSpec {
    pub fn is_default(&self) -> bool {
        matches!(self, PermissionsSpec::Default)
    }

    pub fn is_write_all(&self) -> bool {
        matches!(self, PermissionsSpec::Simple(BasePermission::WriteAll))
    }

    /// Returns the scopes explicitly granted `write`.
    pub fn write_scopes(&self) -> Vec<&str> {
        match self {
            PermissionsSpec::Scoped(scopes) => scopes
                .iter()
                .filter(|(_, perm)| matches!(perm, Permission::Write))
                .map(|(scope, _)| scope.as_str())
                .collect(),
            _ => vec![],
        }
    }

    /// Whether this block grants write access to anything.
    pub fn grants_write(&self) -> bool {
        self.is_write_all() || !self.write_scopes().is_empty()
    }
}

/// A scalar value in an `env:` or `with:` mapping.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EnvValue {
    String(String),
    Number(f64),
    Boolean(bool),
}

impl EnvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EnvValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value is "true"-like, as GitHub interprets
    /// boolean-ish inputs.
    pub fn is_truthy(&self) -> bool {
        match self {
            EnvValue::Boolean(b) => *b,
            EnvValue::String(s) => s.trim().eq_ignore_ascii_case("true"),
            EnvValue::Number(n) => *n != 0.0,
        }
    }
}

impl Display for EnvValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvValue::String(s) => write!(f, "{s}"),
            EnvValue::Number(n) => write!(f, "{n}"),
            EnvValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// An `env:` or `with:` block.
pub type Env = IndexMap<String, EnvValue>;

/// Returns whether `value` is entirely a single `${{ ... }}` expression.
pub fn is_expression(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("${{") && value.ends_with("}}")
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::{BasePermission, EnvValue, Permission, PermissionsSpec, is_expression};

    #[test]
    fn test_permissions_spec_writes() {
        assert!(PermissionsSpec::Simple(BasePermission::WriteAll).grants_write());
        assert!(!PermissionsSpec::Simple(BasePermission::ReadAll).grants_write());
        assert!(!PermissionsSpec::Default.grants_write());

        let scoped = PermissionsSpec::Scoped(IndexMap::from([
            ("contents".to_string(), Permission::Read),
            ("packages".to_string(), Permission::Write),
        ]));
        assert!(scoped.grants_write());
        assert_eq!(scoped.write_scopes(), ["packages"]);
    }

    #[test]
    fn test_env_value_truthy() {
        assert!(EnvValue::Boolean(true).is_truthy());
        assert!(EnvValue::String(" TRUE ".into()).is_truthy());
        assert!(!EnvValue::String("false".into()).is_truthy());
        assert!(!EnvValue::Number(0.0).is_truthy());
    }

    #[test]
    fn test_is_expression() {
        assert!(is_expression("${{ matrix.os }}"));
        assert!(is_expression("  ${{ inputs.x }} "));
        assert!(!is_expression("ubuntu-${{ matrix.v }}-x"));
    }
}
