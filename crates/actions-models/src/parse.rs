//! Tolerant extraction helpers over untyped YAML values.
//!
//! Every helper here takes the value it's extracting from plus the
//! route it lives at, and records a [`Diagnostic`] rather than failing
//! when the value has an unexpected shape.

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};

use crate::{
    common::{BasePermission, Diagnostic, Env, EnvValue, ParseError, Permission, PermissionsSpec},
    document::{Document, Route},
};

/// Loads `source` as a single YAML mapping, with merge keys applied.
pub(crate) fn load(source: &str) -> Result<Mapping, ParseError> {
    let mut value: Value = serde_yaml::from_str(source).map_err(|e| ParseError::Syntax {
        message: e.to_string(),
        line: e.location().map(|l| l.line()),
    })?;

    value.apply_merge().map_err(|e| ParseError::Syntax {
        message: e.to_string(),
        line: e.location().map(|l| l.line()),
    })?;

    match untag(&value) {
        Value::Mapping(mapping) => Ok(mapping.clone()),
        other => Err(ParseError::NotAMapping {
            found: type_name(other),
        }),
    }
}

/// Strips any YAML tag from `value`.
pub(crate) fn untag(value: &Value) -> &Value {
    match value {
        Value::Tagged(tagged) => untag(&tagged.value),
        other => other,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match untag(value) {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Renders a scalar as a string; `None` for null and collections.
pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match untag(value) {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Iterates a mapping's entries that have scalar keys.
pub(crate) fn entries(mapping: &Mapping) -> impl Iterator<Item = (String, &Value)> {
    mapping
        .iter()
        .filter_map(|(k, v)| scalar_string(k).map(|k| (k, v)))
}

/// Accumulates diagnostics while a model is being extracted.
#[derive(Default)]
pub(crate) struct Extractor<'doc> {
    pub(crate) diagnostics: Vec<Diagnostic>,
    document: Option<&'doc Document>,
}

impl<'doc> Extractor<'doc> {
    pub(crate) fn new(document: &'doc Document) -> Self {
        Self {
            diagnostics: vec![],
            document: Some(document),
        }
    }

    /// The 1-based line `route` starts on, or 1 if it can't be located.
    pub(crate) fn line(&self, route: &Route) -> usize {
        self.document
            .and_then(|doc| doc.locate(route))
            .map_or(1, |span| span.line)
    }

    pub(crate) fn diag(&mut self, route: &Route, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            route: route.clone(),
            message: message.into(),
        });
    }

    fn mismatch(&mut self, route: &Route, expected: &str, found: &Value) {
        self.diag(
            route,
            format!("expected {expected}, found {}", type_name(found)),
        );
    }

    /// An optional scalar, stringified.
    pub(crate) fn string(&mut self, value: Option<&Value>, route: &Route) -> Option<String> {
        let value = value?;
        match untag(value) {
            Value::Null => None,
            other => match scalar_string(other) {
                Some(s) => Some(s),
                None => {
                    self.mismatch(route, "a scalar", other);
                    None
                }
            },
        }
    }

    /// A scalar or a sequence of scalars, as a list of strings.
    pub(crate) fn strings(&mut self, value: Option<&Value>, route: &Route) -> Vec<String> {
        let Some(value) = value else {
            return vec![];
        };
        match untag(value) {
            Value::Null => vec![],
            Value::Sequence(items) => items
                .iter()
                .enumerate()
                .filter_map(|(idx, item)| {
                    let s = scalar_string(item);
                    if s.is_none() {
                        self.mismatch(&route.with_key(idx), "a scalar", item);
                    }
                    s
                })
                .collect(),
            other => match scalar_string(other) {
                Some(s) => vec![s],
                None => {
                    self.mismatch(route, "a scalar or a list", other);
                    vec![]
                }
            },
        }
    }

    /// An optional mapping. Null is treated as absent.
    pub(crate) fn mapping<'v>(
        &mut self,
        value: Option<&'v Value>,
        route: &Route,
    ) -> Option<&'v Mapping> {
        let value = value?;
        match untag(value) {
            Value::Null => None,
            Value::Mapping(mapping) => Some(mapping),
            other => {
                self.mismatch(route, "a mapping", other);
                None
            }
        }
    }

    /// An optional sequence. Null is treated as absent.
    pub(crate) fn sequence<'v>(
        &mut self,
        value: Option<&'v Value>,
        route: &Route,
    ) -> Option<&'v [Value]> {
        let value = value?;
        match untag(value) {
            Value::Null => None,
            Value::Sequence(items) => Some(items),
            other => {
                self.mismatch(route, "a sequence", other);
                None
            }
        }
    }

    /// A boolean-ish flag. Expressions are kept as "maybe", i.e. `true`.
    pub(crate) fn flag(&mut self, value: Option<&Value>, route: &Route) -> bool {
        let Some(value) = value else {
            return false;
        };
        match untag(value) {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::String(s) if s.trim().eq_ignore_ascii_case("true") => true,
            Value::String(s) if s.trim().eq_ignore_ascii_case("false") => false,
            Value::String(s) if crate::common::is_expression(s) => true,
            other => {
                self.mismatch(route, "a boolean", other);
                false
            }
        }
    }

    /// An `env:` (or `with:`) block. A whole-block expression is valid
    /// but opaque, and yields an empty map.
    pub(crate) fn env(&mut self, value: Option<&Value>, route: &Route) -> Env {
        let mut env = Env::new();
        let Some(value) = value else {
            return env;
        };

        let mapping = match untag(value) {
            Value::Null => return env,
            Value::String(s) if crate::common::is_expression(s) => return env,
            Value::Mapping(mapping) => mapping,
            other => {
                self.mismatch(route, "a mapping", other);
                return env;
            }
        };

        for (key, value) in entries(mapping) {
            let value = match untag(value) {
                Value::Null => EnvValue::String(String::new()),
                Value::String(s) => EnvValue::String(s.clone()),
                Value::Bool(b) => EnvValue::Boolean(*b),
                Value::Number(n) => match n.as_f64() {
                    Some(n) => EnvValue::Number(n),
                    None => EnvValue::String(n.to_string()),
                },
                other => {
                    self.mismatch(&route.with_key(&key), "a scalar", other);
                    continue;
                }
            };
            env.insert(key, value);
        }

        env
    }

    pub(crate) fn permissions(&mut self, value: Option<&Value>, route: &Route) -> PermissionsSpec {
        let Some(value) = value else {
            return PermissionsSpec::Default;
        };

        match untag(value) {
            Value::Null => PermissionsSpec::Scoped(IndexMap::new()),
            Value::String(base) => PermissionsSpec::Simple(match base.trim() {
                "read-all" => BasePermission::ReadAll,
                "write-all" => BasePermission::WriteAll,
                other => {
                    self.diag(route, format!("unknown permission set `{other}`"));
                    BasePermission::Other(other.into())
                }
            }),
            Value::Mapping(scopes) => {
                let mut permissions = IndexMap::new();
                for (scope, level) in entries(scopes) {
                    let level = match scalar_string(level).as_deref().map(str::trim) {
                        Some("read") => Permission::Read,
                        Some("write") => Permission::Write,
                        Some("none") => Permission::None,
                        Some(other) => {
                            self.diag(
                                &route.with_key(&scope),
                                format!("unknown permission level `{other}`"),
                            );
                            Permission::Other(other.into())
                        }
                        None => {
                            self.mismatch(&route.with_key(&scope), "a permission level", level);
                            continue;
                        }
                    };
                    permissions.insert(scope, level);
                }
                PermissionsSpec::Scoped(permissions)
            }
            other => {
                self.mismatch(route, "a permission set or mapping", other);
                PermissionsSpec::Default
            }
        }
    }
}
