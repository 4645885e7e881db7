//! Findings, and the builder audits use to produce them.

use std::fmt::Display;

use actions_models::document::{Route, Span};
use serde::{Deserialize, Serialize};

use crate::models::AsDocument;

#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialOrd, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, most severe first.
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type of finding, along with the severity it's emitted at by default.
///
/// Every audit declares the kinds it can produce up front.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FindingKind {
    pub ident: &'static str,
    pub severity: Severity,
}

impl FindingKind {
    pub const fn new(ident: &'static str, severity: Severity) -> Self {
        Self { ident, severity }
    }
}

/// Where a finding was observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Evidence {
    pub path: String,
    /// 1-based.
    pub line: usize,
    pub snippet: String,
}

impl Evidence {
    /// Evidence for the feature at `route`, or the whole input if it
    /// can't be located.
    pub(crate) fn at(input: &impl AsDocument, route: &Route) -> Self {
        let document = input.as_document();
        let (line, snippet) = match document.locate(route) {
            Some(span) => (span.line, document.snippet(&span)),
            None => (1, String::new()),
        };

        Self {
            path: input.input_key().presentation_path().into(),
            line,
            snippet,
        }
    }

    /// Evidence for an entire line of `input`.
    pub(crate) fn at_line(input: &impl AsDocument, line: usize) -> Self {
        let snippet = input
            .as_document()
            .line_text(line)
            .map(|text| text.trim().to_string())
            .unwrap_or_default();

        Self {
            path: input.input_key().presentation_path().into(),
            line,
            snippet,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub severity: Severity,
    pub message: String,
    pub evidence: Evidence,
}

impl Finding {
    /// Builds a finding that doesn't originate from an audit, e.g. one
    /// produced while resolving dependencies.
    pub fn new(kind: FindingKind, message: impl Into<String>, evidence: Evidence) -> Self {
        Self {
            kind: kind.ident,
            severity: kind.severity,
            message: message.into(),
            evidence,
        }
    }
}

enum Locus {
    Route { route: Route, needle: Option<String> },
    Offset(usize),
}

pub(crate) struct FindingBuilder {
    kind: FindingKind,
    severity: Severity,
    message: Option<String>,
    locus: Locus,
}

impl FindingBuilder {
    pub(crate) fn new(kind: FindingKind) -> Self {
        Self {
            kind,
            severity: kind.severity,
            message: None,
            locus: Locus::Route {
                route: Route::root(),
                needle: None,
            },
        }
    }

    pub(crate) fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub(crate) fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Anchors the finding at the given route.
    pub(crate) fn at(mut self, route: Route) -> Self {
        self.locus = Locus::Route {
            route,
            needle: None,
        };
        self
    }

    /// Narrows the finding's location to the first occurrence of `needle`
    /// within the feature at the anchored route.
    pub(crate) fn within(mut self, needle: impl Into<String>) -> Self {
        if let Locus::Route { needle: slot, .. } = &mut self.locus {
            *slot = Some(needle.into());
        }
        self
    }

    /// Anchors the finding at a byte offset into the raw source.
    pub(crate) fn at_offset(mut self, offset: usize) -> Self {
        self.locus = Locus::Offset(offset);
        self
    }

    pub(crate) fn build(self, input: &impl AsDocument) -> Finding {
        let document = input.as_document();

        let span: Option<Span> = match &self.locus {
            Locus::Route { route, needle } => document.locate(route).map(|span| {
                needle
                    .as_deref()
                    .and_then(|needle| document.find_within(&span, needle))
                    .unwrap_or(span)
            }),
            Locus::Offset(offset) => Some(document.span(*offset, *offset)),
        };

        let (line, snippet) = match &span {
            Some(span) => (span.line, document.snippet(span)),
            None => (1, String::new()),
        };

        Finding {
            kind: self.kind.ident,
            severity: self.severity,
            message: self.message.unwrap_or_else(|| self.kind.ident.replace('_', " ")),
            evidence: Evidence {
                path: input.input_key().presentation_path().into(),
                line,
                snippet,
            },
        }
    }
}
