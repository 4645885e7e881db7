//! Mapping model routes back to concrete source locations.
//!
//! Models are extracted from a fully resolved YAML value, which loses all
//! positional information. A [`Document`] keeps a tree-sitter concrete
//! syntax tree of the same source so that a [`Route`] (a path of mapping
//! keys and sequence indices) can be turned back into a line and snippet.
//!
//! Lookups are best-effort: if a route can't be followed all the way
//! (e.g. because it passes through an alias, or the source has syntax
//! errors), the deepest node that *was* reached is reported instead.

use std::fmt::Display;

use line_index::{LineIndex, TextSize};
use tree_sitter::{Language, Node, Parser, Tree};

/// A single step in a [`Route`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    Key(String),
    Index(usize),
}

impl From<&str> for Component {
    fn from(value: &str) -> Self {
        Self::Key(value.into())
    }
}

impl From<String> for Component {
    fn from(value: String) -> Self {
        Self::Key(value)
    }
}

impl From<&String> for Component {
    fn from(value: &String) -> Self {
        Self::Key(value.clone())
    }
}

impl From<usize> for Component {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

/// A path from the top of a document to one of its features.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Route {
    components: Vec<Component>,
}

impl Route {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Returns a new route extended by one component.
    pub fn with_key(&self, component: impl Into<Component>) -> Self {
        let mut components = self.components.clone();
        components.push(component.into());
        Self { components }
    }

    /// Returns a new route extended by each of the given components.
    pub fn with_keys<C: Into<Component>>(&self, keys: impl IntoIterator<Item = C>) -> Self {
        let mut components = self.components.clone();
        components.extend(keys.into_iter().map(Into::into));
        Self { components }
    }
}

impl From<Vec<Component>> for Route {
    fn from(components: Vec<Component>) -> Self {
        Self { components }
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, component) in self.components.iter().enumerate() {
            match component {
                Component::Key(key) if idx == 0 => write!(f, "{key}")?,
                Component::Key(key) => write!(f, ".{key}")?,
                Component::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Builds a [`Route`] from a list of keys and indices.
///
/// ```
/// use actions_models::route;
///
/// let route = route!["jobs", "build", "steps", 0];
/// assert_eq!(route.to_string(), "jobs.build.steps[0]");
/// ```
#[macro_export]
macro_rules! route {
    () => {
        $crate::document::Route::root()
    };
    ($($key:expr),+ $(,)?) => {
        $crate::document::Route::from(
            vec![$($crate::document::Component::from($key)),+]
        )
    };
}

/// A concrete span within a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    /// Byte offset of the span's start.
    pub start: usize,
    /// Byte offset of the span's end (exclusive).
    pub end: usize,
    /// 1-based line of the span's start.
    pub line: usize,
    /// 1-based byte column of the span's start.
    pub column: usize,
}

/// YAML source plus a concrete syntax tree for location lookups.
#[derive(Clone, Debug)]
pub struct Document {
    source: String,
    tree: Option<Tree>,
    line_index: LineIndex,
}

const MAX_SNIPPET_LEN: usize = 160;

impl Document {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let tree = Self::parse_tree(&source);
        let line_index = LineIndex::new(&source);

        Self {
            source,
            tree,
            line_index,
        }
    }

    fn parse_tree(source: &str) -> Option<Tree> {
        let mut parser = Parser::new();
        let language: Language = tree_sitter_yaml::LANGUAGE.into();
        if let Err(e) = parser.set_language(&language) {
            tracing::warn!("YAML grammar unavailable, locations will be coarse: {e}");
            return None;
        }

        parser.parse(source, None)
    }

    /// The original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the concrete syntax tree contains error nodes.
    pub fn has_syntax_errors(&self) -> bool {
        self.tree
            .as_ref()
            .is_none_or(|tree| tree.root_node().has_error())
    }

    /// Locates the feature at `route`, falling back to the deepest
    /// feature along the route that exists.
    ///
    /// For routes ending in a mapping key, the span starts at the key
    /// rather than at its value.
    pub fn locate(&self, route: &Route) -> Option<Span> {
        self.query(route).map(|(span, _)| span)
    }

    /// Like [`Document::locate`], but returns `None` unless the entire
    /// route exists.
    pub fn locate_exact(&self, route: &Route) -> Option<Span> {
        match self.query(route) {
            Some((span, true)) => Some(span),
            _ => None,
        }
    }

    fn query(&self, route: &Route) -> Option<(Span, bool)> {
        let tree = self.tree.as_ref()?;
        let mut focus = self.top_object(tree)?;
        let mut last_key = false;
        let mut complete = true;

        for component in route.components() {
            match self.descend(&focus, component) {
                Some(next) => {
                    focus = next;
                    last_key = matches!(component, Component::Key(_));
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }

        // Widen a value node to its `key: value` pair.
        if last_key
            && !Self::is_pair(&focus)
            && let Some(parent) = focus.parent()
            && Self::is_pair(&parent)
        {
            focus = parent;
        }

        Some((self.span(focus.start_byte(), focus.end_byte()), complete))
    }

    /// Builds a [`Span`] from a byte range.
    pub fn span(&self, start: usize, end: usize) -> Span {
        let start = start.min(self.source.len());
        let end = end.clamp(start, self.source.len());
        let offset = TextSize::new(u32::try_from(start).unwrap_or(u32::MAX));
        let point = self.line_index.line_col(offset);

        Span {
            start,
            end,
            line: point.line as usize + 1,
            column: point.col as usize + 1,
        }
    }

    /// Finds `needle` inside `within`, returning its span.
    pub fn find_within(&self, within: &Span, needle: &str) -> Option<Span> {
        if needle.is_empty() {
            return None;
        }
        let haystack = self.source.get(within.start..within.end)?;
        let offset = haystack.find(needle)?;
        let start = within.start + offset;
        Some(self.span(start, start + needle.len()))
    }

    /// Returns the text of the given 1-based line, without its line ending.
    pub fn line_text(&self, line: usize) -> Option<&str> {
        let line = u32::try_from(line.checked_sub(1)?).ok()?;
        let range = self.line_index.line(line)?;
        Some(self.source[range].trim_end_matches(['\r', '\n']))
    }

    /// A single-line, trimmed excerpt of the line a span starts on.
    pub fn snippet(&self, span: &Span) -> String {
        let line = self.line_text(span.line).unwrap_or_default().trim();

        match line.char_indices().nth(MAX_SNIPPET_LEN) {
            Some((cut, _)) => format!("{}...", &line[..cut]),
            None => line.to_string(),
        }
    }

    fn top_object<'t>(&self, tree: &'t Tree) -> Option<Node<'t>> {
        let stream = tree.root_node();
        let mut cursor = stream.walk();
        let document = stream
            .named_children(&mut cursor)
            .find(|c| c.kind() == "document")?;

        let mut cursor = document.walk();
        document
            .named_children(&mut cursor)
            .find(|c| Self::is_block_or_flow_node(c))
    }

    fn descend<'t>(&self, node: &Node<'t>, component: &Component) -> Option<Node<'t>> {
        // `node` is a block_node/flow_node; its payload is the first child
        // that isn't an anchor, tag, or comment.
        let child = {
            let mut cursor = node.walk();
            node.named_children(&mut cursor)
                .find(|n| !matches!(n.kind(), "anchor" | "tag" | "comment"))?
        };

        match (child.kind(), component) {
            ("block_mapping" | "flow_mapping", Component::Key(key)) => {
                self.descend_mapping(&child, key)
            }
            ("block_sequence" | "flow_sequence", Component::Index(idx)) => {
                self.descend_sequence(&child, *idx)
            }
            _ => None,
        }
    }

    fn descend_mapping<'t>(&self, node: &Node<'t>, expected: &str) -> Option<Node<'t>> {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let key = if Self::is_pair(&child) {
                match child.child_by_field_name("key") {
                    Some(key) => key,
                    None => continue,
                }
            } else if child.kind() == "flow_node" {
                // `{ foo }` has a bare flow_node rather than a pair.
                child
            } else {
                continue;
            };

            if self.scalar_text(&key) == Some(expected) {
                // A key without a value is terminal; report the pair itself.
                return Some(child.child_by_field_name("value").unwrap_or(child));
            }
        }

        None
    }

    fn descend_sequence<'t>(&self, node: &Node<'t>, idx: usize) -> Option<Node<'t>> {
        let mut cursor = node.walk();
        let item = node
            .named_children(&mut cursor)
            .filter(|c| matches!(c.kind(), "block_sequence_item" | "flow_node" | "flow_pair"))
            .nth(idx)?;

        match item.kind() {
            "block_sequence_item" => {
                let mut cursor = item.walk();
                item.named_children(&mut cursor)
                    .find(|c| Self::is_block_or_flow_node(c))
            }
            "flow_pair" => Some(item.child_by_field_name("value").unwrap_or(item)),
            _ => Some(item),
        }
    }

    /// The unquoted text of a key node.
    fn scalar_text(&self, key: &Node<'_>) -> Option<&str> {
        let mut cursor = key.walk();
        let scalar = key
            .named_children(&mut cursor)
            .find(|n| n.kind() != "anchor" && n.kind() != "tag")
            .unwrap_or(*key);

        let text = scalar.utf8_text(self.source.as_bytes()).ok()?;
        match scalar.kind() {
            "single_quote_scalar" | "double_quote_scalar" if text.len() >= 2 => {
                Some(&text[1..text.len() - 1])
            }
            _ => Some(text.trim()),
        }
    }

    fn is_pair(node: &Node<'_>) -> bool {
        matches!(node.kind(), "block_mapping_pair" | "flow_pair")
    }

    fn is_block_or_flow_node(node: &Node<'_>) -> bool {
        matches!(node.kind(), "block_node" | "flow_node")
    }
}

#[cfg(test)]
mod tests {
    use super::{Document, Route};

    const WORKFLOW: &str = r#"# leading comment
name: ci
on: [push]
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: test
        run: |
          echo hello
    "quoted": { a: 1, b: [x, y] }
"#;

    #[test]
    fn test_locate_keys_and_indices() {
        let doc = Document::new(WORKFLOW);

        let span = doc.locate(&route!["name"]).unwrap();
        assert_eq!(span.line, 2);
        assert_eq!(doc.snippet(&span), "name: ci");

        let span = doc.locate(&route!["jobs", "build", "steps", 0]).unwrap();
        assert_eq!(span.line, 8);
        assert_eq!(doc.snippet(&span), "- uses: actions/checkout@v4");

        let span = doc.locate(&route!["jobs", "build", "steps", 1, "run"]).unwrap();
        assert_eq!(span.line, 10);

        let span = doc
            .locate(&route!["jobs", "build", "quoted", "b", 1])
            .unwrap();
        assert_eq!(span.line, 12);
        assert_eq!(&doc.source()[span.start..span.end], "y");
    }

    #[test]
    fn test_locate_falls_back_to_deepest_match() {
        let doc = Document::new(WORKFLOW);

        assert!(doc.locate_exact(&route!["jobs", "missing"]).is_none());
        // The deepest match is `jobs`, reported as its `key: value` pair.
        let span = doc.locate(&route!["jobs", "missing"]).unwrap();
        assert_eq!(span.line, 4);

        let span = doc.locate(&Route::root()).unwrap();
        assert_eq!(span.line, 2);
    }

    #[test]
    fn test_find_within() {
        let doc = Document::new(WORKFLOW);
        let step = doc.locate(&route!["jobs", "build", "steps", 1]).unwrap();
        let span = doc.find_within(&step, "echo hello").unwrap();
        assert_eq!(span.line, 11);
        assert_eq!(doc.snippet(&span), "echo hello");
    }

    #[test]
    fn test_garbage_does_not_panic() {
        for garbage in ["", ":", "[[[", "\u{0}\u{1}", "- - - :", "{a: [}"] {
            let doc = Document::new(garbage);
            let _ = doc.locate(&route!["jobs", "x", "steps", 3]);
            let _ = doc.has_syntax_errors();
        }
    }
}
