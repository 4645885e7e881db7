//! The dependency graph: repositories, the workflows in them, and the
//! actions and reusable workflows they transitively use.
//!
//! [`Graph`] is also the analysis result, serialized as-is.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_json::Value;

use crate::finding::{Finding, Severity};

pub mod builder;

pub use builder::{GraphBuilder, Origin, Root};

/// How many `uses:` hops from a root are followed by default.
pub const DEFAULT_DEPTH: usize = 5;

/// The id of the single node standing in for everything past the depth
/// limit.
pub const DEPTH_EXCEEDED: &str = "<depth-exceeded>";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Repository,
    Workflow,
    Action,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Repository => "repository",
            NodeKind::Workflow => "workflow",
            NodeKind::Action => "action",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    /// The most severe finding's severity, if there are any findings.
    pub severity: Option<Severity>,
    pub issue_count: usize,
    pub metadata: IndexMap<String, Value>,
    pub findings: Vec<Finding>,
}

impl GraphNode {
    pub(crate) fn new(id: impl Into<String>, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            severity: None,
            issue_count: 0,
            metadata: IndexMap::new(),
            findings: vec![],
        }
    }

    pub(crate) fn placeholder() -> Self {
        Self::new(DEPTH_EXCEEDED, NodeKind::Action, "depth limit exceeded")
            .with_metadata("placeholder", "depth-exceeded")
    }

    pub(crate) fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The resolution status, if this node isn't fully resolved.
    pub fn status(&self) -> Option<&str> {
        self.metadata.get("status").and_then(Value::as_str)
    }

    pub fn is_placeholder(&self) -> bool {
        self.id == DEPTH_EXCEEDED
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub total_issues: usize,
    pub severity_counts: SeverityCounts,
}

#[derive(Clone, Debug, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub statistics: Statistics,
}

impl Graph {
    /// Finalizes assembled nodes and edges, deriving per-node severity
    /// and the overall statistics.
    pub(crate) fn new(nodes: IndexMap<String, GraphNode>, edges: IndexSet<GraphEdge>) -> Self {
        let mut statistics = Statistics {
            total_nodes: nodes.len(),
            total_edges: edges.len(),
            ..Default::default()
        };

        let nodes = nodes
            .into_values()
            .map(|mut node| {
                node.issue_count = node.findings.len();
                node.severity = node.findings.iter().map(|f| f.severity).max();
                for finding in &node.findings {
                    statistics.severity_counts.add(finding.severity);
                }
                statistics.total_issues += node.issue_count;
                node
            })
            .collect();

        Self {
            nodes,
            edges: edges.into_iter().collect(),
            statistics,
        }
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> {
        self.edges.iter().filter(move |edge| edge.source == id)
    }

    pub fn edges_to<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> {
        self.edges.iter().filter(move |edge| edge.target == id)
    }

    /// Every finding in the graph, in node order.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.nodes.iter().flat_map(|node| &node.findings)
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(move |node| node.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use indexmap::{IndexMap, IndexSet};

    use super::{Graph, GraphEdge, GraphNode, NodeKind};
    use crate::finding::{Evidence, Finding, FindingKind, Severity};

    fn finding(severity: Severity) -> Finding {
        Finding::new(
            FindingKind::new("test_finding", severity),
            "test",
            Evidence {
                path: "action.yml".into(),
                line: 1,
                snippet: String::new(),
            },
        )
    }

    #[test]
    fn test_statistics() {
        let mut a = GraphNode::new("a", NodeKind::Workflow, "a");
        a.findings = vec![finding(Severity::Low), finding(Severity::Critical)];
        let mut b = GraphNode::new("b", NodeKind::Action, "b");
        b.findings = vec![finding(Severity::Medium)];
        let c = GraphNode::new("c", NodeKind::Action, "c");

        let nodes = [a, b, c]
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect::<IndexMap<_, _>>();
        let edges = [("a", "b"), ("a", "c"), ("a", "b")]
            .into_iter()
            .map(|(source, target)| GraphEdge {
                source: source.into(),
                target: target.into(),
            })
            .collect::<IndexSet<_>>();

        let graph = Graph::new(nodes, edges);

        assert_eq!(graph.statistics.total_nodes, 3);
        assert_eq!(graph.statistics.total_edges, 2);
        assert_eq!(graph.statistics.total_issues, 3);
        assert_eq!(graph.statistics.severity_counts.critical, 1);
        assert_eq!(graph.statistics.severity_counts.high, 0);

        assert_eq!(graph.node("a").unwrap().severity, Some(Severity::Critical));
        assert_eq!(graph.node("a").unwrap().issue_count, 2);
        assert_eq!(graph.node("c").unwrap().severity, None);
        assert_eq!(graph.edges_from("a").count(), 2);
        assert_eq!(graph.edges_to("b").count(), 1);
    }

    #[test]
    fn test_serialization() {
        let graph = Graph::new(
            [(
                "<depth-exceeded>".to_string(),
                GraphNode::placeholder(),
            )]
            .into_iter()
            .collect(),
            IndexSet::new(),
        );

        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "nodes": [{
                    "id": "<depth-exceeded>",
                    "kind": "action",
                    "label": "depth limit exceeded",
                    "severity": null,
                    "issue_count": 0,
                    "metadata": {"placeholder": "depth-exceeded"},
                    "findings": [],
                }],
                "edges": [],
                "statistics": {
                    "total_nodes": 1,
                    "total_edges": 0,
                    "total_issues": 0,
                    "severity_counts": {"critical": 0, "high": 0, "medium": 0, "low": 0},
                },
            })
        );
    }
}
