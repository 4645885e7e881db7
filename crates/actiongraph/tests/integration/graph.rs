//! Dependency graph construction against in-memory repositories.

use std::{sync::Arc, time::Duration};

use actiongraph::{
    analysis::AnalysisTarget,
    fetch::{FetchError, MemoryFetcher, OfflineFetcher},
    graph::{DEPTH_EXCEEDED, NodeKind},
    registry::input::RepoSlug,
};
use actions_models::ActionReference;
use anyhow::Result;

use crate::common::{analyze, composite, input_under_test, summarize, workflow};

fn reference(uses: &str) -> ActionReference {
    ActionReference::parse(uses).unwrap()
}

fn slug(slug: &str) -> RepoSlug {
    slug.parse().unwrap()
}

#[tokio::test]
async fn depth_limit() -> Result<()> {
    // a0 -> a1 -> ... -> a19
    let mut fetcher = MemoryFetcher::new();
    for i in 0..20 {
        let uses = format!("octo/a{next}@v1", next = i + 1);
        let uses = if i < 19 { vec![uses.as_str()] } else { vec![] };
        fetcher = fetcher.with_action(
            &reference(&format!("octo/a{i}@v1")),
            composite(&format!("a{i}"), &uses),
        );
    }
    let fetcher = Arc::new(fetcher);

    let graph = analyze(
        fetcher.clone(),
        AnalysisTarget::RemoteAction(reference("octo/a0@v1")),
        None,
        None,
    )
    .await?;

    let ids = graph.nodes.iter().map(|n| n.id.as_str()).collect::<Vec<_>>();
    assert_eq!(
        ids,
        [
            "octo/a0@v1",
            "octo/a1@v1",
            "octo/a2@v1",
            "octo/a3@v1",
            "octo/a4@v1",
            "octo/a5@v1",
            DEPTH_EXCEEDED
        ]
    );

    let placeholder_edges = graph.edges_to(DEPTH_EXCEEDED).collect::<Vec<_>>();
    assert_eq!(placeholder_edges.len(), 1);
    assert_eq!(placeholder_edges[0].source, "octo/a5@v1");

    // Nothing past the limit is fetched.
    assert_eq!(fetcher.fetch_count(), 6);

    Ok(())
}

#[tokio::test]
async fn depth_override() -> Result<()> {
    let fetcher = Arc::new(
        MemoryFetcher::new()
            .with_action(&reference("octo/a@v1"), composite("a", &["octo/b@v1"]))
            .with_action(&reference("octo/b@v1"), composite("b", &["octo/c@v1"]))
            .with_action(&reference("octo/c@v1"), composite("c", &[])),
    );

    let graph = analyze(
        fetcher,
        AnalysisTarget::RemoteAction(reference("octo/a@v1")),
        Some(1),
        None,
    )
    .await?;

    insta::assert_snapshot!(
        graph.nodes.iter().map(|n| n.id.as_str()).collect::<Vec<_>>().join("\n"),
        @r"
    octo/a@v1
    octo/b@v1
    <depth-exceeded>
    "
    );

    Ok(())
}

#[tokio::test]
async fn cycle() -> Result<()> {
    let fetcher = Arc::new(
        MemoryFetcher::new()
            .with_action(&reference("octo/a@v1"), composite("a", &["octo/b@v1"]))
            .with_action(&reference("octo/b@v1"), composite("b", &["octo/a@v1"])),
    );

    let graph = analyze(
        fetcher.clone(),
        AnalysisTarget::RemoteAction(reference("octo/a@v1")),
        None,
        None,
    )
    .await?;

    assert_eq!(graph.statistics.total_nodes, 2);
    assert_eq!(graph.statistics.total_edges, 2);
    assert!(graph.node(DEPTH_EXCEEDED).is_none());
    assert_eq!(graph.edges_from("octo/b@v1").next().unwrap().target, "octo/a@v1");
    assert_eq!(fetcher.fetch_count(), 2);

    Ok(())
}

#[tokio::test]
async fn diamond() -> Result<()> {
    let app = slug("octo/app");
    let fetcher = Arc::new(
        MemoryFetcher::new()
            .with_workflow(&app, "ci.yml", workflow(&["octo/b@v1", "octo/c@v1"]))
            .with_action(&reference("octo/b@v1"), composite("b", &["octo/d@v1"]))
            .with_action(&reference("octo/c@v1"), composite("c", &["octo/d@v1"]))
            .with_action(&reference("octo/d@v1"), composite("d", &[])),
    );

    let graph = analyze(fetcher.clone(), AnalysisTarget::Repository(app), None, None).await?;

    insta::assert_snapshot!(
        graph
            .edges
            .iter()
            .map(|e| format!("{} -> {}", e.source, e.target))
            .collect::<Vec<_>>()
            .join("\n"),
        @r"
    octo/app -> octo/app:.github/workflows/ci.yml
    octo/app:.github/workflows/ci.yml -> octo/b@v1
    octo/app:.github/workflows/ci.yml -> octo/c@v1
    octo/b@v1 -> octo/d@v1
    octo/c@v1 -> octo/d@v1
    "
    );

    assert_eq!(graph.nodes_of_kind(NodeKind::Repository).count(), 1);
    assert_eq!(graph.nodes_of_kind(NodeKind::Workflow).count(), 1);
    assert_eq!(graph.nodes_of_kind(NodeKind::Action).count(), 3);
    assert_eq!(graph.edges_to("octo/d@v1").count(), 2);

    // One listing, plus b, c, and d exactly once each.
    assert_eq!(fetcher.fetch_count(), 4);

    Ok(())
}

#[tokio::test]
async fn missing_action() -> Result<()> {
    let app = slug("octo/app");
    let fetcher = Arc::new(
        MemoryFetcher::new()
            .with_workflow(
                &app,
                "ci.yml",
                workflow(&["octo/missing@v1", "octo/b@v1", "octo/missing@v1"]),
            )
            .with_action(&reference("octo/b@v1"), composite("b", &[])),
    );

    let graph = analyze(fetcher, AnalysisTarget::Repository(app), None, None).await?;

    let missing = graph.node("octo/missing@v1").unwrap();
    assert_eq!(missing.status(), Some("not_found"));
    assert!(missing.findings.is_empty());

    // The sibling still resolved.
    let sibling = graph.node("octo/b@v1").unwrap();
    assert_eq!(sibling.status(), None);
    assert_eq!(sibling.metadata["name"], "b");

    // Reported once on the referencing workflow, at the first reference.
    let workflow = graph.node("octo/app:.github/workflows/ci.yml").unwrap();
    let reported = workflow
        .findings
        .iter()
        .filter(|f| f.kind == "missing_action_repository")
        .collect::<Vec<_>>();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].severity.as_str(), "high");
    assert_eq!(reported[0].evidence.line, 8);
    assert_eq!(reported[0].evidence.path, ".github/workflows/ci.yml");

    Ok(())
}

#[tokio::test]
async fn resolution_failures() -> Result<()> {
    let fetcher = Arc::new(
        MemoryFetcher::new()
            .with_action(
                &reference("octo/root@v1"),
                composite(
                    "root",
                    &["octo/busy@v1", "octo/broken@v1", "octo/flaky@v1"],
                ),
            )
            .with_action(&reference("octo/broken@v1"), "- not\n- an action\n")
            .with_failure("octo/busy", FetchError::RateLimited { reset: Some(1700000000) })
            .with_failure("octo/flaky", FetchError::Transport("connection reset".into())),
    );

    let graph = analyze(
        fetcher,
        AnalysisTarget::RemoteAction(reference("octo/root@v1")),
        None,
        None,
    )
    .await?;

    let statuses = ["octo/busy@v1", "octo/broken@v1", "octo/flaky@v1"]
        .map(|id| graph.node(id).and_then(|n| n.status()));
    assert_eq!(
        statuses,
        [Some("rate_limited"), Some("malformed"), Some("error")]
    );

    let root = graph.node("octo/root@v1").unwrap();
    let failures = root
        .findings
        .iter()
        .map(|f| f.kind)
        .filter(|kind| {
            ["action_resolution_failed", "malformed_action", "missing_action_repository"]
                .contains(kind)
        })
        .collect::<Vec<_>>();
    assert_eq!(
        failures,
        ["action_resolution_failed", "malformed_action", "action_resolution_failed"]
    );

    Ok(())
}

#[tokio::test]
async fn reusable_workflow() -> Result<()> {
    let app = slug("octo/app");
    let shared = slug("octo/shared");
    let caller = r#"
on: push
permissions: {}
jobs:
  build:
    uses: octo/shared/.github/workflows/build.yml@v2
  local:
    uses: ./.github/workflows/lint.yml
"#;
    let called = r#"
name: build
on: workflow_call
permissions: {}
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: make
"#;

    let fetcher = Arc::new(
        MemoryFetcher::new()
            .with_workflow(&app, "ci.yml", caller)
            .with_workflow(&app, "lint.yml", called)
            .with_workflow(&shared, "build.yml", called),
    );

    let graph = analyze(fetcher, AnalysisTarget::Repository(app), None, None).await?;

    let build = graph.node("octo/shared:.github/workflows/build.yml@v2").unwrap();
    assert_eq!(build.kind, NodeKind::Workflow);
    assert_eq!(build.metadata["triggers"], serde_json::json!(["workflow_call"]));

    // Both workflows are roots; the local call reuses the root's node.
    assert_eq!(graph.nodes.iter().filter(|n| n.id.ends_with("lint.yml")).count(), 1);
    assert!(graph.edges.iter().any(|e| {
        e.source == "octo/app:.github/workflows/ci.yml"
            && e.target == "octo/app:.github/workflows/lint.yml"
    }));

    Ok(())
}

#[tokio::test]
async fn timeout_leaves_pending() -> Result<()> {
    let fetcher = MemoryFetcher::new()
        .with_action(&reference("octo/a@v1"), composite("a", &["octo/b@v1"]))
        .with_action(&reference("octo/b@v1"), composite("b", &[]))
        .with_latency(Duration::from_millis(300));

    let graph = analyze(
        Arc::new(fetcher),
        AnalysisTarget::RemoteAction(reference("octo/a@v1")),
        None,
        Some(Duration::from_millis(20)),
    )
    .await?;

    // The root was obtained before the clock started; its dependency
    // never finished.
    assert_eq!(graph.node("octo/a@v1").unwrap().status(), None);
    assert_eq!(graph.node("octo/b@v1").unwrap().status(), Some("pending"));
    assert_eq!(graph.statistics.total_edges, 1);

    Ok(())
}

#[tokio::test]
async fn local_checkout_offline() -> Result<()> {
    let graph = analyze(
        Arc::new(OfflineFetcher),
        AnalysisTarget::Local(input_under_test("checkout").into()),
        None,
        None,
    )
    .await?;

    insta::assert_snapshot!(summarize(&graph), @r"
    action checkout:.github/actions/setup
      high unpinned_version
      high unpinnable_composite_subaction
    workflow checkout:.github/workflows/ci.yml
    action actions/setup-node@v4 [offline]
    action actions/checkout@11bd71901bbe5b1630ceea73d27597364c9af683 [offline]
    checkout:.github/actions/setup -> actions/setup-node@v4
    checkout:.github/workflows/ci.yml -> actions/checkout@11bd71901bbe5b1630ceea73d27597364c9af683
    checkout:.github/workflows/ci.yml -> checkout:.github/actions/setup
    ");

    Ok(())
}

#[tokio::test]
async fn deterministic() -> Result<()> {
    let app = slug("octo/app");
    let fetcher = || {
        Arc::new(
            MemoryFetcher::new()
                .with_workflow(
                    &app,
                    "ci.yml",
                    workflow(&["octo/b@v1", "octo/c@v1", "octo/d@v1", "octo/missing@v1"]),
                )
                .with_workflow(&app, "release.yml", workflow(&["octo/d@v1", "octo/b@v1"]))
                .with_action(&reference("octo/b@v1"), composite("b", &["octo/d@v1", "octo/c@v1"]))
                .with_action(&reference("octo/c@v1"), composite("c", &["octo/b@v1"]))
                .with_action(&reference("octo/d@v1"), composite("d", &[]))
                .with_latency(Duration::from_millis(1)),
        )
    };

    let first = serde_json::to_string(
        &analyze(fetcher(), AnalysisTarget::Repository(app.clone()), None, None).await?,
    )?;
    for _ in 0..5 {
        let again = serde_json::to_string(
            &analyze(fetcher(), AnalysisTarget::Repository(app.clone()), None, None).await?,
        )?;
        assert_eq!(first, again);
    }

    Ok(())
}
