//! End-to-end tests of the `actiongraph` binary.

use anyhow::Result;
use serde_json::json;

use crate::common::{actiongraph, input_under_test, query};

#[test]
fn local_workflow_offline() -> Result<()> {
    let output = actiongraph().target(input_under_test("clean.yml")).run()?;

    // Exactly one JSON document.
    let result = serde_json::from_str::<serde_json::Value>(&output)?;
    assert_eq!(output.trim_end().lines().count(), 1);

    assert_eq!(query(&result, "$.nodes[0].id"), [json!("test-data:clean.yml")]);
    assert_eq!(query(&result, "$.nodes[0].kind"), [json!("workflow")]);
    assert_eq!(
        query(&result, "$.nodes[1].metadata.status"),
        [json!("offline")]
    );
    assert_eq!(
        query(&result, "$.statistics"),
        [json!({
            "total_nodes": 2,
            "total_edges": 1,
            "total_issues": 0,
            "severity_counts": {"critical": 0, "high": 0, "medium": 0, "low": 0},
        })]
    );

    Ok(())
}

#[test]
fn local_checkout_pretty() -> Result<()> {
    let output = actiongraph()
        .args(["--pretty", "--depth", "0"])
        .target(input_under_test("checkout"))
        .run()?;

    assert!(output.lines().count() > 1);

    let result = serde_json::from_str::<serde_json::Value>(&output)?;
    assert_eq!(
        query(&result, "$.nodes[*].id"),
        [
            json!("checkout:.github/actions/setup"),
            json!("checkout:.github/workflows/ci.yml"),
            json!("<depth-exceeded>"),
        ]
    );

    Ok(())
}

#[test]
fn unparseable_workflow() -> Result<()> {
    let result = actiongraph()
        .target(input_under_test("garbage.yml"))
        .run_json()?;

    assert_eq!(
        query(&result, "$.nodes[0].findings[0].type"),
        [json!("parse_error")]
    );
    assert_eq!(query(&result, "$.nodes[0].severity"), [json!("medium")]);

    Ok(())
}

#[test]
fn local_checkout_with_bad_inputs() -> Result<()> {
    // An unparseable action and a non-UTF-8 workflow alongside a good one.
    let result = actiongraph().target(input_under_test("mixed")).run_json()?;

    assert_eq!(
        query(&result, "$.nodes[*].id"),
        [
            json!("mixed:.github/actions/broken"),
            json!("mixed:.github/workflows/good.yml"),
            json!("mixed:.github/workflows/latin1.yml"),
        ]
    );
    assert_eq!(
        query(&result, "$.nodes[0].findings[*].type"),
        [json!("parse_error")]
    );
    assert_eq!(query(&result, "$.nodes[1].issue_count"), [json!(0)]);
    assert_eq!(query(&result, "$.nodes[2].issue_count"), [json!(0)]);

    Ok(())
}

#[test]
fn unparseable_local_action() -> Result<()> {
    let result = actiongraph()
        .target(input_under_test("mixed/.github/actions/broken/action.yml"))
        .run_json()?;

    assert_eq!(query(&result, "$.nodes[0].id"), [json!("broken:.")]);
    assert_eq!(query(&result, "$.nodes[0].kind"), [json!("action")]);
    assert_eq!(
        query(&result, "$.nodes[0].findings[0].type"),
        [json!("parse_error")]
    );

    Ok(())
}

#[test]
fn nonexistent_target() -> Result<()> {
    let output = actiongraph()
        .target("/nonexistent/dir/ci.yml")
        .expects_failure(true)
        .run()?;

    assert!(output.contains("no analysis was performed"));

    Ok(())
}

#[test]
fn unsupported_local_file() -> Result<()> {
    let output = actiongraph()
        .target(input_under_test("not-a-workflow.txt"))
        .expects_failure(true)
        .run()?;

    assert!(output.contains("neither a workflow nor an action definition"));

    Ok(())
}

#[test]
fn offline_remote_target() -> Result<()> {
    // Nothing can be obtained without the network.
    actiongraph()
        .target("octo/repo@main")
        .expects_failure(true)
        .run()?;

    Ok(())
}

#[test]
fn bad_config() -> Result<()> {
    // Valid YAML, but not a valid configuration.
    let config = input_under_test("write-all.yml");
    let output = actiongraph()
        .no_config(false)
        .args(["--config", config.as_str()])
        .target(input_under_test("clean.yml"))
        .expects_failure(true)
        .run()?;

    assert!(output.contains("failed to load config"));

    Ok(())
}
