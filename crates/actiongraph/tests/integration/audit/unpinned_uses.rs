use anyhow::Result;
use serde_json::json;

use crate::common::{actiongraph, input_under_test, query};

#[test]
fn test_unpinned_uses() -> Result<()> {
    let result = actiongraph()
        .target(input_under_test("unpinned-uses.yml"))
        .run_json()?;

    // Only the tag reference is flagged; the SHA-pinned one isn't.
    assert_eq!(
        query(&result, "$.nodes[0].findings[?@.type == 'unpinned_version']"),
        [json!({
            "type": "unpinned_version",
            "severity": "high",
            "message": "actions/checkout@v4 is pinned to a mutable tag rather than a commit hash",
            "evidence": {
                "path": "unpinned-uses.yml",
                "line": 10,
                "snippet": "- uses: actions/checkout@v4",
            },
        })]
    );
    assert!(query(&result, "$.nodes[0].findings[?@.type == 'no_hash_pinning']").is_empty());

    Ok(())
}

#[test]
fn test_clean_workflow() -> Result<()> {
    let result = actiongraph().target(input_under_test("clean.yml")).run_json()?;

    assert_eq!(query(&result, "$.nodes[0].findings[*]"), Vec::<serde_json::Value>::new());
    assert_eq!(query(&result, "$.nodes[0].issue_count"), [json!(0)]);
    assert_eq!(query(&result, "$.nodes[0].severity"), [json!(null)]);

    Ok(())
}
