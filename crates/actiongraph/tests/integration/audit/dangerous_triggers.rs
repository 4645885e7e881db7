use anyhow::Result;
use serde_json::json;

use crate::common::{actiongraph, input_under_test, query};

#[test]
fn test_pull_request_target_checkout() -> Result<()> {
    let result = actiongraph()
        .target(input_under_test("pull-request-target.yml"))
        .run_json()?;

    assert_eq!(
        query(
            &result,
            "$.nodes[0].findings[?@.type == 'insecure_pull_request_target'].severity"
        ),
        [json!("critical")]
    );
    assert_eq!(
        query(
            &result,
            "$.nodes[0].findings[?@.type == 'dangerous_trigger'].evidence.line"
        ),
        [json!(2)]
    );

    Ok(())
}
