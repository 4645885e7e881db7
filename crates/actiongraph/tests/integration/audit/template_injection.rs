use anyhow::Result;
use serde_json::json;

use crate::common::{actiongraph, input_under_test, query};

#[test]
fn test_self_hosted_escalation() -> Result<()> {
    let result = actiongraph()
        .target(input_under_test("template-injection.yml"))
        .run_json()?;

    // Same expression, but the self-hosted runner is persistent.
    assert_eq!(
        query(
            &result,
            "$.nodes[0].findings[?@.type == 'script_injection'].severity"
        ),
        [json!("high"), json!("critical")]
    );
    assert_eq!(
        query(
            &result,
            "$.nodes[0].findings[?@.type == 'script_injection'].evidence.line"
        ),
        [json!(10), json!(14)]
    );

    Ok(())
}
