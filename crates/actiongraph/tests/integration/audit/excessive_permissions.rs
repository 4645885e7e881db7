use anyhow::Result;
use serde_json::json;

use crate::common::{actiongraph, input_under_test, query};

#[test]
fn test_write_all() -> Result<()> {
    let result = actiongraph()
        .target(input_under_test("write-all.yml"))
        .run_json()?;

    assert_eq!(
        query(
            &result,
            "$.nodes[0].findings[?@.type == 'write_all_permissions'].severity"
        ),
        [json!("critical")]
    );
    assert_eq!(query(&result, "$.nodes[0].severity"), [json!("critical")]);
    assert_eq!(
        query(&result, "$.statistics.severity_counts.critical"),
        [json!(1)]
    );

    Ok(())
}
