//! Current date/time tool.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::tools::traits::{RiskLevel, Tool, ToolContext, ToolError, ToolSpec};

pub const DATE_TIME_TOOL_ID: &str = "date-time";

pub struct DateTimeTool {
    spec: ToolSpec,
}

impl DateTimeTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                id: DATE_TIME_TOOL_ID.to_owned(),
                name: "Date & Time".to_owned(),
                description: "Get the current date and time in UTC.".to_owned(),
                category: "utility".to_owned(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "format": {
                            "type": "string",
                            "description": "Optional strftime format, e.g. \"%Y-%m-%d\".",
                        }
                    }
                }),
                output_schema: None,
                risk_level: RiskLevel::Low,
                requires_approval: false,
                side_effects: false,
                supports_dry_run: false,
            },
        }
    }
}

impl Default for DateTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for DateTimeTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let now = Utc::now();
        let formatted = match input["format"].as_str() {
            Some(format) => {
                // A bad specifier must become a tool error, not a panic in
                // the Display impl.
                let items: Vec<chrono::format::Item<'_>> =
                    chrono::format::StrftimeItems::new(format).collect();
                if items.iter().any(|i| matches!(i, chrono::format::Item::Error)) {
                    return Err(ToolError::execution(
                        DATE_TIME_TOOL_ID,
                        format!("invalid format string '{format}'"),
                    ));
                }
                now.format_with_items(items.into_iter()).to_string()
            }
            None => now.to_rfc3339(),
        };
        Ok(json!({
            "iso": now.to_rfc3339(),
            "unixMs": now.timestamp_millis(),
            "formatted": formatted,
        }))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::traits::ToolPermissions;

    #[tokio::test]
    async fn reports_current_time() {
        let tool = DateTimeTool::new();
        let ctx = ToolContext::new("p1", "s1", ToolPermissions::allowing(["date-time"]));
        let before = Utc::now().timestamp_millis();
        let out = tool.execute(json!({}), &ctx).await.unwrap();
        let after = Utc::now().timestamp_millis();

        let reported = out["unixMs"].as_i64().unwrap();
        assert!((before..=after).contains(&reported));
        assert!(out["iso"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn honours_custom_format() {
        let tool = DateTimeTool::new();
        let ctx = ToolContext::new("p1", "s1", ToolPermissions::allowing(["date-time"]));
        let out = tool
            .execute(json!({"format": "%Y"}), &ctx)
            .await
            .unwrap();
        let year = out["formatted"].as_str().unwrap();
        assert_eq!(year.len(), 4);
        assert!(year.parse::<u32>().is_ok());
    }

    #[tokio::test]
    async fn invalid_format_is_a_tool_error() {
        let tool = DateTimeTool::new();
        let ctx = ToolContext::new("p1", "s1", ToolPermissions::allowing(["date-time"]));
        let err = tool.execute(json!({"format": "%Q%"}), &ctx).await;
        assert!(err.is_err());
    }
}
