//! Outbound HTTP request tool.
//!
//! Network egress is filtered through the SSRF guard before any connection
//! is dialled. Response bodies are capped at 1 MiB and sensitive headers are
//! redacted from the stored output.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::netguard::{check_url, redact_headers};
use crate::tools::traits::{RiskLevel, Tool, ToolContext, ToolError, ToolSpec};

pub const HTTP_REQUEST_TOOL_ID: &str = "http-request";

/// Maximum response size returned to the agent (1 MiB).
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 120;

pub struct HttpRequestTool {
    spec: ToolSpec,
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new() -> Self {
        Self::with_approval(true)
    }

    /// Approval requirement is configurable per deployment; the default is
    /// to gate every call.
    pub fn with_approval(requires_approval: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent("nexus/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            spec: ToolSpec {
                id: HTTP_REQUEST_TOOL_ID.to_owned(),
                name: "HTTP Request".to_owned(),
                description: "Make an HTTP request to a public URL. Supports GET, POST, PUT, \
                              PATCH and DELETE with optional headers and body."
                    .to_owned(),
                category: "web".to_owned(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "url": {
                            "type": "string",
                            "description": "Target URL (http or https, public addresses only)."
                        },
                        "method": {
                            "type": "string",
                            "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"],
                            "description": "HTTP method (default GET)."
                        },
                        "headers": {
                            "type": "object",
                            "description": "Optional request headers."
                        },
                        "body": {
                            "type": "string",
                            "description": "Request body for POST/PUT/PATCH."
                        },
                        "timeout_seconds": {
                            "type": "integer",
                            "minimum": 1,
                            "maximum": 120
                        }
                    },
                    "required": ["url"]
                }),
                output_schema: None,
                risk_level: RiskLevel::Medium,
                requires_approval,
                side_effects: true,
                supports_dry_run: true,
            },
            client,
        }
    }

    fn method_of(input: &Value) -> Result<reqwest::Method, ToolError> {
        match input["method"].as_str().unwrap_or("GET") {
            "GET" => Ok(reqwest::Method::GET),
            "POST" => Ok(reqwest::Method::POST),
            "PUT" => Ok(reqwest::Method::PUT),
            "PATCH" => Ok(reqwest::Method::PATCH),
            "DELETE" => Ok(reqwest::Method::DELETE),
            other => Err(ToolError::execution(
                HTTP_REQUEST_TOOL_ID,
                format!("unsupported HTTP method: {other}"),
            )),
        }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let raw_url = input["url"].as_str().unwrap_or("");
        let url =
            check_url(raw_url).map_err(|e| ToolError::execution(HTTP_REQUEST_TOOL_ID, e))?;
        let method = Self::method_of(&input)?;

        if ctx.abort.is_aborted() {
            return Err(ToolError::Cancelled);
        }

        let timeout = input["timeout_seconds"]
            .as_u64()
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let mut builder = self
            .client
            .request(method, url)
            .timeout(Duration::from_secs(timeout));

        if let Some(headers) = input["headers"].as_object() {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    builder = builder.header(name, value);
                }
            }
        }
        if let Some(body) = input["body"].as_str() {
            builder = builder.body(body.to_owned());
        }

        let send = builder.send();
        let response = tokio::select! {
            _ = ctx.abort.aborted() => return Err(ToolError::Cancelled),
            resp = send => resp.map_err(|e| ToolError::execution(HTTP_REQUEST_TOOL_ID, e))?,
        };

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                Some((name.to_string(), value.to_str().ok()?.to_owned()))
            })
            .collect();
        let headers = redact_headers(&headers);

        let body = tokio::select! {
            _ = ctx.abort.aborted() => return Err(ToolError::Cancelled),
            bytes = response.bytes() => {
                bytes.map_err(|e| ToolError::execution(HTTP_REQUEST_TOOL_ID, e))?
            }
        };

        let truncated = body.len() > MAX_RESPONSE_BYTES;
        let body_text =
            String::from_utf8_lossy(&body[..body.len().min(MAX_RESPONSE_BYTES)]).to_string();

        Ok(json!({
            "status": status,
            "headers": headers.into_iter().collect::<std::collections::BTreeMap<_, _>>(),
            "body": body_text,
            "truncated": truncated,
        }))
    }

    /// Validates the URL and method against the egress rules and reports
    /// what would be sent, without dialling.
    async fn dry_run(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let raw_url = input["url"].as_str().unwrap_or("");
        let url =
            check_url(raw_url).map_err(|e| ToolError::execution(HTTP_REQUEST_TOOL_ID, e))?;
        let method = Self::method_of(&input)?;
        Ok(json!({
            "wouldRequest": {
                "method": method.as_str(),
                "url": url.as_str(),
                "hasBody": input["body"].is_string(),
            }
        }))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::traits::ToolPermissions;

    fn ctx() -> ToolContext {
        ToolContext::new("p1", "s1", ToolPermissions::allowing(["http-request"]))
    }

    #[tokio::test]
    async fn blocked_addresses_fail_before_dialling() {
        let tool = HttpRequestTool::new();
        for url in [
            "http://127.0.0.1/",
            "http://10.0.0.8/",
            "http://169.254.169.254/latest/meta-data",
            "http://localhost:9200/_cat",
            "http://[::1]:8080/",
        ] {
            let err = tool.execute(json!({"url": url}), &ctx()).await.unwrap_err();
            match err {
                ToolError::Execution { message, .. } => {
                    assert!(message.contains("blocked"), "{url}: {message}");
                }
                other => panic!("unexpected error for {url}: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn invalid_method_is_rejected() {
        let tool = HttpRequestTool::new();
        let err = tool
            .execute(
                json!({"url": "https://example.com", "method": "TRACE"}),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[tokio::test]
    async fn dry_run_reports_plan_without_network() {
        let tool = HttpRequestTool::new();
        let out = tool
            .dry_run(
                json!({"url": "https://example.com/x", "method": "POST", "body": "{}"}),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out["wouldRequest"]["method"], "POST");
        assert_eq!(out["wouldRequest"]["hasBody"], true);
    }

    #[tokio::test]
    async fn dry_run_applies_egress_rules() {
        let tool = HttpRequestTool::new();
        let err = tool
            .dry_run(json!({"url": "http://192.168.0.1/"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[test]
    fn spec_defaults_require_approval() {
        let tool = HttpRequestTool::new();
        assert!(tool.spec().requires_approval);
        assert!(tool.spec().side_effects);
        assert_eq!(tool.spec().risk_level, RiskLevel::Medium);

        let open = HttpRequestTool::with_approval(false);
        assert!(!open.spec().requires_approval);
    }
}
