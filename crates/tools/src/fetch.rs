//! Fetch tool — HTTP GET with a response size cap.
//!
//! Read-only network access; it is on the approval safe list, so the
//! size cap and scheme check are the only guards.

use async_trait::async_trait;
use crank_core::error::ToolError;
use crank_core::tool::Tool;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Bytes of response body kept before truncation.
const MAX_BODY_BYTES: usize = 256 * 1024;

pub struct FetchTool {
    client: reqwest::Client,
}

impl FetchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch the contents of a URL with an HTTP GET request. Returns the \
         response body as text, truncated if very large."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let url = arguments["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url' argument".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments(
                "URL must start with http:// or https://".into(),
            ));
        }

        debug!(url = %url, "Fetching URL");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "fetch".into(),
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "fetch".into(),
                reason: format!("Failed to read response body: {e}"),
            })?;

        let truncated = body.len() > MAX_BODY_BYTES;
        let mut text: String = body.chars().take(MAX_BODY_BYTES).collect();
        if truncated {
            text.push_str("\n[truncated]");
        }

        Ok(format!("[status: {status}]\n{text}"))
    }
}
