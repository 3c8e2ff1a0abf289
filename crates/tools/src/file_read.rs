//! File read tool — read file contents with path validation.

use async_trait::async_trait;
use crank_core::error::ToolError;
use crank_core::tool::Tool;

use crate::path_policy;

pub struct FileReadTool {
    /// Forbidden path prefixes.
    forbidden_paths: Vec<String>,
}

impl FileReadTool {
    /// Create a file read tool with the default sensitive-path blocklist.
    pub fn new() -> Self {
        Self {
            forbidden_paths: path_policy::default_forbidden_paths(),
        }
    }

    /// Create a file read tool with a custom blocklist.
    pub fn with_forbidden_paths(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        path_policy::check("file_read", path, &self.forbidden_paths)?;

        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "file_read".into(),
                reason: format!("Failed to read {path}: {e}"),
            })
    }
}
