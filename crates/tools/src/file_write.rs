//! File write tool — create or overwrite files, creating parent
//! directories as needed.

use async_trait::async_trait;
use crank_core::error::ToolError;
use crank_core::tool::Tool;
use std::path::Path;
use tracing::debug;

use crate::path_policy;

pub struct FileWriteTool {
    forbidden_paths: Vec<String>,
}

impl FileWriteTool {
    pub fn new() -> Self {
        Self {
            forbidden_paths: path_policy::default_forbidden_paths(),
        }
    }

    pub fn with_forbidden_paths(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file at the given path, creating parent directories \
         if needed. Overwrites existing content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        path_policy::check("file_write", path, &self.forbidden_paths)?;

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ToolError::ExecutionFailed {
                        tool_name: "file_write".into(),
                        reason: format!("Failed to create {}: {e}", parent.display()),
                    }
                })?;
            }
        }

        tokio::fs::write(path, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "file_write".into(),
                reason: format!("Failed to write {path}: {e}"),
            })?;

        debug!(path = %path, bytes = content.len(), "Wrote file");
        Ok(format!("Wrote {} bytes to {path}", content.len()))
    }
}
