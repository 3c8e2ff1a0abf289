//! Todo tools — a session-scoped task list the model maintains.
//!
//! `todo_read` is on the approval safe list; `todo_write` replaces the
//! whole list each call, which keeps the model's bookkeeping simple.
//! The list lives in memory and is shared between the two tools.

use async_trait::async_trait;
use crank_core::error::ToolError;
use crank_core::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// One task on the list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub task: String,
    #[serde(default)]
    pub done: bool,
}

/// Shared storage behind both todo tools.
#[derive(Debug, Default)]
pub struct TodoStore {
    items: Mutex<Vec<TodoItem>>,
}

impl TodoStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn render(&self) -> String {
        let items = self.items.lock().expect("todo store poisoned");
        if items.is_empty() {
            return "The todo list is empty.".into();
        }
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!(
                    "{}. [{}] {}",
                    i + 1,
                    if item.done { "x" } else { " " },
                    item.task
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Read the current todo list.
pub struct TodoReadTool {
    store: Arc<TodoStore>,
}

impl TodoReadTool {
    pub fn new(store: Arc<TodoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        "todo_read"
    }

    fn description(&self) -> &str {
        "Read the current todo list."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
        Ok(self.store.render())
    }
}

/// Replace the todo list.
pub struct TodoWriteTool {
    store: Arc<TodoStore>,
}

impl TodoWriteTool {
    pub fn new(store: Arc<TodoStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the todo list with a new set of tasks. Pass the complete \
         list each time, marking finished tasks done."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "task": { "type": "string" },
                            "done": { "type": "boolean", "default": false }
                        },
                        "required": ["task"]
                    }
                }
            },
            "required": ["items"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let items: Vec<TodoItem> = serde_json::from_value(arguments["items"].clone())
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid 'items': {e}")))?;

        let count = items.len();
        *self.store.items.lock().expect("todo store poisoned") = items;
        Ok(format!("Todo list updated ({count} items).\n{}", self.store.render()))
    }
}
