//! Built-in capability handlers for Crank.
//!
//! Tools give the agent the ability to interact with the world: run
//! shell commands, read/write files, fetch URLs, do math, and keep a
//! task list. Each one implements `crank_core::Tool`; the orchestration
//! engine only ever sees the trait.

pub mod calculator;
pub mod fetch;
pub mod file_read;
pub mod file_write;
pub mod path_policy;
pub mod shell;
pub mod todo;

use std::sync::Arc;

use crank_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use fetch::FetchTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use shell::ShellTool;
pub use todo::{TodoReadTool, TodoStore, TodoWriteTool};

/// Create a registry with all built-in tools.
///
/// Security defaults:
/// - Shell: only common safe commands (ls, cat, echo, git, etc.)
/// - File read/write: sensitive paths (~/.ssh, /proc, etc.) are blocked
pub fn default_registry() -> ToolRegistry {
    let safe_commands = vec![
        "ls".into(),
        "cat".into(),
        "head".into(),
        "tail".into(),
        "echo".into(),
        "pwd".into(),
        "date".into(),
        "wc".into(),
        "grep".into(),
        "find".into(),
        "which".into(),
        "git".into(),
        "cargo".into(),
        "rustc".into(),
        "node".into(),
        "npm".into(),
        "python".into(),
    ];

    let todos = TodoStore::new();

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FileReadTool::new()));
    registry.register(Arc::new(FileWriteTool::new()));
    registry.register(Arc::new(ShellTool::new(safe_commands)));
    registry.register(Arc::new(FetchTool::new()));
    registry.register(Arc::new(CalculatorTool));
    registry.register(Arc::new(TodoReadTool::new(todos.clone())));
    registry.register(Arc::new(TodoWriteTool::new(todos)));
    registry
}
