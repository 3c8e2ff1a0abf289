//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what let the agent act in the world: execute shell commands,
//! read/write files, fetch URLs, delegate to sub-agents. A handler takes
//! parsed JSON arguments and returns text (or an error the dispatcher
//! turns into a structured error result).

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The core Tool trait.
///
/// Each capability implements this trait. Tools are collected into a
/// [`ToolRegistry`] owned by the caller; the agent loop only reads the
/// registry for the duration of a run.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with parsed arguments, returning its text output.
    async fn execute(&self, arguments: serde_json::Value)
    -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// An ordered registry of available tools.
///
/// An explicit value — no global registration — so parent and sub-agent
/// loops can hold independent, differently-scoped registries. Insertion
/// order is preserved: it is the order tools are advertised to the model.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. Replaces any existing tool with the same name,
    /// keeping its position.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(i) => self.tools[i] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// Get all tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Build a registry containing only the named tools.
    ///
    /// Returns the subset plus the names that matched nothing; the caller
    /// decides whether unmatched names are a warning or an error.
    pub fn subset(&self, names: &[String]) -> (ToolRegistry, Vec<String>) {
        let mut matched = ToolRegistry::new();
        let mut unmatched = Vec::new();
        for name in names {
            match self.get(name) {
                Some(tool) => matched.register(tool),
                None => unmatched.push(name.clone()),
            }
        }
        (matched, unmatched)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
        ) -> std::result::Result<String, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
        ) -> std::result::Result<String, ToolError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("beta")));
        registry.register(Arc::new(NamedTool("alpha")));
        registry.register(Arc::new(NamedTool("gamma")));
        assert_eq!(registry.names(), ["beta", "alpha", "gamma"]);

        // Re-registering keeps position
        registry.register(Arc::new(NamedTool("alpha")));
        assert_eq!(registry.names(), ["beta", "alpha", "gamma"]);
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[test]
    fn subset_splits_matched_and_unmatched() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("read")));
        registry.register(Arc::new(NamedTool("shell")));

        let (subset, unmatched) =
            registry.subset(&["read".to_string(), "imaginary".to_string()]);
        assert_eq!(subset.names(), ["read"]);
        assert_eq!(unmatched, ["imaginary"]);
    }

    #[tokio::test]
    async fn execute_via_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let tool = registry.get("echo").unwrap();
        let out = tool
            .execute(serde_json::json!({"text": "hello world"}))
            .await
            .unwrap();
        assert_eq!(out, "hello world");
    }
}
