//! Sub-agent delegation — a tool that runs a nested agent loop.
//!
//! The `delegate` tool constructs a fresh [`AgentLoop`] sharing the
//! parent's provider client, with either the full parent registry
//! (enabling recursive fan-out, since the registry includes `delegate`
//! itself) or a named subset. Each sub-agent gets its own message list,
//! approval gate, and queue; a failing sub-agent reports its error text
//! as its answer and never crashes the parent.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crank_core::approval::ApprovalSource;
use crank_core::error::ToolError;
use crank_core::event::EventBus;
use crank_core::provider::Provider;
use crank_core::tool::{Tool, ToolRegistry};

use crate::approval::ApprovalGate;
use crate::loop_runner::{AgentConfig, AgentLoop};

/// The delegation tool.
///
/// Construction is two-phase: create it, register it, then `bind` the
/// finished registry so delegated runs can resolve tool subsets against
/// everything the parent has — including this tool.
pub struct DelegateTool {
    provider: Arc<dyn Provider>,
    config: AgentConfig,
    approval_source: Option<Arc<dyn ApprovalSource>>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
    registry: RwLock<Option<ToolRegistry>>,
}

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    /// The instruction for the sub-agent.
    task: String,

    /// Short label for progress display.
    #[serde(default)]
    label: Option<String>,

    /// Tool names the sub-agent may use. Omitted = the full registry.
    #[serde(default)]
    tools: Option<Vec<String>>,

    /// Override system prompt for the sub-agent.
    #[serde(default)]
    system_prompt: Option<String>,
}

impl DelegateTool {
    pub fn new(
        provider: Arc<dyn Provider>,
        config: AgentConfig,
        approval_source: Option<Arc<dyn ApprovalSource>>,
        events: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            config,
            approval_source,
            events,
            cancel,
            registry: RwLock::new(None),
        })
    }

    /// Bind the parent registry. Call after all tools (including this
    /// one) are registered.
    pub fn bind(&self, registry: ToolRegistry) {
        *self.registry.write().expect("delegate registry poisoned") = Some(registry);
    }

    fn resolve_tools(&self, requested: Option<&[String]>) -> Result<ToolRegistry, ToolError> {
        let guard = self.registry.read().expect("delegate registry poisoned");
        let Some(full) = guard.as_ref() else {
            return Err(ToolError::ExecutionFailed {
                tool_name: "delegate".into(),
                reason: "delegation is not bound to a tool registry".into(),
            });
        };

        match requested {
            None => Ok(full.clone()),
            Some(names) => {
                let (subset, unmatched) = full.subset(names);
                if !unmatched.is_empty() {
                    warn!(
                        unmatched = ?unmatched,
                        "Delegation requested tools missing from the parent registry, skipping"
                    );
                }
                Ok(subset)
            }
        }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained task to a sub-agent. The sub-agent runs \
         its own conversation with its own tools and returns a final result. \
         Use it to parallelize independent sub-tasks or isolate noisy work."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Complete instruction for the sub-agent"
                },
                "label": {
                    "type": "string",
                    "description": "Short label for progress display"
                },
                "tools": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Tool names the sub-agent may use; omit for all tools"
                },
                "system_prompt": {
                    "type": "string",
                    "description": "Override system prompt for the sub-agent"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let args: DelegateArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let description = args.label.clone().unwrap_or_else(|| args.task.clone());
        info!(task = %description, "Spawning sub-agent");

        let tools = self.resolve_tools(args.tools.as_deref())?;
        debug!(tools = ?tools.names(), "Sub-agent tool subset resolved");

        let mut config = self.config.clone();
        if let Some(system_prompt) = args.system_prompt {
            config.system_prompt = system_prompt;
        }

        // Fresh gate: approval caches are not shared with the parent.
        let gate = Arc::new(ApprovalGate::new(self.approval_source.clone()));
        let sub_agent = AgentLoop::new(self.provider.clone(), tools, config)
            .with_gate(gate)
            .with_events(self.events.clone())
            .with_cancel(self.cancel.child_token());

        let started = Instant::now();
        let result = sub_agent.run(&args.task, Vec::new()).await;
        let elapsed_seconds = started.elapsed().as_secs_f64();

        info!(
            task = %description,
            iterations = result.iterations,
            elapsed_seconds = format!("{elapsed_seconds:.1}"),
            outcome = ?result.outcome,
            "Sub-agent finished"
        );

        // A failing sub-agent's error text is its answer; the parent
        // loop sees a normal tool result either way.
        Ok(serde_json::json!({
            "result": result.answer,
            "metadata": {
                "description": description,
                "iterations": result.iterations,
                "elapsed_seconds": (elapsed_seconds * 10.0).round() / 10.0,
            }
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crank_core::error::ProviderError;
    use crank_core::message::Message;
    use crank_core::provider::{
        ChatRequest, ChatResponse, Choice, CompletionHooks, FinishReason,
    };
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<VecDeque<std::result::Result<ChatResponse, ProviderError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        fn new(
            responses: Vec<std::result::Result<ChatResponse, ProviderError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: &ChatRequest,
            _hooks: &CompletionHooks,
        ) -> std::result::Result<ChatResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Protocol("script exhausted".into())))
        }
    }

    fn text_response(text: &str) -> std::result::Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            model: "test".into(),
            choices: vec![Choice {
                message: Message::assistant(text),
                finish_reason: FinishReason::Stop,
            }],
            usage: None,
        })
    }

    struct ReadTool;

    #[async_trait]
    impl Tool for ReadTool {
        fn name(&self) -> &str {
            "file_read"
        }
        fn description(&self) -> &str {
            "Read a file"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
        ) -> std::result::Result<String, ToolError> {
            Ok("contents".into())
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            model: "test-model".into(),
            system_prompt: "parent prompt".into(),
            ..Default::default()
        }
    }

    fn delegate_with_registry(provider: Arc<ScriptedProvider>) -> (Arc<DelegateTool>, ToolRegistry) {
        let delegate = DelegateTool::new(
            provider,
            config(),
            None,
            Arc::new(EventBus::default()),
            CancellationToken::new(),
        );
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ReadTool));
        registry.register(delegate.clone());
        delegate.bind(registry.clone());
        (delegate, registry)
    }

    #[tokio::test]
    async fn delegation_returns_result_and_metadata() {
        let provider = ScriptedProvider::new(vec![text_response("sub-agent answer")]);
        let (delegate, _) = delegate_with_registry(provider);

        let output = delegate
            .execute(serde_json::json!({
                "task": "summarize the repo",
                "label": "summarize"
            }))
            .await
            .unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["result"], "sub-agent answer");
        assert_eq!(parsed["metadata"]["description"], "summarize");
        assert_eq!(parsed["metadata"]["iterations"], 1);
        assert!(parsed["metadata"]["elapsed_seconds"].is_number());
    }

    #[tokio::test]
    async fn full_registry_includes_delegate_itself() {
        let provider = ScriptedProvider::new(vec![text_response("ok")]);
        let (delegate, _) = delegate_with_registry(provider.clone());

        delegate
            .execute(serde_json::json!({"task": "anything"}))
            .await
            .unwrap();

        // The sub-agent's request advertised both tools, delegate included
        let requests = provider.requests.lock().unwrap();
        let names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"file_read"));
        assert!(names.contains(&"delegate"));
    }

    #[tokio::test]
    async fn subset_skips_unknown_names_with_warning() {
        let provider = ScriptedProvider::new(vec![text_response("ok")]);
        let (delegate, _) = delegate_with_registry(provider.clone());

        let output = delegate
            .execute(serde_json::json!({
                "task": "read something",
                "tools": ["file_read", "nonexistent_tool"]
            }))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["result"], "ok");

        // Only the valid subset was advertised
        let requests = provider.requests.lock().unwrap();
        let names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["file_read"]);
    }

    #[tokio::test]
    async fn override_system_prompt_applies() {
        let provider = ScriptedProvider::new(vec![text_response("ok")]);
        let (delegate, _) = delegate_with_registry(provider.clone());

        delegate
            .execute(serde_json::json!({
                "task": "go",
                "system_prompt": "You are a narrow specialist."
            }))
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].messages[0].content, "You are a narrow specialist.");
    }

    #[tokio::test]
    async fn failing_subagent_reports_error_as_answer() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::ApiError {
            status_code: 500,
            message: "backend exploded".into(),
        })]);
        let (delegate, _) = delegate_with_registry(provider);

        // The tool call itself succeeds; the failure is inside the result
        let output = delegate
            .execute(serde_json::json!({"task": "doomed"}))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert!(
            parsed["result"].as_str().unwrap().contains("backend exploded"),
            "{parsed}"
        );
    }

    #[tokio::test]
    async fn unbound_delegate_is_a_tool_error() {
        let provider = ScriptedProvider::new(vec![]);
        let delegate = DelegateTool::new(
            provider,
            config(),
            None,
            Arc::new(EventBus::default()),
            CancellationToken::new(),
        );

        let err = delegate
            .execute(serde_json::json!({"task": "go"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not bound"));
    }

    #[tokio::test]
    async fn missing_task_is_invalid_arguments() {
        let provider = ScriptedProvider::new(vec![]);
        let (delegate, _) = delegate_with_registry(provider);

        let err = delegate.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
