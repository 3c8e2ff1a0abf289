//! Shared wiring between CLI commands: provider construction, the stdin
//! approval source, and the event-bus renderer.

use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crank_agent::{AgentConfig, DelegateTool, Termination};
use crank_config::AppConfig;
use crank_core::approval::{ApprovalDecision, ApprovalRequest, ApprovalSource};
use crank_core::event::{EventBus, RuntimeEvent};
use crank_core::provider::Provider;
use crank_core::tool::ToolRegistry;
use crank_providers::{
    AnthropicProvider, OpenAiCompatProvider, ResponsesProvider, RetryPolicy, RetryProvider,
};

/// Build the configured provider, wrapped with retry/backoff.
pub fn build_provider(
    config: &AppConfig,
) -> Result<Arc<dyn Provider>, Box<dyn std::error::Error>> {
    let name = config.default_provider.as_str();
    let api_key = config.api_key_for(name).unwrap_or_default();
    let api_url = config
        .providers
        .get(name)
        .and_then(|p| p.api_url.clone());

    let inner: Arc<dyn Provider> = match name {
        "anthropic" => {
            let mut provider = AnthropicProvider::new(api_key);
            if let Some(url) = api_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        "responses" => {
            let mut provider = ResponsesProvider::new(api_key);
            if let Some(url) = api_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        "openai" => Arc::new(OpenAiCompatProvider::openai(api_key)),
        "openrouter" => Arc::new(OpenAiCompatProvider::openrouter(api_key)),
        "ollama" => Arc::new(OpenAiCompatProvider::ollama(api_url.as_deref())),
        other => return Err(format!("Unknown provider: {other}").into()),
    };

    let policy = RetryPolicy {
        max_attempts: config.retry.max_attempts,
        base_delay: Duration::from_millis(config.retry.base_delay_ms),
    };
    Ok(Arc::new(RetryProvider::new(inner).with_policy(policy)))
}

/// Map config onto the agent loop settings.
pub fn agent_config(config: &AppConfig) -> AgentConfig {
    AgentConfig {
        model: config.default_model.clone(),
        system_prompt: config.system_prompt.clone(),
        temperature: config.default_temperature,
        max_tokens: Some(config.default_max_tokens),
        max_iterations: config.agent.max_iterations,
        max_nudges: config.agent.max_nudges,
        context_window: config.agent.context_window,
        termination: if config.agent.completion_tool.is_empty() {
            Termination::OnText
        } else {
            Termination::OnCompletionTool {
                tool: config.agent.completion_tool.clone(),
            }
        },
    }
}

/// Build the full tool registry, delegation included.
pub fn build_registry(
    provider: Arc<dyn Provider>,
    config: &AgentConfig,
    approval_source: Option<Arc<dyn ApprovalSource>>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
) -> ToolRegistry {
    let mut registry = crank_tools::default_registry();
    let delegate = DelegateTool::new(
        provider,
        config.clone(),
        approval_source,
        events,
        cancel,
    );
    registry.register(delegate.clone());
    delegate.bind(registry.clone());
    registry
}

/// Approval source that asks the operator on stdin.
pub struct StdinApprovalSource;

#[async_trait]
impl ApprovalSource for StdinApprovalSource {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        let name = request.name.clone();
        let args = serde_json::to_string(&request.args).unwrap_or_default();

        // Blocking stdin read off the async runtime
        tokio::task::spawn_blocking(move || {
            eprintln!("\n  Tool approval required: {name}");
            eprintln!("  Arguments: {args}");
            eprint!("  Allow? [y]es / [a]lways / [n]o / [d]eny always: ");
            let _ = std::io::stderr().flush();

            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err() {
                return ApprovalDecision::DenyOnce;
            }
            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => ApprovalDecision::AllowOnce,
                "a" | "always" => ApprovalDecision::AllowAlways,
                "d" | "deny" => ApprovalDecision::DenyAlways,
                _ => ApprovalDecision::DenyOnce,
            }
        })
        .await
        .unwrap_or(ApprovalDecision::DenyOnce)
    }
}

/// Subscribe to the event bus and render events to the terminal until
/// the bus closes or the task is dropped.
pub fn spawn_event_renderer(events: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event.as_ref() {
                RuntimeEvent::TextChunk { content } => {
                    print!("{content}");
                    let _ = std::io::stdout().flush();
                }
                RuntimeEvent::ToolStarted { name, .. } => {
                    eprintln!("\n  ⚙ {name} …");
                }
                RuntimeEvent::ToolCompleted {
                    name,
                    success,
                    duration_ms,
                    ..
                } => {
                    let mark = if *success { "✓" } else { "✗" };
                    eprintln!("  {mark} {name} ({duration_ms}ms)");
                }
                RuntimeEvent::ToolDenied { name, .. } => {
                    eprintln!("  ✗ {name} denied");
                }
                RuntimeEvent::Retry {
                    attempt,
                    max_attempts,
                    error,
                    ..
                } => {
                    eprintln!("  ↻ retry {attempt}/{max_attempts}: {error}");
                }
                RuntimeEvent::Status { .. } => {}
            }
        }
    })
}

/// Wire ctrl-c to a cancellation token.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, aborting run…");
            token.cancel();
        }
    });
    cancel
}
