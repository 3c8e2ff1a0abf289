//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider sends a conversation plus tool schemas to an LLM backend
//! and returns one normalized [`ChatResponse`], streaming incremental
//! text through [`CompletionHooks`] along the way. Each backend speaks a
//! structurally different wire protocol; all of them normalize to the
//! same shapes here so the agent loop never branches on backend identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};

/// A completion request in the internal representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// How the model is allowed to choose tools
    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

/// Tool selection policy for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides whether to call tools
    #[default]
    Auto,
    /// The model must call at least one tool
    Required,
    /// Tool calls are disabled for this request
    None,
}

/// A tool definition advertised to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Why a completion stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of turn
    Stop,
    /// The model issued tool calls and is waiting for results
    ToolCalls,
    /// Output truncated at the token limit
    Length,
    /// Output removed by the backend's content filter
    ContentFilter,
}

/// One candidate completion. Exactly one choice is consumed per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// The generated message
    pub message: Message,

    /// Terminal classification for this choice
    pub finish_reason: FinishReason,
}

/// A complete, normalized response from any backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Candidate completions. Empty is a protocol error for the caller.
    pub choices: Vec<Choice>,

    /// Token usage statistics for this request
    pub usage: Option<TokenUsage>,
}

impl ChatResponse {
    /// Consume the response, yielding its first choice if any.
    pub fn into_choice(self) -> Option<Choice> {
        self.choices.into_iter().next()
    }
}

/// Token usage reported by one completion.
///
/// `prompt_tokens` is the actual context size of the request just made —
/// the quantity a context-window comparison needs — not a running total.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Callback invoked with each incremental text delta.
pub type TextChunkFn = dyn Fn(&str) + Send + Sync;

/// Callback invoked before each retry sleep: (attempt, max attempts, error text).
pub type RetryFn = dyn Fn(u32, u32, &str) + Send + Sync;

/// Host-side hooks for one completion call.
///
/// All hooks are optional; the cancellation token defaults to one that
/// never fires. Providers invoke `on_text` as deltas arrive off the wire;
/// the retry decorator invokes `on_retry`; everything watches `cancel`.
#[derive(Clone, Default)]
pub struct CompletionHooks {
    pub on_text: Option<Arc<TextChunkFn>>,
    pub on_retry: Option<Arc<RetryFn>>,
    pub cancel: CancellationToken,
}

impl CompletionHooks {
    /// Hooks with only a cancellation token attached.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    /// Emit a text delta to the host, if a callback is registered.
    pub fn emit_text(&self, delta: &str) {
        if let Some(cb) = &self.on_text {
            cb(delta);
        }
    }

    /// Emit a retry notification to the host, if a callback is registered.
    pub fn emit_retry(&self, attempt: u32, max: u32, error: &str) {
        if let Some(cb) = &self.on_retry {
            cb(attempt, max, error);
        }
    }
}

impl std::fmt::Debug for CompletionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHooks")
            .field("on_text", &self.on_text.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// The core Provider trait.
///
/// Every backend adapter implements this. The agent loop calls
/// `complete()` without knowing which backend is underneath.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and assemble one complete response, streaming text
    /// deltas through `hooks` as they arrive.
    async fn complete(
        &self,
        request: &ChatRequest,
        hooks: &CompletionHooks,
    ) -> std::result::Result<ChatResponse, ProviderError>;

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

/// Build an assistant [`Message`] from normalized response parts.
///
/// Shared by the adapters so a response with tool calls and one without
/// get identical internal shape regardless of backend.
pub fn assistant_message(content: String, tool_calls: Vec<ToolCall>) -> Message {
    Message::assistant_with_calls(content, tool_calls)
}
