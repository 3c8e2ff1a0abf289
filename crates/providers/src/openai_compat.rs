//! OpenAI-compatible chat-completions adapter.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Fireworks
//! AI, and any endpoint exposing `/v1/chat/completions`.
//!
//! Wire shape: flat `messages` array, `{"type":"function"}` tool objects,
//! SSE `data:` lines terminated by a `[DONE]` sentinel, tool-call
//! argument deltas accumulated by choice-local `index`, final usage via
//! `stream_options.include_usage`.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

use crank_core::error::ProviderError;
use crank_core::message::{Message, Role, ToolCall};
use crank_core::provider::*;

use crate::sse::SseDecoder;

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Convert internal messages to the wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system".into(),
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to the wire format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = match request.tool_choice {
                ToolChoice::Auto => serde_json::json!("auto"),
                ToolChoice::Required => serde_json::json!("required"),
                ToolChoice::None => serde_json::json!("none"),
            };
        }
        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        streaming: bool,
        hooks: &CompletionHooks,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if streaming {
            req = req.header("Accept", "text/event-stream");
        }

        let response = tokio::select! {
            _ = hooks.cancel.cancelled() => return Err(ProviderError::Cancelled),
            res = req.json(body).send() => {
                res.map_err(|e| ProviderError::Network(e.to_string()))?
            }
        };

        let status = response.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }
        Ok(response)
    }

    async fn complete_blocking(
        &self,
        request: &ChatRequest,
        hooks: &CompletionHooks,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        let body = self.build_body(request, false);
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(&body, false, hooks).await?;
        let api_response: ApiResponse = tokio::select! {
            _ = hooks.cancel.cancelled() => return Err(ProviderError::Cancelled),
            res = response.json() => res.map_err(|e| ProviderError::Protocol(
                format!("Failed to parse response: {e}"),
            ))?,
        };

        let choices = api_response
            .choices
            .into_iter()
            .map(|c| {
                let tool_calls: Vec<ToolCall> = c
                    .message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    })
                    .collect();
                let finish_reason = parse_finish_reason(c.finish_reason.as_deref(), &tool_calls);
                Choice {
                    message: assistant_message(
                        c.message.content.unwrap_or_default(),
                        tool_calls,
                    ),
                    finish_reason,
                }
            })
            .collect();

        Ok(ChatResponse {
            model: api_response.model,
            choices,
            usage: api_response.usage.map(ApiUsage::into_usage),
        })
    }

    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        hooks: &CompletionHooks,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        let body = self.build_body(request, true);
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(&body, true, hooks).await?;
        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        let mut content = String::new();
        let mut finish_reason: Option<FinishReason> = None;
        let mut usage: Option<TokenUsage> = None;
        // Tool-call deltas arrive keyed by index; BTreeMap keeps issue order.
        let mut accumulators: BTreeMap<u32, ToolCallAccumulator> = BTreeMap::new();
        let mut terminated = false;

        'stream: loop {
            let chunk = tokio::select! {
                _ = hooks.cancel.cancelled() => return Err(ProviderError::Cancelled),
                chunk = byte_stream.next() => chunk,
            };
            let bytes = match chunk {
                Some(Ok(b)) => b,
                Some(Err(e)) => return Err(ProviderError::StreamInterrupted(e.to_string())),
                None => break 'stream,
            };

            for frame in decoder.push(&bytes) {
                let data = frame.data.trim();
                if data.is_empty() {
                    continue;
                }
                // "[DONE]" signals end of stream
                if data == "[DONE]" {
                    terminated = true;
                    break 'stream;
                }

                let parsed: StreamResponse = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        trace!(provider = %self.name, data = %data, error = %e,
                            "Ignoring unparseable SSE chunk");
                        continue;
                    }
                };

                if let Some(choice) = parsed.choices.first() {
                    if let Some(delta_content) = &choice.delta.content {
                        if !delta_content.is_empty() {
                            hooks.emit_text(delta_content);
                            content.push_str(delta_content);
                        }
                    }
                    if let Some(tc_deltas) = &choice.delta.tool_calls {
                        for tc_delta in tc_deltas {
                            let acc = accumulators.entry(tc_delta.index).or_default();
                            if let Some(id) = &tc_delta.id {
                                acc.id = id.clone();
                            }
                            if let Some(func) = &tc_delta.function {
                                if let Some(name) = &func.name {
                                    acc.name = name.clone();
                                }
                                if let Some(args) = &func.arguments {
                                    acc.arguments.push_str(args);
                                }
                            }
                        }
                    }
                    if let Some(reason) = &choice.finish_reason {
                        finish_reason = Some(parse_finish_reason_str(reason));
                    }
                }

                // Usage arrives in a trailing chunk with empty choices
                if let Some(u) = parsed.usage {
                    usage = Some(u.into_usage());
                }
            }
        }

        if !terminated {
            return Err(ProviderError::Protocol(
                "stream ended without [DONE] terminal event".into(),
            ));
        }

        let tool_calls: Vec<ToolCall> = accumulators
            .into_values()
            .map(ToolCallAccumulator::into_tool_call)
            .collect();
        let finish_reason =
            finish_reason.unwrap_or_else(|| infer_finish_reason(&tool_calls));

        Ok(ChatResponse {
            model: request.model.clone(),
            choices: vec![Choice {
                message: assistant_message(content, tool_calls),
                finish_reason,
            }],
            usage,
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        hooks: &CompletionHooks,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        if hooks.on_text.is_some() {
            self.complete_streaming(request, hooks).await
        } else {
            self.complete_blocking(request, hooks).await
        }
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

fn parse_finish_reason(reason: Option<&str>, tool_calls: &[ToolCall]) -> FinishReason {
    match reason {
        Some(r) => parse_finish_reason_str(r),
        None => infer_finish_reason(tool_calls),
    }
}

fn parse_finish_reason_str(reason: &str) -> FinishReason {
    match reason {
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn infer_finish_reason(tool_calls: &[ToolCall]) -> FinishReason {
    if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl ApiUsage {
    fn into_usage(self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta — arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}
