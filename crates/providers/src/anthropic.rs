//! Anthropic native Messages API adapter.
//!
//! Wire shape:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field, not a message
//! - Role-tagged content blocks: `text`, `tool_use`, `tool_result`
//! - Streaming via typed SSE events (`content_block_start/delta/stop`,
//!   `message_delta` carrying usage, `message_stop` terminal)

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crank_core::error::ProviderError;
use crank_core::message::{Message, Role, ToolCall};
use crank_core::provider::*;

use crate::sse::SseDecoder;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts the system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic format with content blocks.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Text(msg.content.clone()),
                    });
                }
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Text(msg.content.clone()),
                        });
                    } else {
                        let mut blocks: Vec<ContentBlock> = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: msg.content.clone(),
                            });
                        }
                        for tc in &msg.tool_calls {
                            let input: serde_json::Value =
                                serde_json::from_str(&tc.arguments).unwrap_or_default();
                            blocks.push(ContentBlock::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input,
                            });
                        }
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => {
                    // Tool results travel as user-role tool_result blocks
                    let tool_call_id = msg.tool_call_id.clone().unwrap_or_default();
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Blocks(vec![ContentBlock::ToolResult {
                            tool_use_id: tool_call_id,
                            content: msg.content.clone(),
                        }]),
                    });
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);
        let api_messages = Self::to_api_messages(&messages);
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": max_tokens,
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = match request.tool_choice {
                ToolChoice::Auto => serde_json::json!({"type": "auto"}),
                ToolChoice::Required => serde_json::json!({"type": "any"}),
                ToolChoice::None => serde_json::json!({"type": "none"}),
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
        let url = format!("{}/v1/messages", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
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
        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self.send(&body, false, hooks).await?;
        let api_resp: AnthropicResponse = tokio::select! {
            _ = hooks.cancel.cancelled() => return Err(ProviderError::Cancelled),
            res = response.json() => res.map_err(|e| ProviderError::Protocol(
                format!("Failed to parse Anthropic response: {e}"),
            ))?,
        };

        Ok(Self::normalize_response(api_resp))
    }

    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        hooks: &CompletionHooks,
    ) -> std::result::Result<ChatResponse, ProviderError> {
        let body = self.build_body(request, true);
        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self.send(&body, true, hooks).await?;
        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut usage: Option<TokenUsage> = None;
        let mut input_tokens: u32 = 0;
        let mut stop_reason: Option<String> = None;
        let mut current_tool: Option<ToolAccumulator> = None;
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
                if frame.event.as_deref() == Some("message_stop") {
                    terminated = true;
                    break 'stream;
                }
                let data = frame.data.trim();
                if data.is_empty() {
                    continue;
                }
                // Some proxies drop the event: line; the type field in the
                // data payload is authoritative either way.
                let event: serde_json::Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                        continue;
                    }
                };

                match event["type"].as_str().unwrap_or("") {
                    "message_stop" => {
                        terminated = true;
                        break 'stream;
                    }
                    "message_start" => {
                        // input token count arrives up front
                        if let Some(inp) =
                            event["message"]["usage"]["input_tokens"].as_u64()
                        {
                            input_tokens = inp as u32;
                        }
                    }
                    "content_block_start" => {
                        let block = &event["content_block"];
                        if block["type"].as_str() == Some("tool_use") {
                            if let Some(acc) = current_tool.take() {
                                tool_calls.push(acc.into_tool_call());
                            }
                            current_tool = Some(ToolAccumulator {
                                id: block["id"].as_str().unwrap_or("").to_string(),
                                name: block["name"].as_str().unwrap_or("").to_string(),
                                arguments: String::new(),
                            });
                        }
                    }
                    "content_block_delta" => {
                        let delta = &event["delta"];
                        match delta["type"].as_str().unwrap_or("") {
                            "text_delta" => {
                                if let Some(text) = delta["text"].as_str() {
                                    hooks.emit_text(text);
                                    content.push_str(text);
                                }
                            }
                            "input_json_delta" => {
                                if let Some(partial) = delta["partial_json"].as_str() {
                                    if let Some(acc) = &mut current_tool {
                                        acc.arguments.push_str(partial);
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    "content_block_stop" => {
                        if let Some(acc) = current_tool.take() {
                            tool_calls.push(acc.into_tool_call());
                        }
                    }
                    "message_delta" => {
                        if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                            stop_reason = Some(reason.to_string());
                        }
                        if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                            let inp = event["usage"]["input_tokens"]
                                .as_u64()
                                .map(|v| v as u32)
                                .unwrap_or(input_tokens);
                            usage = Some(TokenUsage {
                                prompt_tokens: inp,
                                completion_tokens: out as u32,
                                total_tokens: inp + out as u32,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        if !terminated {
            return Err(ProviderError::Protocol(
                "stream ended without message_stop terminal event".into(),
            ));
        }
        if let Some(acc) = current_tool.take() {
            tool_calls.push(acc.into_tool_call());
        }

        let finish_reason = parse_stop_reason(stop_reason.as_deref(), &tool_calls);
        Ok(ChatResponse {
            model: request.model.clone(),
            choices: vec![Choice {
                message: assistant_message(content, tool_calls),
                finish_reason,
            }],
            usage,
        })
    }

    /// Convert an Anthropic response to the normalized shape.
    fn normalize_response(resp: AnthropicResponse) -> ChatResponse {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in &resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    });
                }
            }
        }

        let usage = Some(TokenUsage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        });
        let finish_reason = parse_stop_reason(resp.stop_reason.as_deref(), &tool_calls);

        ChatResponse {
            model: resp.model,
            choices: vec![Choice {
                message: assistant_message(text_content, tool_calls),
                finish_reason,
            }],
            usage,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
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
        // Anthropic doesn't have a models listing endpoint; return known models
        Ok(vec![
            "claude-sonnet-4-20250514".into(),
            "claude-opus-4-20250514".into(),
            "claude-3-5-haiku-20241022".into(),
        ])
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": "claude-3-5-haiku-20241022",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        // 200 = works, 401 = bad key, anything else = reachable but error
        Ok(response.status().is_success() || response.status().as_u16() != 401)
    }
}

fn parse_stop_reason(reason: Option<&str>, tool_calls: &[ToolCall]) -> FinishReason {
    match reason {
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        Some(_) => FinishReason::Stop,
        None if !tool_calls.is_empty() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    }
}

struct ToolAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolAccumulator {
    fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
