//! Responses-style adapter — structured "input items" protocol.
//!
//! The third wire shape: instead of a flat chat array, the request
//! carries a typed `input` array (`message`, `function_call`,
//! `function_call_output` items) with the system prompt as a top-level
//! `instructions` field, tools as flat objects, and streaming as typed
//! `response.*` events with a `response.completed` terminal carrying
//! usage.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

use crank_core::error::ProviderError;
use crank_core::message::{Message, Role, ToolCall};
use crank_core::provider::*;

use crate::sse::SseDecoder;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// A provider speaking the Responses-style input-items protocol.
pub struct ResponsesProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ResponsesProvider {
    /// Create a new Responses-style provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: "responses".into(),
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

    /// Extract system messages; they become the top-level `instructions`.
    fn extract_instructions(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut parts: Vec<&str> = Vec::new();
        let mut rest: Vec<&Message> = Vec::new();
        for msg in messages {
            match msg.role {
                Role::System => parts.push(&msg.content),
                _ => rest.push(msg),
            }
        }
        let instructions = if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        };
        (instructions, rest)
    }

    /// Convert messages to typed input items.
    fn to_input_items(messages: &[&Message]) -> Vec<InputItem> {
        let mut items = Vec::new();
        for msg in messages {
            match msg.role {
                Role::User => items.push(InputItem::Message {
                    role: "user".into(),
                    content: msg.content.clone(),
                }),
                Role::Assistant => {
                    if !msg.content.is_empty() {
                        items.push(InputItem::Message {
                            role: "assistant".into(),
                            content: msg.content.clone(),
                        });
                    }
                    // Each issued call is its own input item
                    for tc in &msg.tool_calls {
                        items.push(InputItem::FunctionCall {
                            call_id: tc.id.clone(),
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        });
                    }
                }
                Role::Tool => items.push(InputItem::FunctionCallOutput {
                    call_id: msg.tool_call_id.clone().unwrap_or_default(),
                    output: msg.content.clone(),
                }),
                Role::System => {} // handled separately
            }
        }
        items
    }

    /// Convert tool definitions to the flat Responses format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiTool> {
        tools
            .iter()
            .map(|t| ApiTool {
                r#type: "function".into(),
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect()
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let (instructions, messages) = Self::extract_instructions(&request.messages);
        let items = Self::to_input_items(&messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "input": items,
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(instructions) = instructions {
            body["instructions"] = serde_json::json!(instructions);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_output_tokens"] = serde_json::json!(max_tokens);
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
        let url = format!("{}/responses", self.base_url);
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
        let api_resp: ApiResponse = tokio::select! {
            _ = hooks.cancel.cancelled() => return Err(ProviderError::Cancelled),
            res = response.json() => res.map_err(|e| ProviderError::Protocol(
                format!("Failed to parse response: {e}"),
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
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(&body, true, hooks).await?;
        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        let mut content = String::new();
        // Function-call items keyed by output_index; BTreeMap keeps issue order.
        let mut calls: BTreeMap<u64, FunctionCallAccumulator> = BTreeMap::new();
        let mut terminal: Option<ApiResponse> = None;

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
                let event: serde_json::Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        trace!(provider = %self.name, data = %data, error = %e,
                            "Ignoring unparseable SSE event");
                        continue;
                    }
                };

                match event["type"].as_str().unwrap_or("") {
                    "response.output_text.delta" => {
                        if let Some(delta) = event["delta"].as_str() {
                            hooks.emit_text(delta);
                            content.push_str(delta);
                        }
                    }
                    "response.output_item.added" => {
                        let item = &event["item"];
                        if item["type"].as_str() == Some("function_call") {
                            let index = event["output_index"].as_u64().unwrap_or(0);
                            calls.insert(
                                index,
                                FunctionCallAccumulator {
                                    call_id: item["call_id"].as_str().unwrap_or("").to_string(),
                                    name: item["name"].as_str().unwrap_or("").to_string(),
                                    arguments: item["arguments"]
                                        .as_str()
                                        .unwrap_or("")
                                        .to_string(),
                                },
                            );
                        }
                    }
                    "response.function_call_arguments.delta" => {
                        let index = event["output_index"].as_u64().unwrap_or(0);
                        if let (Some(acc), Some(delta)) =
                            (calls.get_mut(&index), event["delta"].as_str())
                        {
                            acc.arguments.push_str(delta);
                        }
                    }
                    "response.completed" => {
                        match serde_json::from_value(event["response"].clone()) {
                            Ok(resp) => terminal = Some(resp),
                            Err(e) => {
                                return Err(ProviderError::Protocol(format!(
                                    "Malformed response.completed event: {e}"
                                )));
                            }
                        }
                        break 'stream;
                    }
                    "response.failed" => {
                        let message = event["response"]["error"]["message"]
                            .as_str()
                            .unwrap_or("response.failed")
                            .to_string();
                        return Err(ProviderError::ApiError {
                            status_code: 200,
                            message,
                        });
                    }
                    _ => {}
                }
            }
        }

        let Some(terminal) = terminal else {
            return Err(ProviderError::Protocol(
                "stream ended without response.completed terminal event".into(),
            ));
        };

        let tool_calls: Vec<ToolCall> = calls
            .into_values()
            .map(FunctionCallAccumulator::into_tool_call)
            .collect();
        let finish_reason = finish_reason_of(&terminal, &tool_calls);

        Ok(ChatResponse {
            model: terminal.model,
            choices: vec![Choice {
                message: assistant_message(content, tool_calls),
                finish_reason,
            }],
            usage: terminal.usage.map(ApiUsage::into_usage),
        })
    }

    /// Convert a complete Responses payload to the normalized shape.
    fn normalize_response(resp: ApiResponse) -> ChatResponse {
        let mut content = String::new();
        let mut tool_calls = Vec::new();

        for item in &resp.output {
            match item {
                OutputItem::Message { content: parts, .. } => {
                    for part in parts {
                        if part.r#type == "output_text" {
                            if !content.is_empty() {
                                content.push('\n');
                            }
                            content.push_str(&part.text);
                        }
                    }
                }
                OutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => {
                    tool_calls.push(ToolCall {
                        id: call_id.clone(),
                        name: name.clone(),
                        arguments: arguments.clone(),
                    });
                }
                OutputItem::Other => {}
            }
        }

        let finish_reason = finish_reason_of(&resp, &tool_calls);
        ChatResponse {
            model: resp.model,
            choices: vec![Choice {
                message: assistant_message(content, tool_calls),
                finish_reason,
            }],
            usage: resp.usage.map(ApiUsage::into_usage),
        }
    }
}

#[async_trait]
impl Provider for ResponsesProvider {
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

        Ok(body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn finish_reason_of(resp: &ApiResponse, tool_calls: &[ToolCall]) -> FinishReason {
    if resp.status.as_deref() == Some("incomplete") {
        return match resp
            .incomplete_details
            .as_ref()
            .map(|d| d.reason.as_str())
        {
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Length,
        };
    }
    if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
    }
}

struct FunctionCallAccumulator {
    call_id: String,
    name: String,
    arguments: String,
}

impl FunctionCallAccumulator {
    fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: self.call_id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

// --- Responses API types ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum InputItem {
    #[serde(rename = "message")]
    Message { role: String, content: String },
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiTool {
    r#type: String,
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum OutputItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        role: String,
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    r#type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
    total_tokens: u32,
}

impl ApiUsage {
    fn into_usage(self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor() {
        let provider = ResponsesProvider::new("sk-test");
        assert_eq!(provider.name(), "responses");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn instructions_extraction() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let (instructions, rest) = ResponsesProvider::extract_instructions(&messages);
        assert_eq!(instructions.as_deref(), Some("You are helpful"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn assistant_with_calls_becomes_separate_items() {
        let msg = Message::assistant_with_calls(
            "Working on it",
            vec![
                ToolCall {
                    id: "call_1".into(),
                    name: "file_read".into(),
                    arguments: r#"{"path":"a.txt"}"#.into(),
                },
                ToolCall {
                    id: "call_2".into(),
                    name: "shell".into(),
                    arguments: r#"{"command":"ls"}"#.into(),
                },
            ],
        );
        let refs: Vec<&Message> = vec![&msg];
        let items = ResponsesProvider::to_input_items(&refs);
        // 1 message item + 2 function_call items
        assert_eq!(items.len(), 3);
        match &items[1] {
            InputItem::FunctionCall { call_id, name, .. } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(name, "file_read");
            }
            _ => panic!("Expected function_call item"),
        }
    }

    #[test]
    fn tool_result_becomes_function_call_output() {
        let msg = Message::tool_result("call_1", "file contents");
        let refs: Vec<&Message> = vec![&msg];
        let items = ResponsesProvider::to_input_items(&refs);
        match &items[0] {
            InputItem::FunctionCallOutput { call_id, output } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(output, "file contents");
            }
            _ => panic!("Expected function_call_output item"),
        }
    }

    #[test]
    fn input_item_serialization() {
        let item = InputItem::FunctionCallOutput {
            call_id: "call_9".into(),
            output: "ok".into(),
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains(r#""type":"function_call_output""#));
        assert!(json.contains(r#""call_id":"call_9""#));
    }

    #[test]
    fn flat_tool_serialization() {
        let tools = ResponsesProvider::to_api_tools(&[ToolDefinition {
            name: "fetch".into(),
            description: "Fetch a URL".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]);
        let json = serde_json::to_string(&tools[0]).unwrap();
        // Flat shape: name at top level, not nested under "function"
        assert!(json.contains(r#""name":"fetch""#));
        assert!(!json.contains(r#""function""#));
    }

    #[test]
    fn normalize_text_response() {
        let resp: ApiResponse = serde_json::from_str(
            r#"{
                "id": "resp_1",
                "model": "gpt-4o",
                "status": "completed",
                "output": [
                    {"type": "message", "role": "assistant",
                     "content": [{"type": "output_text", "text": "Hello!"}]}
                ],
                "usage": {"input_tokens": 12, "output_tokens": 3, "total_tokens": 15}
            }"#,
        )
        .unwrap();

        let normalized = ResponsesProvider::normalize_response(resp);
        assert_eq!(normalized.usage.unwrap().prompt_tokens, 12);
        let choice = normalized.into_choice().unwrap();
        assert_eq!(choice.message.content, "Hello!");
        assert_eq!(choice.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn normalize_function_call_response() {
        let resp: ApiResponse = serde_json::from_str(
            r#"{
                "id": "resp_2",
                "model": "gpt-4o",
                "status": "completed",
                "output": [
                    {"type": "function_call", "call_id": "call_7",
                     "name": "calculator", "arguments": "{\"expression\":\"6*7\"}"}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 8, "total_tokens": 28}
            }"#,
        )
        .unwrap();

        let choice = ResponsesProvider::normalize_response(resp).into_choice().unwrap();
        assert_eq!(choice.finish_reason, FinishReason::ToolCalls);
        assert_eq!(choice.message.tool_calls.len(), 1);
        assert_eq!(choice.message.tool_calls[0].id, "call_7");
    }

    #[test]
    fn incomplete_maps_to_length() {
        let resp: ApiResponse = serde_json::from_str(
            r#"{
                "id": "resp_3",
                "model": "gpt-4o",
                "status": "incomplete",
                "incomplete_details": {"reason": "max_output_tokens"},
                "output": [
                    {"type": "message", "role": "assistant",
                     "content": [{"type": "output_text", "text": "truncated..."}]}
                ]
            }"#,
        )
        .unwrap();

        let choice = ResponsesProvider::normalize_response(resp).into_choice().unwrap();
        assert_eq!(choice.finish_reason, FinishReason::Length);
    }

    #[test]
    fn unknown_output_items_are_skipped() {
        let resp: ApiResponse = serde_json::from_str(
            r#"{
                "id": "resp_4",
                "model": "gpt-4o",
                "status": "completed",
                "output": [
                    {"type": "reasoning", "summary": []},
                    {"type": "message", "role": "assistant",
                     "content": [{"type": "output_text", "text": "done"}]}
                ]
            }"#,
        )
        .unwrap();

        let choice = ResponsesProvider::normalize_response(resp).into_choice().unwrap();
        assert_eq!(choice.message.content, "done");
    }
}
