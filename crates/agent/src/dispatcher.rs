//! Tool dispatcher — resolves and executes model-issued tool calls.
//!
//! All calls from one assistant turn execute concurrently; the dispatcher
//! waits for every one to settle and returns tool-result messages in the
//! original call order. Malformed arguments, unknown names, handler
//! failures, and approval denials all become structured `{"error": …}`
//! results fed back to the model — never loop failures.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crank_core::approval::ApprovalRequest;
use crank_core::event::{EventBus, RuntimeEvent};
use crank_core::message::{Message, ToolCall};
use crank_core::tool::{Tool, ToolRegistry};

use crate::approval::ApprovalGate;

/// Executes the tool calls of one iteration.
pub struct ToolDispatcher {
    registry: ToolRegistry,
    gate: Arc<ApprovalGate>,
    events: Arc<EventBus>,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, gate: Arc<ApprovalGate>, events: Arc<EventBus>) -> Self {
        Self {
            registry,
            gate,
            events,
        }
    }

    /// Execute all calls concurrently; results come back in call order.
    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<Message> {
        // join_all preserves input order regardless of completion timing
        join_all(calls.iter().map(|call| self.dispatch_one(call))).await
    }

    async fn dispatch_one(&self, call: &ToolCall) -> Message {
        let args = if call.arguments.trim().is_empty() {
            Ok(serde_json::json!({}))
        } else {
            serde_json::from_str::<serde_json::Value>(&call.arguments)
        };

        self.events.publish(RuntimeEvent::ToolStarted {
            call_id: call.id.clone(),
            name: call.name.clone(),
            args: args.as_ref().cloned().unwrap_or(serde_json::Value::Null),
            timestamp: chrono::Utc::now(),
        });

        let started = Instant::now();
        let payload = match args {
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Malformed tool arguments");
                self.completed(call, false, started);
                error_payload(format!("Invalid JSON arguments: {e}"))
            }
            Ok(args) => match self.registry.get(&call.name) {
                None => {
                    warn!(tool = %call.name, "Unknown tool requested");
                    self.completed(call, false, started);
                    error_payload(format!("Unknown tool: {}", call.name))
                }
                Some(tool) => {
                    let request = ApprovalRequest {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        args: args.clone(),
                    };
                    if !self.gate.decide(&request).await.is_allowed() {
                        debug!(tool = %call.name, "Tool call denied by approval gate");
                        self.events.publish(RuntimeEvent::ToolDenied {
                            call_id: call.id.clone(),
                            name: call.name.clone(),
                            timestamp: chrono::Utc::now(),
                        });
                        error_payload(format!(
                            "Tool call denied by the approval gate: {}",
                            call.name
                        ))
                    } else {
                        match tool.execute(args).await {
                            Ok(output) => {
                                self.completed(call, true, started);
                                serde_json::json!({ "result": output })
                            }
                            Err(e) => {
                                warn!(tool = %call.name, error = %e, "Tool execution failed");
                                self.completed(call, false, started);
                                error_payload(e.to_string())
                            }
                        }
                    }
                }
            },
        };

        Message::tool_result(call.id.clone(), payload.to_string())
    }

    fn completed(&self, call: &ToolCall, success: bool, started: Instant) {
        self.events.publish(RuntimeEvent::ToolCompleted {
            call_id: call.id.clone(),
            name: call.name.clone(),
            success,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });
    }
}

fn error_payload(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}
