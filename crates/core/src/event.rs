//! Runtime event system — observer hooks for host presentation and telemetry.
//!
//! The engine publishes lifecycle events as it works; hosts subscribe to
//! render spinners, tool status lines, and retry notices. Publishing with
//! no subscribers is a no-op, which is what makes every hook optional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Discrete engine states, for host status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Waiting on a completion request
    Thinking,
    /// Executing tool calls
    Tool,
    /// Waiting on a human approval decision
    Approval,
    /// Backing off before a provider retry
    Retrying,
    /// Between runs
    Idle,
}

/// All events the engine emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuntimeEvent {
    /// A tool call began executing
    ToolStarted {
        call_id: String,
        name: String,
        args: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// A tool call finished (successfully or with a tool-level error)
    ToolCompleted {
        call_id: String,
        name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was denied by the approval gate
    ToolDenied {
        call_id: String,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// Incremental assistant text from the provider stream
    TextChunk { content: String },

    /// The provider adapter is about to back off and retry
    Retry {
        attempt: u32,
        max_attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// The engine moved to a new state
    Status { status: AgentStatus },
}

/// A broadcast-based event bus for runtime events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Components
/// subscribe and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<RuntimeEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RuntimeEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Publish a status transition.
    pub fn status(&self, status: AgentStatus) {
        self.publish(RuntimeEvent::Status { status });
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RuntimeEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(RuntimeEvent::ToolCompleted {
            call_id: "call_1".into(),
            name: "shell".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            RuntimeEvent::ToolCompleted { name, success, .. } => {
                assert_eq!(name, "shell");
                assert!(success);
            }
            _ => panic!("Expected ToolCompleted event"),
        }
    }

    #[tokio::test]
    async fn status_transitions() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.status(AgentStatus::Thinking);
        bus.status(AgentStatus::Idle);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RuntimeEvent::Status { status } = event.as_ref() {
                seen.push(*status);
            }
        }
        assert_eq!(seen, [AgentStatus::Thinking, AgentStatus::Idle]);
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        // Publishing with no subscribers should not panic
        bus.publish(RuntimeEvent::TextChunk {
            content: "no subscribers".into(),
        });
    }
}
