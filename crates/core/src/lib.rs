//! # Crank Core
//!
//! Domain types, traits, and error definitions for the Crank agent
//! runtime. This crate has **zero framework dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in
//! their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod approval;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use approval::{ApprovalDecision, ApprovalRequest, ApprovalSource};
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{AgentStatus, EventBus, RuntimeEvent};
pub use message::{Message, Role, ToolCall};
pub use provider::{
    ChatRequest, ChatResponse, Choice, CompletionHooks, FinishReason, Provider, TokenUsage,
    ToolChoice, ToolDefinition,
};
pub use tool::{Tool, ToolRegistry};
