//! LLM provider adapters for Crank.
//!
//! Each backend speaks a structurally different wire protocol; every
//! adapter implements `crank_core::Provider` and normalizes to the same
//! internal `ChatResponse`, so the agent loop never branches on backend
//! identity. `RetryProvider` wraps any of them with backoff.

pub mod anthropic;
pub mod openai_compat;
pub mod responses;
pub mod retry;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use responses::ResponsesProvider;
pub use retry::{RetryPolicy, RetryProvider};
pub use sse::{SseDecoder, SseFrame};
