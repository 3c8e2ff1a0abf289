//! The Crank orchestration engine.
//!
//! The agent follows a **request → execute → respond** cycle:
//!
//! 1. **Seed** a message list (system prompt + history + user prompt)
//! 2. **Request** a completion from the provider adapter
//! 3. **If tool calls**: gate, execute concurrently, append results, loop
//! 4. **If truncated**: append a continue instruction, loop
//! 5. **If text**: terminate (after bounded nudges when the text only
//!    describes work instead of doing it)
//!
//! Sub-agent delegation is itself exposed as a tool, so the model can
//! fan out nested loops with restricted tool sets.

pub mod approval;
pub mod budget;
pub mod dispatcher;
pub mod loop_runner;
pub mod nudge;
pub mod subagent;

pub use approval::{ApprovalGate, SAFE_TOOLS};
pub use budget::{ContextBudget, UsageTotals};
pub use dispatcher::ToolDispatcher;
pub use loop_runner::{AgentConfig, AgentLoop, AgentResult, RunOutcome, Termination};
pub use nudge::{NudgePredicate, looks_like_unexecuted_work};
pub use subagent::DelegateTool;
