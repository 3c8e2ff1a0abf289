//! The agent reasoning loop implementation.
//!
//! `run` seeds a message list from the system prompt, prior history, and
//! the user prompt, then iterates: request a completion, execute any tool
//! calls concurrently, append results, repeat. Termination is a plain
//! text answer (optionally after corrective nudges), a designated
//! completion tool, the iteration bound, cancellation, or a protocol
//! failure — always reported as a well-formed [`AgentResult`], never a
//! panic or a raw error.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crank_core::error::ProviderError;
use crank_core::event::{AgentStatus, EventBus, RuntimeEvent};
use crank_core::message::{Message, ToolCall};
use crank_core::provider::{
    ChatRequest, CompletionHooks, FinishReason, Provider, ToolChoice, ToolDefinition,
};
use crank_core::tool::ToolRegistry;

use crate::approval::ApprovalGate;
use crate::budget::{ContextBudget, UsageTotals};
use crate::dispatcher::ToolDispatcher;
use crate::nudge::{NudgePredicate, looks_like_unexecuted_work};

/// How a run decides it is finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A plain text response (after any nudges) is the answer.
    OnText,
    /// Tool use is forced every turn; the run ends only when the named
    /// tool is invoked, its `result` argument becoming the answer.
    OnCompletionTool { tool: String },
}

/// Configuration for one agent loop instance.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier passed through to the provider
    pub model: String,

    /// System prompt seeded at the head of every run (empty = none)
    pub system_prompt: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Max tokens per completion
    pub max_tokens: Option<u32>,

    /// Iteration bound per run
    pub max_iterations: u32,

    /// Corrective nudges allowed per run
    pub max_nudges: u32,

    /// The model's context window, for compaction decisions
    pub context_window: u32,

    /// Termination discipline
    pub termination: Termination,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: String::new(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: 30,
            max_nudges: 2,
            context_window: 128_000,
            termination: Termination::OnText,
        }
    }
}

/// Terminal classification of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model produced a final answer
    Completed,
    /// The iteration bound was reached first
    MaxIterations,
    /// The caller raised the cancellation signal
    Aborted,
    /// A protocol or provider failure ended the run
    Failed,
}

/// The result of one `run` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// The final answer, or a human-readable account of the failure
    pub answer: String,

    /// How the run ended
    pub outcome: RunOutcome,

    /// Iterations consumed
    pub iterations: u32,

    /// Token usage across the run
    pub usage: UsageTotals,
}

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    config: AgentConfig,
    gate: Arc<ApprovalGate>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
    nudge: Arc<NudgePredicate>,
}

impl AgentLoop {
    /// Create a new agent loop over a provider and a tool registry.
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
            gate: Arc::new(ApprovalGate::new(None)),
            events: Arc::new(EventBus::default()),
            cancel: CancellationToken::new(),
            nudge: Arc::new(looks_like_unexecuted_work),
        }
    }

    /// Attach an approval gate. Where the gate is instantiated decides
    /// the scope of its "always" caches (per run vs per session).
    pub fn with_gate(mut self, gate: Arc<ApprovalGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Attach an event bus for lifecycle observation.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Attach a cancellation token; cancelling it aborts the run.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the described-but-unexecuted-work heuristic.
    pub fn with_nudge_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.nudge = Arc::new(predicate);
        self
    }

    /// Run the loop to completion for one prompt.
    ///
    /// `history` is prior conversation the host wants threaded in; the
    /// run owns its own copy and the host keeps persistence.
    pub async fn run(&self, prompt: &str, history: Vec<Message>) -> AgentResult {
        info!(
            model = %self.config.model,
            tools = self.tools.len(),
            history = history.len(),
            "Starting agent run"
        );

        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.config.system_prompt.is_empty() {
            messages.push(Message::system(&self.config.system_prompt));
        }
        messages.extend(history);
        messages.push(Message::user(prompt));

        let mut budget = ContextBudget::new(self.config.context_window);
        let mut nudges_used = 0u32;
        let hooks = self.completion_hooks();
        let dispatcher =
            ToolDispatcher::new(self.tools.clone(), self.gate.clone(), self.events.clone());

        let mut tool_defs = self.tools.definitions();
        let tool_choice = match &self.config.termination {
            Termination::OnCompletionTool { tool } => {
                tool_defs.push(completion_tool_definition(tool));
                ToolChoice::Required
            }
            Termination::OnText => ToolChoice::Auto,
        };

        let mut iterations = 0u32;
        while iterations < self.config.max_iterations {
            iterations += 1;
            debug!(iteration = iterations, "Agent loop iteration");

            if budget.should_compact() {
                messages = budget.compact(&messages);
            }

            self.events.status(AgentStatus::Thinking);
            let request = ChatRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                tools: tool_defs.clone(),
                tool_choice,
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };

            let response = match self.provider.complete(&request, &hooks).await {
                Ok(response) => response,
                Err(ProviderError::Cancelled) => {
                    info!(iterations, "Run aborted by caller");
                    return self.finish(
                        "Run aborted by caller.".into(),
                        RunOutcome::Aborted,
                        iterations,
                        &budget,
                    );
                }
                Err(e) => {
                    warn!(iterations, error = %e, "Provider request failed, ending run");
                    return self.finish(
                        format!("Provider request failed: {e}"),
                        RunOutcome::Failed,
                        iterations,
                        &budget,
                    );
                }
            };

            if let Some(usage) = &response.usage {
                budget.record_usage(usage);
            }

            let Some(choice) = response.into_choice() else {
                warn!(iterations, "Provider returned an empty choice list");
                return self.finish(
                    "Provider returned an empty choice list.".into(),
                    RunOutcome::Failed,
                    iterations,
                    &budget,
                );
            };

            match choice.finish_reason {
                FinishReason::ToolCalls => {
                    let calls = choice.message.tool_calls.clone();
                    if calls.is_empty() {
                        return self.finish(
                            "Backend reported tool_calls but delivered no calls.".into(),
                            RunOutcome::Failed,
                            iterations,
                            &budget,
                        );
                    }

                    if let Termination::OnCompletionTool { tool } = &self.config.termination {
                        if let Some(answer) = completion_answer(&calls, tool) {
                            return self.finish(
                                answer,
                                RunOutcome::Completed,
                                iterations,
                                &budget,
                            );
                        }
                    }

                    messages.push(choice.message);
                    self.events.status(AgentStatus::Tool);
                    let results = dispatcher.dispatch_all(&calls).await;
                    messages.extend(results);
                }

                FinishReason::Length => {
                    debug!("Response truncated at the token limit, continuing");
                    messages.push(choice.message);
                    messages.push(Message::user(
                        "Your previous message was cut off. Continue exactly where you left off.",
                    ));
                }

                FinishReason::Stop | FinishReason::ContentFilter => {
                    let text = choice.message.content.clone();
                    match &self.config.termination {
                        Termination::OnCompletionTool { tool } => {
                            // Text despite forced tool use: steer back.
                            messages.push(choice.message);
                            messages.push(Message::user(format!(
                                "Use the provided tools for every step, and call \
                                 `{tool}` with your final result when you are done."
                            )));
                        }
                        Termination::OnText => {
                            if nudges_used < self.config.max_nudges
                                && !self.tools.is_empty()
                                && (self.nudge)(&text)
                            {
                                nudges_used += 1;
                                info!(
                                    nudges_used,
                                    "Response describes work without executing it, nudging"
                                );
                                messages.push(choice.message);
                                messages.push(Message::user(
                                    "Do not describe the work — perform it by calling the \
                                     available tools now.",
                                ));
                            } else {
                                return self.finish(
                                    text,
                                    RunOutcome::Completed,
                                    iterations,
                                    &budget,
                                );
                            }
                        }
                    }
                }
            }
        }

        warn!(
            max_iterations = self.config.max_iterations,
            "Max iterations reached without a final answer"
        );
        self.finish(
            "Reached the maximum number of iterations without a final answer.".into(),
            RunOutcome::MaxIterations,
            iterations,
            &budget,
        )
    }

    fn finish(
        &self,
        answer: String,
        outcome: RunOutcome,
        iterations: u32,
        budget: &ContextBudget,
    ) -> AgentResult {
        self.events.status(AgentStatus::Idle);
        AgentResult {
            answer,
            outcome,
            iterations,
            usage: budget.totals(),
        }
    }

    fn completion_hooks(&self) -> CompletionHooks {
        let text_events = self.events.clone();
        let retry_events = self.events.clone();
        CompletionHooks {
            on_text: Some(Arc::new(move |delta: &str| {
                text_events.publish(RuntimeEvent::TextChunk {
                    content: delta.to_string(),
                });
            })),
            on_retry: Some(Arc::new(move |attempt, max_attempts, error: &str| {
                retry_events.status(AgentStatus::Retrying);
                retry_events.publish(RuntimeEvent::Retry {
                    attempt,
                    max_attempts,
                    error: error.to_string(),
                    timestamp: chrono::Utc::now(),
                });
            })),
            cancel: self.cancel.clone(),
        }
    }
}

/// Schema advertised for the completion tool in
/// [`Termination::OnCompletionTool`] mode.
fn completion_tool_definition(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: "Report the final result of the task. Call this exactly once, \
                      when the task is complete."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "The final answer to return to the caller"
                }
            },
            "required": ["result"]
        }),
    }
}

/// Extract the completion tool's `result` string, if it was invoked.
fn completion_answer(calls: &[ToolCall], tool: &str) -> Option<String> {
    calls.iter().find(|c| c.name == tool).and_then(|c| {
        serde_json::from_str::<serde_json::Value>(&c.arguments)
            .ok()
            .and_then(|args| args["result"].as_str().map(String::from))
    })
}
