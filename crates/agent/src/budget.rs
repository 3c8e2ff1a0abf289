//! Context budget management — usage accounting and history compaction.
//!
//! Providers report the actual context size of each request in
//! `usage.prompt_tokens`; that latest figure, not the cumulative sum, is
//! what gets compared against the model's context window. When the
//! latest prompt crosses the compaction threshold, older history is
//! folded into a one-message digest.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crank_core::message::{Message, Role};
use crank_core::provider::TokenUsage;

/// Fraction of the context window that triggers compaction.
const COMPACT_THRESHOLD: f64 = 0.80;

/// Fraction of the window past which compaction keeps fewer messages.
const AGGRESSIVE_THRESHOLD: f64 = 0.90;

/// Non-system messages kept by a normal compaction.
const KEEP_RECENT: usize = 20;

/// Non-system messages kept by an aggressive compaction.
const KEEP_RECENT_AGGRESSIVE: usize = 12;

/// Maximum characters of a dropped message quoted in the digest.
const DIGEST_CLIP: usize = 100;

/// Accumulated token usage across one run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Sum of prompt tokens across all requests
    pub prompt_tokens: u64,

    /// Sum of completion tokens across all requests
    pub completion_tokens: u64,

    /// Sum of total tokens across all requests
    pub total_tokens: u64,

    /// Prompt tokens of the most recent request — the actual current
    /// context size, compared against the window
    pub latest_prompt_tokens: u32,
}

/// Tracks usage for one run and decides when history must shrink.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    context_window: u32,
    totals: UsageTotals,
}

impl ContextBudget {
    pub fn new(context_window: u32) -> Self {
        Self {
            context_window,
            totals: UsageTotals::default(),
        }
    }

    /// Record one response's usage.
    pub fn record_usage(&mut self, usage: &TokenUsage) {
        self.totals.prompt_tokens += u64::from(usage.prompt_tokens);
        self.totals.completion_tokens += u64::from(usage.completion_tokens);
        self.totals.total_tokens += u64::from(usage.total_tokens);
        self.totals.latest_prompt_tokens = usage.prompt_tokens;
    }

    pub fn totals(&self) -> UsageTotals {
        self.totals
    }

    fn window_fraction(&self) -> f64 {
        if self.context_window == 0 {
            return 0.0;
        }
        f64::from(self.totals.latest_prompt_tokens) / f64::from(self.context_window)
    }

    /// Whether the latest prompt has crossed the compaction threshold.
    pub fn should_compact(&self) -> bool {
        self.window_fraction() >= COMPACT_THRESHOLD
    }

    /// Produce a compacted replacement history.
    ///
    /// All system messages survive. Of the remainder, the most recent N
    /// are kept (N shrinks when usage is past the aggressive threshold)
    /// and everything older is replaced with a single synthetic system
    /// digest. Below threshold, or when nothing would be dropped, the
    /// input is returned unchanged.
    pub fn compact(&self, history: &[Message]) -> Vec<Message> {
        if !self.should_compact() {
            return history.to_vec();
        }

        let keep_recent = if self.window_fraction() >= AGGRESSIVE_THRESHOLD {
            KEEP_RECENT_AGGRESSIVE
        } else {
            KEEP_RECENT
        };

        let (system, rest): (Vec<&Message>, Vec<&Message>) =
            history.iter().partition(|m| m.role == Role::System);

        if rest.len() <= keep_recent {
            return history.to_vec();
        }

        let split = rest.len() - keep_recent;
        let (dropped, kept) = rest.split_at(split);

        let mut digest = String::from(
            "Earlier conversation was compacted. Facts and decisions from dropped messages:\n",
        );
        for msg in dropped {
            digest.push_str(&format!(
                "- {}: {}\n",
                role_label(msg.role),
                clip(&msg.content)
            ));
        }

        debug!(
            dropped = dropped.len(),
            kept = kept.len(),
            latest_prompt_tokens = self.totals.latest_prompt_tokens,
            "Compacted conversation history"
        );

        let mut out: Vec<Message> = system.into_iter().cloned().collect();
        out.push(Message::system(digest));
        out.extend(kept.iter().map(|m| (*m).clone()));
        out
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// One line, clipped to the digest budget.
fn clip(content: &str) -> String {
    let line = content.lines().next().unwrap_or("");
    if line.chars().count() <= DIGEST_CLIP {
        line.to_string()
    } else {
        let clipped: String = line.chars().take(DIGEST_CLIP).collect();
        format!("{clipped}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: 10,
            total_tokens: prompt + 10,
        }
    }

    fn chat_history(n: usize) -> Vec<Message> {
        let mut history = vec![Message::system("You are a coding agent")];
        for i in 0..n {
            history.push(Message::user(format!("question {i}")));
            history.push(Message::assistant(format!("answer {i}")));
        }
        history
    }

    #[test]
    fn records_cumulative_and_latest() {
        let mut budget = ContextBudget::new(1000);
        budget.record_usage(&usage(100));
        budget.record_usage(&usage(300));

        let totals = budget.totals();
        assert_eq!(totals.prompt_tokens, 400);
        assert_eq!(totals.latest_prompt_tokens, 300);
        assert_eq!(totals.completion_tokens, 20);
    }

    #[test]
    fn latest_not_cumulative_drives_compaction() {
        let mut budget = ContextBudget::new(1000);
        // Cumulative prompt far exceeds the window, but the latest
        // request was small — no compaction.
        for _ in 0..10 {
            budget.record_usage(&usage(500));
        }
        budget.record_usage(&usage(100));
        assert!(!budget.should_compact());

        budget.record_usage(&usage(800));
        assert!(budget.should_compact());
    }

    #[test]
    fn below_threshold_returns_input_unchanged() {
        let mut budget = ContextBudget::new(1000);
        budget.record_usage(&usage(500)); // 50% < 80%

        let history = chat_history(30);
        let compacted = budget.compact(&history);
        assert_eq!(compacted.len(), history.len());
    }

    #[test]
    fn compaction_keeps_system_and_recent() {
        let mut budget = ContextBudget::new(1000);
        budget.record_usage(&usage(850)); // 85% — normal compaction, keep 20

        let history = chat_history(30); // 1 system + 60 non-system
        let compacted = budget.compact(&history);

        // system + digest + 20 recent
        assert_eq!(compacted.len(), 22);
        assert_eq!(compacted[0].role, Role::System);
        assert_eq!(compacted[0].content, "You are a coding agent");
        assert!(compacted[1].content.contains("compacted"));
        assert!(compacted[1].content.contains("Facts and decisions"));
        // Most recent message survives
        assert_eq!(compacted.last().unwrap().content, "answer 29");
    }

    #[test]
    fn aggressive_compaction_keeps_fewer() {
        let mut budget = ContextBudget::new(1000);
        budget.record_usage(&usage(950)); // 95% — keep 12

        let history = chat_history(30);
        let compacted = budget.compact(&history);
        assert_eq!(compacted.len(), 14); // system + digest + 12
    }

    #[test]
    fn compaction_is_monotonic() {
        let mut budget = ContextBudget::new(1000);
        budget.record_usage(&usage(900));

        for n in [0, 5, 11, 30] {
            let history = chat_history(n);
            let compacted = budget.compact(&history);
            assert!(compacted.len() <= history.len(), "grew at n={n}");
            let system_in = history.iter().filter(|m| m.role == Role::System).count();
            let system_out = compacted
                .iter()
                .filter(|m| m.role == Role::System && !m.content.contains("compacted"))
                .count();
            assert_eq!(system_in, system_out, "lost system messages at n={n}");
        }
    }

    #[test]
    fn nothing_to_drop_returns_input_unchanged() {
        let mut budget = ContextBudget::new(1000);
        budget.record_usage(&usage(850));

        let history = chat_history(5); // 10 non-system <= 20
        let compacted = budget.compact(&history);
        assert_eq!(compacted.len(), history.len());
        assert!(!compacted.iter().any(|m| m.content.contains("compacted")));
    }

    #[test]
    fn digest_clips_long_content() {
        let long = "x".repeat(500);
        assert_eq!(clip(&long).chars().count(), DIGEST_CLIP + 1); // + ellipsis
        assert_eq!(clip("short"), "short");
        assert_eq!(clip("first line\nsecond line"), "first line");
    }
}
