//! Approval gate — decides whether a tool invocation may proceed.
//!
//! Read-only tools are safe-listed and never consult the decision
//! source. Everything else checks the session allow/deny caches, then
//! queues for the external source (typically a human). Concurrent
//! requests are serialized through one FIFO queue so a reviewer is
//! never asked to decide two things at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crank_core::approval::{ApprovalDecision, ApprovalRequest, ApprovalSource};

/// Tools that always proceed without consulting the gate.
pub const SAFE_TOOLS: &[&str] = &["file_read", "glob", "search", "fetch", "todo_read"];

/// The per-run (or per-session, where the host chooses) approval gate.
pub struct ApprovalGate {
    source: Option<Arc<dyn ApprovalSource>>,
    always_allow: Mutex<HashSet<String>>,
    always_deny: Mutex<HashSet<String>>,
    /// Serializes prompts to the decision source.
    queue: tokio::sync::Mutex<()>,
}

impl ApprovalGate {
    /// Create a gate over an optional decision source. With no source,
    /// every tool proceeds unchallenged.
    pub fn new(source: Option<Arc<dyn ApprovalSource>>) -> Self {
        Self {
            source,
            always_allow: Mutex::new(HashSet::new()),
            always_deny: Mutex::new(HashSet::new()),
            queue: tokio::sync::Mutex::new(()),
        }
    }

    /// Whether a tool name is on the fixed safe list.
    pub fn is_safe(name: &str) -> bool {
        SAFE_TOOLS.contains(&name)
    }

    /// Decide whether one tool invocation may proceed.
    pub async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        if Self::is_safe(&request.name) {
            return ApprovalDecision::AllowOnce;
        }
        if let Some(decision) = self.cached(&request.name) {
            return decision;
        }
        let Some(source) = &self.source else {
            return ApprovalDecision::AllowOnce;
        };

        // One reviewer, one question at a time.
        let _turn = self.queue.lock().await;

        // An earlier queued request may have answered "always" for this
        // tool while we waited.
        if let Some(decision) = self.cached(&request.name) {
            return decision;
        }

        let decision = source.decide(request).await;
        match decision {
            ApprovalDecision::AllowAlways => {
                debug!(tool = %request.name, "Caching allow-always decision");
                self.always_allow
                    .lock()
                    .expect("approval cache poisoned")
                    .insert(request.name.clone());
            }
            ApprovalDecision::DenyAlways => {
                debug!(tool = %request.name, "Caching deny-always decision");
                self.always_deny
                    .lock()
                    .expect("approval cache poisoned")
                    .insert(request.name.clone());
            }
            _ => {}
        }
        decision
    }

    fn cached(&self, name: &str) -> Option<ApprovalDecision> {
        if self
            .always_allow
            .lock()
            .expect("approval cache poisoned")
            .contains(name)
        {
            return Some(ApprovalDecision::AllowAlways);
        }
        if self
            .always_deny
            .lock()
            .expect("approval cache poisoned")
            .contains(name)
        {
            return Some(ApprovalDecision::DenyAlways);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct ScriptedSource {
        decision: ApprovalDecision,
        calls: AtomicU32,
        /// Guards against overlapping presentations.
        active: AtomicU32,
        overlapped: AtomicU32,
    }

    impl ScriptedSource {
        fn new(decision: ApprovalDecision) -> Self {
            Self {
                decision,
                calls: AtomicU32::new(0),
                active: AtomicU32::new(0),
                overlapped: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ApprovalSource for ScriptedSource {
        async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.decision
        }
    }

    fn request(name: &str) -> ApprovalRequest {
        ApprovalRequest {
            tool_call_id: "call_1".into(),
            name: name.into(),
            args: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn safe_tools_never_consult_source() {
        let source = Arc::new(ScriptedSource::new(ApprovalDecision::DenyAlways));
        let gate = ApprovalGate::new(Some(source.clone()));

        for name in SAFE_TOOLS {
            let decision = gate.decide(&request(name)).await;
            assert!(decision.is_allowed(), "{name} should be safe");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_source_allows_everything() {
        let gate = ApprovalGate::new(None);
        let decision = gate.decide(&request("shell")).await;
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn allow_always_stops_further_prompts() {
        let source = Arc::new(ScriptedSource::new(ApprovalDecision::AllowAlways));
        let gate = ApprovalGate::new(Some(source.clone()));

        for _ in 0..5 {
            let decision = gate.decide(&request("shell")).await;
            assert_eq!(decision, ApprovalDecision::AllowAlways);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deny_always_is_cached_too() {
        let source = Arc::new(ScriptedSource::new(ApprovalDecision::DenyAlways));
        let gate = ApprovalGate::new(Some(source.clone()));

        assert_eq!(
            gate.decide(&request("file_write")).await,
            ApprovalDecision::DenyAlways
        );
        assert_eq!(
            gate.decide(&request("file_write")).await,
            ApprovalDecision::DenyAlways
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn allow_once_is_not_cached() {
        let source = Arc::new(ScriptedSource::new(ApprovalDecision::AllowOnce));
        let gate = ApprovalGate::new(Some(source.clone()));

        gate.decide(&request("shell")).await;
        gate.decide(&request("shell")).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_requests_are_serialized() {
        let source = Arc::new(ScriptedSource::new(ApprovalDecision::AllowOnce));
        let gate = Arc::new(ApprovalGate::new(Some(source.clone())));

        let mut handles = Vec::new();
        for i in 0..8 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.decide(&request(&format!("tool_{i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 8);
        assert_eq!(
            source.overlapped.load(Ordering::SeqCst),
            0,
            "reviewer saw overlapping prompts"
        );
    }

    #[tokio::test]
    async fn queued_duplicates_collapse_after_always() {
        let source = Arc::new(ScriptedSource::new(ApprovalDecision::AllowAlways));
        let gate = Arc::new(ApprovalGate::new(Some(source.clone())));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            handles.push(tokio::spawn(
                async move { gate.decide(&request("shell")).await },
            ));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_allowed());
        }
        // First queued request answers for all the rest
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
