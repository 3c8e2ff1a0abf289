//! Approval contracts — the human-in-the-loop decision boundary.
//!
//! The host supplies an [`ApprovalSource`]; the gate in the agent crate
//! consults it for tools outside the safe set and caches "always"
//! decisions for the rest of the run (or session, depending on where the
//! host instantiates the gate).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request to approve one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// The tool call this decision is for
    pub tool_call_id: String,

    /// Name of the tool being invoked
    pub name: String,

    /// The parsed arguments, for display to the reviewer
    pub args: serde_json::Value,
}

/// A reviewer's decision on one approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Allow this call only
    AllowOnce,
    /// Allow this call and all future calls to the same tool name
    AllowAlways,
    /// Deny this call only
    DenyOnce,
    /// Deny this call and all future calls to the same tool name
    DenyAlways,
}

impl ApprovalDecision {
    /// Whether the decision permits execution.
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::AllowOnce | Self::AllowAlways)
    }
}

/// The external decision source, typically a human reviewer.
///
/// Implementations must be prepared to be called from one serialized
/// queue: the gate never presents two requests concurrently.
#[async_trait]
pub trait ApprovalSource: Send + Sync {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_classification() {
        assert!(ApprovalDecision::AllowOnce.is_allowed());
        assert!(ApprovalDecision::AllowAlways.is_allowed());
        assert!(!ApprovalDecision::DenyOnce.is_allowed());
        assert!(!ApprovalDecision::DenyAlways.is_allowed());
    }

    #[test]
    fn decision_serialization() {
        assert_eq!(
            serde_json::to_string(&ApprovalDecision::AllowAlways).unwrap(),
            r#""allow_always""#
        );
        let parsed: ApprovalDecision = serde_json::from_str(r#""deny_once""#).unwrap();
        assert_eq!(parsed, ApprovalDecision::DenyOnce);
    }
}
