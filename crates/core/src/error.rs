//! Error types for the Crank domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Crank operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cancelled by caller")]
    Cancelled,
}

impl ProviderError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Transport-level failures are transient; auth failures, protocol
    /// violations, and caller cancellation are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::StreamInterrupted(_) => true,
            Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => *status_code == 429 || *status_code >= 500,
            Self::AuthenticationFailed(_)
            | Self::Protocol(_)
            | Self::NotConfigured(_)
            | Self::Cancelled => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Network("conn refused".into()).is_transient());
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            ProviderError::RateLimited {
                retry_after_secs: 5
            }
            .is_transient()
        );
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_transient());
        assert!(!ProviderError::Cancelled.is_transient());
        assert!(!ProviderError::Protocol("no choices".into()).is_transient());
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: "bad request".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::PermissionDenied {
            tool_name: "shell".into(),
            reason: "denied by approval gate".into(),
        });
        assert!(err.to_string().contains("shell"));
        assert!(err.to_string().contains("approval gate"));
    }
}
