//! Error types for the mcproute orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur while orchestrating a fleet of MCP endpoints
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Configuration is missing, unreadable or structurally invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A session could not be built from its endpoint configuration
    #[error("Failed to construct session for endpoint '{endpoint}': {message}")]
    Construction { endpoint: String, message: String },

    /// A session-level failure, before the orchestrator attributes it to a stage
    #[error("Session error: {0}")]
    Session(String),

    /// A session failed to start (endpoint gets dropped)
    #[error("Failed to start endpoint '{endpoint}': {message}")]
    Start { endpoint: String, message: String },

    /// A session failed the protocol handshake (endpoint gets dropped)
    #[error("Handshake with endpoint '{endpoint}' failed: {message}")]
    Handshake { endpoint: String, message: String },

    /// Every endpoint was dropped during a lifecycle stage
    #[error("No servers running after {stage}")]
    NoServersRunning { stage: &'static str },

    /// Listing tools failed on a surviving endpoint
    #[error("Failed to list tools on endpoint '{endpoint}': {message}")]
    Discovery { endpoint: String, message: String },

    /// No endpoint owns the requested tool, or the identifier is malformed
    #[error("Cannot route '{identifier}': {reason}")]
    Routing { identifier: String, reason: String },

    /// The owning endpoint reported a failure invoking the tool
    #[error("Tool '{tool}' failed on endpoint '{endpoint}': {message}")]
    Transport {
        tool: String,
        endpoint: String,
        message: String,
    },

    /// An operation ran past the shared deadline
    #[error("Operation timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The shared deadline was cancelled while an operation was in flight
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// A pushed notification payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a routing error for `identifier`
    pub fn routing<S: Into<String>, R: Into<String>>(identifier: S, reason: R) -> Self {
        Self::Routing {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from the shared deadline rather than the remote side
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_error_message() {
        let err = OrchestratorError::routing("default.pull_image", "no endpoint owns 'pull_image'");
        assert_eq!(
            err.to_string(),
            "Cannot route 'default.pull_image': no endpoint owns 'pull_image'"
        );
    }

    #[test]
    fn test_deadline_classification() {
        let timeout = OrchestratorError::Timeout {
            operation: "start".to_string(),
            timeout_ms: 10,
        };
        assert!(timeout.is_deadline());
        assert!(!OrchestratorError::config("bad").is_deadline());
    }
}
