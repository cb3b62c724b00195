use crate::session::SessionState;
use thiserror::Error;

/// Core error types for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Launch failed: {0}")]
    LaunchFailure(String),

    #[error("Debug target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("Stale debug target: {0}")]
    StaleTarget(String),

    #[error("Session already active: {0}")]
    SessionActive(String),

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self::LaunchFailure(message.into())
    }

    pub fn target_unavailable(message: impl Into<String>) -> Self {
        Self::TargetUnavailable(message.into())
    }

    pub fn stale_target(message: impl Into<String>) -> Self {
        Self::StaleTarget(message.into())
    }

    /// Check if the host may reasonably retry the failed operation.
    ///
    /// Nothing is retried inside the bridge; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::LaunchFailure(_) | BridgeError::Timeout(_))
    }

    /// Check if this error means the caller broke an operation precondition
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            BridgeError::TargetUnavailable(_)
                | BridgeError::SessionActive(_)
                | BridgeError::InvalidTransition { .. }
        )
    }
}
