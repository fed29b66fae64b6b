//! Error types for the dispatch engine

use thiserror::Error;

/// Main error type for both services
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Transient node error: {message}")]
    TransientNode { message: String },

    #[error("Account sequence mismatch: {log}")]
    SequenceMismatch { log: String },

    #[error("Overflow during {operation}")]
    Overflow { operation: &'static str },

    #[error("Broadcast timed out after {elapsed_secs}s; outcome ambiguous")]
    BroadcastTimeout { elapsed_secs: u64 },

    #[error("Transaction rejected with code {code}: {log}")]
    FatalDispatch { code: u32, log: String },

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Account {address} not found on chain")]
    AccountNotFound { address: String },

    #[error("Shutdown requested")]
    Shutdown,
}

impl DispatchError {
    /// Check if the error is worth another submission attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::TransientNode { .. } | DispatchError::SequenceMismatch { .. }
        )
    }

    /// Check if the error indicates misconfiguration and must terminate the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DispatchError::Configuration(_)
                | DispatchError::Signing(_)
                | DispatchError::Overflow { .. }
                | DispatchError::AccountNotFound { .. }
        )
    }
}

impl From<config::ConfigError> for DispatchError {
    fn from(error: config::ConfigError) -> Self {
        DispatchError::Configuration(error.to_string())
    }
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;
