//! Error types for sandrun.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// A command rejected by the validator before it could be dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ValidationError {
    /// Human-readable rejection reason, suitable for feeding back to the model.
    pub reason: String,
    /// Tool name the rejected invocation was addressed to, when known.
    pub tool: Option<String>,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            tool: None,
        }
    }

    pub fn for_tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            tool: Some(tool.into()),
        }
    }
}

/// Primary error type for all sandrun operations.
#[derive(Error, Debug)]
pub enum SandrunError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error ({execution_id}): {message}")]
    Execution {
        execution_id: String,
        message: String,
    },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl SandrunError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn execution(execution_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            execution_id: execution_id.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Execution { .. } => ErrorCategory::Execution,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::Parse(_) => ErrorCategory::Parse,
            Self::Stream(_) => ErrorCategory::Stream,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_)
            | Self::WebSocket(_)
            | Self::Io(_)
            | Self::NotConnected
            | Self::ConnectionLost => ErrorCategory::Transport,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Stream,
            },
            Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Transport | ErrorCategory::Server
        )
    }

    /// Whether the agent loop should report this failure to the model as
    /// conversation content instead of aborting the turn.
    pub fn surfaces_in_conversation(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Validation
                | ErrorCategory::Execution
                | ErrorCategory::Timeout
                | ErrorCategory::Cancellation
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit | ErrorCategory::Transport | ErrorCategory::Server => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Validation | ErrorCategory::Execution | ErrorCategory::Timeout => {
                RecoverySuggestion::ReportToModel
            }
            ErrorCategory::Cancellation => RecoverySuggestion::None,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SandrunError>;
