//! Error classification and recovery hints.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    Validation,
    Execution,
    Timeout,
    Cancellation,
    Protocol,
    Parse,
    Stream,
    Transport,
    RateLimit,
    Server,
    Configuration,
    Serialization,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Reconnect or resend after a delay.
    RetryWithBackoff,
    /// Obtain a fresh token before trying again.
    CheckCredentials,
    CheckConfiguration,
    /// Report the failure back to the agent loop as conversation content.
    ReportToModel,
    /// Nothing to do; the user asked for this.
    None,
    ContactSupport,
}
