//! Session wire protocol: JSON `{type, payload}` envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SandrunError;
use crate::sandbox::{ExecutionEvent, OutputKind, TerminalStatus};

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    Auth {
        token: String,
    },
    Execute {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        execution_id: String,
    },
    Cancel {
        execution_id: String,
    },
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    AuthSuccess {
        user_id: String,
        tier: String,
    },
    AuthError {
        message: String,
    },
    Output {
        execution_id: String,
        output_type: OutputKind,
        data: String,
        timestamp: DateTime<Utc>,
    },
    Complete {
        execution_id: String,
        exit_code: i32,
        /// Set on the forced completion at the time limit.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        timed_out: bool,
        timestamp: DateTime<Utc>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_id: Option<String>,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        execution_id: String,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, SandrunError> {
        serde_json::from_str(text).map_err(|e| SandrunError::Protocol(format!("invalid client message: {e}")))
    }

    pub fn encode(&self) -> Result<String, SandrunError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, SandrunError> {
        serde_json::from_str(text).map_err(|e| SandrunError::Protocol(format!("invalid server message: {e}")))
    }

    pub fn encode(&self) -> Result<String, SandrunError> {
        Ok(serde_json::to_string(self)?)
    }

    /// An `error` not tied to any execution.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            execution_id: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// An `error` scoped to one execution id.
    pub fn execution_error(execution_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            execution_id: Some(execution_id.into()),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        match self {
            Self::Output { execution_id, .. }
            | Self::Complete { execution_id, .. }
            | Self::Cancelled { execution_id } => Some(execution_id),
            Self::Error { execution_id, .. } => execution_id.as_deref(),
            Self::AuthSuccess { .. } | Self::AuthError { .. } => None,
        }
    }

    /// The terminal status this message carries, if it ends an execution.
    pub fn terminal_status(&self) -> Option<TerminalStatus> {
        match self {
            Self::Complete {
                exit_code,
                timed_out: true,
                ..
            } => Some(TerminalStatus::TimedOut { exit_code: *exit_code }),
            Self::Complete { exit_code, .. } => Some(TerminalStatus::Completed { exit_code: *exit_code }),
            Self::Error {
                execution_id: Some(_),
                message,
                ..
            } => Some(TerminalStatus::Failed {
                message: message.clone(),
            }),
            Self::Cancelled { .. } => Some(TerminalStatus::Cancelled),
            _ => None,
        }
    }
}

impl From<ExecutionEvent> for ServerMessage {
    fn from(event: ExecutionEvent) -> Self {
        match event {
            ExecutionEvent::Output(output) => Self::Output {
                execution_id: output.execution_id,
                output_type: output.kind,
                data: output.content,
                timestamp: output.timestamp,
            },
            ExecutionEvent::Terminal {
                execution_id,
                status,
                timestamp,
            } => match status {
                TerminalStatus::Completed { exit_code } => Self::Complete {
                    execution_id,
                    exit_code,
                    timed_out: false,
                    timestamp,
                },
                TerminalStatus::TimedOut { exit_code } => Self::Complete {
                    execution_id,
                    exit_code,
                    timed_out: true,
                    timestamp,
                },
                TerminalStatus::Failed { message } => Self::Error {
                    execution_id: Some(execution_id),
                    message,
                    timestamp,
                },
                TerminalStatus::Cancelled => Self::Cancelled { execution_id },
            },
        }
    }
}
