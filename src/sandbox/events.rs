//! Execution output and terminal events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Which source an output chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutputKind {
    Stdout,
    Stderr,
    /// Executor notices, e.g. a timeout.
    Info,
    Error,
    /// Echo of the command line being run.
    Command,
}

/// One chunk of output from a running execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutputEvent {
    pub execution_id: String,
    pub kind: OutputKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed { exit_code: i32 },
    /// Killed at the wall-clock limit; carries a synthetic non-zero code.
    TimedOut { exit_code: i32 },
    Failed { message: String },
    Cancelled,
}

impl TerminalStatus {
    /// Exit code 0 and nothing else.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { exit_code: 0 })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Completed { exit_code } | Self::TimedOut { exit_code } => Some(*exit_code),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::TimedOut { .. } => "timed_out",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Everything an execution reports to its owner, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Output(TerminalOutputEvent),
    /// Always the last event for an execution id, sent exactly once.
    Terminal {
        execution_id: String,
        status: TerminalStatus,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            Self::Output(event) => &event.execution_id,
            Self::Terminal { execution_id, .. } => execution_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// Per-stream cap on collected output.
pub const MAX_COLLECTED_BYTES: usize = 64 * 1024;

/// The collected result of one execution, as seen by whoever dispatched it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub execution_id: String,
    pub status: TerminalStatus,
    pub stdout: String,
    pub stderr: String,
    /// Executor notices and error output, in arrival order.
    pub notices: Vec<String>,
    /// Set when stdout or stderr hit [`MAX_COLLECTED_BYTES`].
    pub truncated: bool,
}

impl ExecutionOutcome {
    pub fn new(execution_id: impl Into<String>, status: TerminalStatus) -> Self {
        Self {
            execution_id: execution_id.into(),
            status,
            stdout: String::new(),
            stderr: String::new(),
            notices: Vec::new(),
            truncated: false,
        }
    }

    /// Fold one output chunk into the collected buffers.
    pub fn record(&mut self, kind: OutputKind, content: &str) {
        let buf = match kind {
            OutputKind::Stdout => &mut self.stdout,
            OutputKind::Stderr => &mut self.stderr,
            OutputKind::Info | OutputKind::Error => {
                self.notices.push(content.to_string());
                return;
            }
            OutputKind::Command => return,
        };
        let room = MAX_COLLECTED_BYTES.saturating_sub(buf.len());
        let kept = crate::util::truncate::truncate_utf8(content, room);
        if kept.len() < content.len() {
            self.truncated = true;
        }
        buf.push_str(kept);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exit_zero_is_success() {
        assert!(TerminalStatus::Completed { exit_code: 0 }.is_success());
        assert!(!TerminalStatus::Completed { exit_code: 2 }.is_success());
        assert!(!TerminalStatus::TimedOut { exit_code: 124 }.is_success());
        assert!(!TerminalStatus::Cancelled.is_success());
    }

    #[test]
    fn outcome_splits_streams_and_skips_command_echo() {
        let mut outcome = ExecutionOutcome::new("exec_1", TerminalStatus::Cancelled);
        outcome.record(OutputKind::Command, "$ nmap -F h");
        outcome.record(OutputKind::Stdout, "open\n");
        outcome.record(OutputKind::Stderr, "warn\n");
        outcome.record(OutputKind::Info, "timed out");
        assert_eq!(outcome.stdout, "open\n");
        assert_eq!(outcome.stderr, "warn\n");
        assert_eq!(outcome.notices, vec!["timed out".to_string()]);
        assert!(!outcome.truncated);
    }

    #[test]
    fn outcome_caps_collected_output() {
        let mut outcome = ExecutionOutcome::new("exec_1", TerminalStatus::Cancelled);
        let chunk = "y".repeat(40 * 1024);
        outcome.record(OutputKind::Stdout, &chunk);
        outcome.record(OutputKind::Stdout, &chunk);
        assert_eq!(outcome.stdout.len(), MAX_COLLECTED_BYTES);
        assert!(outcome.truncated);
    }

    #[test]
    fn output_kind_parses_wire_names() {
        assert_eq!("stderr".parse::<OutputKind>().unwrap(), OutputKind::Stderr);
        assert_eq!(OutputKind::Command.to_string(), "command");
    }
}
