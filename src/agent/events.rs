//! Display events emitted while the loop runs.

use std::sync::Arc;

use crate::sandbox::{TerminalOutputEvent, TerminalStatus};

/// Callback receiving agent events.
pub type AgentEventSink = Arc<dyn Fn(AgentEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Model content, forwarded as it streams.
    TextDelta { text: String },
    /// A queued tool call is about to be validated and dispatched.
    ToolInvoking {
        call_id: String,
        tool: String,
        arguments: serde_json::Value,
    },
    ToolOutput {
        call_id: String,
        output: TerminalOutputEvent,
    },
    ToolFinished {
        call_id: String,
        tool: String,
        status: TerminalStatus,
        summary: String,
    },
    /// The validator refused the call; it never reached the sandbox.
    ToolRejected {
        call_id: String,
        tool: String,
        reason: String,
    },
    Error { message: String },
    /// The model answered without requesting tools.
    TurnComplete { resubmissions: usize },
}

#[derive(Clone, Default)]
pub(crate) struct EventEmitter {
    sink: Option<AgentEventSink>,
}

impl EventEmitter {
    pub(crate) fn new(sink: Option<AgentEventSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&self, event: AgentEvent) {
        let Some(sink) = &self.sink else { return };
        (sink)(event);
    }
}
