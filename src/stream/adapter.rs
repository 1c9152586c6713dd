//! SSE frames for UI consumers of the agent loop.

use serde::{Deserialize, Serialize};

use crate::agent::AgentEvent;

/// Tool invocation as shown to a UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterTool {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One frame of the adapter stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterFrame {
    Connected,
    Content { content: String },
    ToolCall { tool: AdapterTool },
    Error { error: String },
    Done,
}

impl AdapterFrame {
    /// `data: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error","error":"unserializable frame"}"#.into());
        format!("data: {json}\n\n")
    }

    /// The frame a UI should see for `event`, if any. Tool output and
    /// results stay internal to the loop.
    pub fn from_event(event: &AgentEvent) -> Option<Self> {
        match event {
            AgentEvent::TextDelta { text } => Some(Self::Content { content: text.clone() }),
            AgentEvent::ToolInvoking { tool, arguments, .. } => Some(Self::ToolCall {
                tool: AdapterTool {
                    name: tool.clone(),
                    arguments: arguments.clone(),
                },
            }),
            AgentEvent::Error { message } => Some(Self::Error { error: message.clone() }),
            AgentEvent::TurnComplete { .. } => Some(Self::Done),
            AgentEvent::ToolOutput { .. } | AgentEvent::ToolFinished { .. } | AgentEvent::ToolRejected { .. } => None,
        }
    }
}
