//! Provider stream frames.

use serde::{Deserialize, Serialize};

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

impl FinishReason {
    /// Map a provider `finish_reason` string. Unknown values are `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stop" | "end_turn" => Some(Self::Stop),
            "length" | "max_tokens" => Some(Self::Length),
            "tool_calls" | "function_call" | "tool_use" => Some(Self::ToolCalls),
            "content_filter" => Some(Self::ContentFilter),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Partial tool-call data from one stream frame. Any field may be absent;
/// fragments sharing an `index` belong to the same call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments_chunk: Option<String>,
}

impl ToolCallFragment {
    /// A fragment carrying a whole call at once.
    pub fn complete(index: usize, id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments_chunk: Some(arguments.into()),
        }
    }
}

/// One decoded provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallDelta(Vec<ToolCallFragment>),
    Finish(Option<FinishReason>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reasons_map_provider_spellings() {
        assert_eq!(FinishReason::parse("tool_calls"), Some(FinishReason::ToolCalls));
        assert_eq!(FinishReason::parse("function_call"), Some(FinishReason::ToolCalls));
        assert_eq!(FinishReason::parse("stop"), Some(FinishReason::Stop));
        assert_eq!(FinishReason::parse("whatever"), None);
    }
}
