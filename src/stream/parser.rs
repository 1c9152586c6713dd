//! Consumes provider stream events for one model turn.

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::accumulator::ToolCallAccumulator;
use crate::error::SandrunError;
use crate::types::{AgentToolCall, FinishReason, StreamEvent};

/// Everything one model turn produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTurn {
    pub text: String,
    pub tool_calls: Vec<AgentToolCall>,
    pub finish_reason: Option<FinishReason>,
}

impl ParsedTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Incremental state for one turn: text so far plus tool-call fragments.
#[derive(Debug, Default)]
pub struct StreamParser {
    text: String,
    tool_calls: ToolCallAccumulator,
    finish_reason: Option<FinishReason>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event. Returns the content delta to forward, if any.
    pub fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::TextDelta(text) => {
                self.text.push_str(&text);
                Some(text)
            }
            StreamEvent::ToolCallDelta(fragments) => {
                for fragment in &fragments {
                    self.tool_calls.apply(fragment);
                }
                None
            }
            StreamEvent::Finish(reason) => {
                if reason.is_some() {
                    self.finish_reason = reason;
                }
                None
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// End of stream: materialize tool calls.
    pub fn finish(self) -> ParsedTurn {
        ParsedTurn {
            text: self.text,
            tool_calls: self.tool_calls.finalize(),
            finish_reason: self.finish_reason,
        }
    }
}

/// Drive `stream` to completion, forwarding content deltas to `on_content`
/// as they arrive.
///
/// A stream error or cancellation ends the turn with `Err`; content already
/// forwarded stays with the caller and no tool call is emitted.
pub async fn parse_stream<S>(
    stream: S,
    on_content: &mut (dyn FnMut(&str) + Send),
    cancel: &CancellationToken,
) -> Result<ParsedTurn, SandrunError>
where
    S: Stream<Item = Result<StreamEvent, SandrunError>> + Send,
{
    futures::pin_mut!(stream);
    let mut parser = StreamParser::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(SandrunError::Cancelled),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                if let Some(delta) = parser.apply(event) {
                    on_content(&delta);
                }
            }
            Some(Err(error)) => {
                debug!(%error, forwarded = parser.text().len(), "stream aborted");
                return Err(match error {
                    e @ (SandrunError::Stream(_) | SandrunError::Cancelled) => e,
                    other => SandrunError::Stream(other.to_string()),
                });
            }
            None => break,
        }
    }

    Ok(parser.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCallFragment;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn content_is_forwarded_and_calls_finalized_at_end() {
        let events = vec![
            Ok(StreamEvent::TextDelta("Looking up ".into())),
            Ok(StreamEvent::ToolCallDelta(vec![ToolCallFragment {
                index: 0,
                id: Some("abc".into()),
                ..Default::default()
            }])),
            Ok(StreamEvent::TextDelta("the domain".into())),
            Ok(StreamEvent::ToolCallDelta(vec![ToolCallFragment {
                index: 0,
                name: Some("whois_lookup".into()),
                ..Default::default()
            }])),
            Ok(StreamEvent::ToolCallDelta(vec![ToolCallFragment {
                index: 0,
                arguments_chunk: Some(r#"{"domain":"example.com"}"#.into()),
                ..Default::default()
            }])),
            Ok(StreamEvent::Finish(Some(FinishReason::ToolCalls))),
        ];

        let mut seen = Vec::new();
        let turn = parse_stream(
            futures::stream::iter(events),
            &mut |delta: &str| seen.push(delta.to_string()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(seen, vec!["Looking up ", "the domain"]);
        assert_eq!(turn.text, "Looking up the domain");
        assert_eq!(turn.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].arguments, json!({ "domain": "example.com" }));
    }

    #[tokio::test]
    async fn mid_stream_failure_emits_no_partial_call() {
        let events = vec![
            Ok(StreamEvent::TextDelta("partial".into())),
            Ok(StreamEvent::ToolCallDelta(vec![ToolCallFragment::complete(
                0,
                "x",
                "whois_lookup",
                r#"{"domain":"a.b"}"#,
            )])),
            Err(SandrunError::Timeout(30_000)),
        ];

        let mut seen = String::new();
        let err = parse_stream(
            futures::stream::iter(events),
            &mut |delta: &str| seen.push_str(delta),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SandrunError::Stream(_)));
        assert_eq!(seen, "partial");
    }

    #[tokio::test]
    async fn cancellation_ends_the_turn() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = parse_stream(futures::stream::pending::<Result<StreamEvent, SandrunError>>(), &mut |_: &str| {}, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SandrunError::Cancelled));
    }
}
