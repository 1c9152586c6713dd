//! OpenAI-compatible Chat Completions provider (streaming).

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SandrunError;
use crate::types::*;

use super::http::{bearer_headers, parse_sse_data, shared_client, status_to_error, SseData};
use super::{EventStream, ModelProvider, ProviderRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn build_request_body(&self, request: &ProviderRequest) -> Value {
        let messages = request.messages.iter().map(message_to_openai).collect::<Vec<_>>();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        if !request.tools.is_empty() {
            let tool_defs: Vec<Value> = request.tools.iter().map(|t| t.to_openai()).collect();
            body["tools"] = tool_defs.into();
            body["tool_choice"] = "auto".into();
        }

        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, request: &ProviderRequest) -> Result<EventStream, SandrunError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, messages = request.messages.len(), tools = request.tools.len(), "OpenAI stream_chat");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            futures::pin_mut!(byte_stream);

            'read: while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(SandrunError::Network(e));
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw);
                    match parse_sse_data(line.trim()) {
                        None => {}
                        Some(SseData::Done) => break 'read,
                        Some(SseData::Payload(data)) => match decode_chunk(data) {
                            Ok(events) => {
                                for event in events {
                                    yield Ok(event);
                                }
                            }
                            Err(error) => warn!(%error, "skipping unparseable stream chunk"),
                        },
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Decode one SSE payload into stream events: text first, then tool-call
/// fragments, then the finish signal.
pub fn decode_chunk(data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(data)?;
    let mut events = Vec::new();

    for choice in chunk.choices {
        if let Some(delta) = choice.delta {
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta(text));
            }
            let fragments: Vec<ToolCallFragment> = delta
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(position, tc)| {
                    let (name, arguments_chunk) = match tc.function {
                        Some(f) => (f.name, arguments_to_string(f.arguments)),
                        None => (None, None),
                    };
                    ToolCallFragment {
                        index: tc.index.unwrap_or(position),
                        id: tc.id,
                        name,
                        arguments_chunk,
                    }
                })
                .collect();
            if !fragments.is_empty() {
                events.push(StreamEvent::ToolCallDelta(fragments));
            }
        }

        // Non-streamed completion delivered as a single frame.
        if let Some(message) = choice.message {
            if let Some(text) = message.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta(text));
            }
            let fragments: Vec<ToolCallFragment> = message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(index, tc)| ToolCallFragment {
                    index,
                    id: tc.id,
                    name: tc.function.name,
                    arguments_chunk: arguments_to_string(tc.function.arguments),
                })
                .collect();
            if !fragments.is_empty() {
                events.push(StreamEvent::ToolCallDelta(fragments));
            }
        }

        if let Some(reason) = choice.finish_reason {
            events.push(StreamEvent::Finish(FinishReason::parse(&reason)));
        }
    }

    Ok(events)
}

/// Some compatible servers send arguments as an object instead of a string.
fn arguments_to_string(arguments: Option<Value>) -> Option<String> {
    match arguments? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn message_to_openai(msg: &ModelMessage) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    if let Some(result) = msg.tool_result_part() {
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": result.tool_call_id,
            "content": result.content,
        });
    }

    let tool_calls = msg.tool_calls();
    if !tool_calls.is_empty() {
        let tc_json: Vec<Value> = tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        let text = msg.text();
        return serde_json::json!({
            "role": role,
            "content": if text.is_empty() { Value::Null } else { Value::String(text) },
            "tool_calls": tc_json,
        });
    }

    serde_json::json!({ "role": role, "content": msg.text() })
}

// OpenAI API response types (internal)

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: Option<OpenAiStreamDelta>,
    #[serde(default)]
    message: Option<OpenAiMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunction>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn content_delta_decodes_to_text() {
        let events = decode_chunk(r#"{"choices":[{"delta":{"content":"Scanning"},"finish_reason":null}]}"#).unwrap();
        assert_eq!(events, vec![StreamEvent::TextDelta("Scanning".into())]);
    }

    #[test]
    fn partial_tool_call_fields_stay_absent() {
        let events = decode_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"tar"}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![StreamEvent::ToolCallDelta(vec![ToolCallFragment {
                index: 0,
                id: None,
                name: None,
                arguments_chunk: Some("{\"tar".into()),
            }])]
        );
    }

    #[test]
    fn object_arguments_are_stringified() {
        let events = decode_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"c","function":{"name":"ping_host","arguments":{"host":"h"}}}]}}]}"#,
        )
        .unwrap();
        let StreamEvent::ToolCallDelta(fragments) = &events[0] else {
            panic!("expected tool call delta");
        };
        assert_eq!(fragments[0].arguments_chunk.as_deref(), Some(r#"{"host":"h"}"#));
        assert_eq!(fragments[0].index, 1);
    }

    #[test]
    fn full_message_tool_calls_become_complete_fragments() {
        let events = decode_chunk(
            r#"{"choices":[{"message":{"content":null,"tool_calls":[{"id":"call_1","type":"function","function":{"name":"whois_lookup","arguments":"{\"domain\":\"example.com\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![
                StreamEvent::ToolCallDelta(vec![ToolCallFragment::complete(
                    0,
                    "call_1",
                    "whois_lookup",
                    r#"{"domain":"example.com"}"#
                )]),
                StreamEvent::Finish(Some(FinishReason::ToolCalls)),
            ]
        );
    }

    #[test]
    fn tool_turns_render_in_openai_shape() {
        let call = AgentToolCall {
            id: "call_1".into(),
            name: "nmap_scan".into(),
            arguments: json!({ "target": "10.0.0.5" }),
        };
        let assistant = message_to_openai(&ModelMessage::assistant_with_tool_calls("", vec![call]));
        assert_eq!(assistant["content"], Value::Null);
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], r#"{"target":"10.0.0.5"}"#);

        let tool = message_to_openai(&ModelMessage::tool_result("call_1", "exit 0", false));
        assert_eq!(tool, json!({ "role": "tool", "tool_call_id": "call_1", "content": "exit 0" }));
    }

    #[test]
    fn request_body_offers_tools() {
        let provider = OpenAiProvider::new("gpt-4o-mini", "k", Some("http://localhost/v1/".into()));
        assert_eq!(provider.base_url, "http://localhost/v1");
        let body = provider.build_request_body(&ProviderRequest::new(
            vec![ModelMessage::user("scan 10.0.0.5")],
            crate::tools::catalog(),
        ));
        assert_eq!(body["stream"], true);
        assert_eq!(body["tool_choice"], "auto");
        assert!(body["tools"].as_array().unwrap().len() >= 15);
    }
}
