//! Shared test helpers: a fake container runtime, scripted providers and
//! dispatchers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sandrun::command::ExecutionRequest;
use sandrun::error::SandrunError;
use sandrun::provider::{EventStream, ModelProvider, ProviderRequest};
use sandrun::sandbox::{
    ExecutionEvent, ExecutionOutcome, OutputKind, SandboxConfig, TerminalOutputEvent, TerminalStatus,
};
use sandrun::agent::ToolDispatcher;
use sandrun::types::{FinishReason, StreamEvent, ToolCallFragment};

/// A stand-in for `docker`: drops `exec -u <user> <sandbox>` and runs the
/// rest on the host.
pub struct FakeRuntime {
    _dir: TempDir,
    pub path: PathBuf,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-runtime");
        std::fs::write(&path, "#!/bin/sh\nshift 4\nexec \"$@\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { _dir: dir, path }
    }

    pub fn config(&self, timeout: Duration) -> SandboxConfig {
        SandboxConfig {
            runtime: self.path.display().to_string(),
            sandbox_name: "test-sandbox".into(),
            user: "tester".into(),
            timeout,
        }
    }
}

/// Receive events until the terminal one, failing the test after `limit`.
pub async fn collect_until_terminal(
    rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>,
    limit: Duration,
) -> (Vec<TerminalOutputEvent>, TerminalStatus) {
    let mut outputs = Vec::new();
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("terminal event should arrive in time")
            .expect("channel should stay open until the terminal event");
        match event {
            ExecutionEvent::Output(output) => outputs.push(output),
            ExecutionEvent::Terminal { status, .. } => return (outputs, status),
        }
    }
}

pub fn joined(outputs: &[TerminalOutputEvent], kind: OutputKind) -> String {
    outputs
        .iter()
        .filter(|o| o.kind == kind)
        .map(|o| o.content.as_str())
        .collect()
}

/// One scripted model turn.
pub type Turn = Vec<Result<StreamEvent, SandrunError>>;

pub fn text_turn(text: &str) -> Turn {
    vec![
        Ok(StreamEvent::TextDelta(text.to_string())),
        Ok(StreamEvent::Finish(Some(FinishReason::Stop))),
    ]
}

/// A turn requesting the given `(id, name, arguments)` calls, each split
/// into two argument fragments.
pub fn tool_turn(calls: &[(&str, &str, &str)]) -> Turn {
    let mut events = Vec::new();
    for (index, (id, name, arguments)) in calls.iter().enumerate() {
        let split = arguments.len() / 2;
        events.push(Ok(StreamEvent::ToolCallDelta(vec![ToolCallFragment {
            index,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments_chunk: Some(arguments[..split].to_string()),
        }])));
        events.push(Ok(StreamEvent::ToolCallDelta(vec![ToolCallFragment {
            index,
            arguments_chunk: Some(arguments[split..].to_string()),
            ..Default::default()
        }])));
    }
    events.push(Ok(StreamEvent::Finish(Some(FinishReason::ToolCalls))));
    events
}

/// Replays scripted turns and records every request it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    pub requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn stream_chat(&self, request: &ProviderRequest) -> Result<EventStream, SandrunError> {
        self.requests.lock().unwrap().push(request.clone());
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| text_turn("(script exhausted)"));
        Ok(Box::pin(stream::iter(turn)))
    }
}

/// How the fake dispatcher answers a request.
#[derive(Clone)]
pub enum Reply {
    Exit { stdout: String, exit_code: i32 },
    /// Wait for the cancel token, then report `Cancelled`.
    BlockUntilCancelled,
    Fail(fn() -> SandrunError),
}

/// Answers dispatches from a script and records the command lines.
pub struct ScriptedDispatcher {
    replies: Mutex<VecDeque<Reply>>,
    pub dispatched: Mutex<Vec<String>>,
}

impl ScriptedDispatcher {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            dispatched: Mutex::new(Vec::new()),
        })
    }

    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolDispatcher for ScriptedDispatcher {
    async fn dispatch(
        &self,
        request: &ExecutionRequest,
        on_output: &mut (dyn for<'a> FnMut(&'a TerminalOutputEvent) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, SandrunError> {
        self.dispatched.lock().unwrap().push(request.command_line());
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Exit {
            stdout: String::new(),
            exit_code: 0,
        });
        match reply {
            Reply::Exit { stdout, exit_code } => {
                let mut outcome =
                    ExecutionOutcome::new(&request.execution_id, TerminalStatus::Completed { exit_code });
                if !stdout.is_empty() {
                    let event = TerminalOutputEvent {
                        execution_id: request.execution_id.clone(),
                        kind: OutputKind::Stdout,
                        content: stdout,
                        timestamp: chrono::Utc::now(),
                    };
                    outcome.record(event.kind, &event.content);
                    on_output(&event);
                }
                Ok(outcome)
            }
            Reply::BlockUntilCancelled => {
                cancel.cancelled().await;
                Ok(ExecutionOutcome::new(&request.execution_id, TerminalStatus::Cancelled))
            }
            Reply::Fail(error) => Err(error()),
        }
    }
}
