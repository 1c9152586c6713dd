//! The agent loop: model turn, tool drain, resubmit, until the model stops
//! asking for tools.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatch::ToolDispatcher;
use super::events::{AgentEvent, AgentEventSink, EventEmitter};
use super::queue::{ToolQueue, ToolQueueEntry};
use super::summary::{summarize_outcome, summarize_rejection};
use crate::command;
use crate::error::SandrunError;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::sandbox::{TerminalOutputEvent, TerminalStatus};
use crate::stream::parse_stream;
use crate::tools::{ToolArguments, ToolDefinition};
use crate::types::ModelMessage;

/// How a call to [`AgentDriver::run_turn`] or [`AgentDriver::resume`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model replied without requesting tools.
    Completed {
        text: String,
        /// Model requests made after a tool drain.
        resubmissions: usize,
    },
    /// Stopped by the cancellation token. `pending` calls remain queued
    /// until [`AgentDriver::resume`] or [`AgentDriver::discard_pending`].
    Cancelled { pending: usize },
}

enum Drain {
    Finished,
    Cancelled,
}

/// Drives a conversation against a model and a tool dispatcher.
pub struct AgentDriver {
    provider: Arc<dyn ModelProvider>,
    dispatcher: Arc<dyn ToolDispatcher>,
    tools: Vec<ToolDefinition>,
    messages: Vec<ModelMessage>,
    queue: Arc<ToolQueue>,
    events: EventEmitter,
}

impl AgentDriver {
    pub fn new(provider: Arc<dyn ModelProvider>, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            provider,
            dispatcher,
            tools: crate::tools::catalog(),
            messages: Vec::new(),
            queue: Arc::new(ToolQueue::new()),
            events: EventEmitter::default(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.messages.insert(0, ModelMessage::system(prompt));
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_event_sink(mut self, sink: AgentEventSink) -> Self {
        self.events = EventEmitter::new(Some(sink));
        self
    }

    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    pub fn queue(&self) -> &Arc<ToolQueue> {
        &self.queue
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Add a user message and run the loop until the model stops requesting
    /// tools, the token fires, or a dispatch failure aborts the turn.
    pub async fn run_turn(
        &mut self,
        user_input: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SandrunError> {
        if !self.queue.is_empty() {
            return Err(SandrunError::InvalidState(format!(
                "{} tool calls are still pending; resume or discard them first",
                self.queue.len()
            )));
        }
        self.messages.push(ModelMessage::user(user_input));
        self.drive(cancel).await
    }

    /// Continue after a cancellation: drain what is queued, then resubmit.
    pub async fn resume(&mut self, cancel: &CancellationToken) -> Result<TurnOutcome, SandrunError> {
        info!(pending = self.queue.len(), "resuming agent loop");
        self.drive(cancel).await
    }

    /// Drop queued calls, recording each as skipped so the conversation
    /// stays well-formed. Returns how many were dropped.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.queue.clear();
        for entry in &dropped {
            self.messages.push(ModelMessage::tool_result(
                &entry.call_id,
                format!("[{}] skipped: the user cancelled the remaining tool calls.", entry.name),
                true,
            ));
        }
        if !dropped.is_empty() {
            info!(dropped = dropped.len(), "discarded pending tool calls");
        }
        dropped.len()
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<TurnOutcome, SandrunError> {
        let mut resubmissions = 0usize;

        loop {
            if !self.queue.is_empty() {
                if let Drain::Cancelled = self.drain(cancel).await? {
                    return Ok(TurnOutcome::Cancelled {
                        pending: self.queue.len(),
                    });
                }
                resubmissions += 1;
            }

            let turn = match self.request_model(cancel).await {
                Ok(turn) => turn,
                Err(SandrunError::Cancelled) => {
                    return Ok(TurnOutcome::Cancelled {
                        pending: self.queue.len(),
                    })
                }
                Err(error) => {
                    self.events.emit(AgentEvent::Error {
                        message: error.to_string(),
                    });
                    return Err(error);
                }
            };

            debug!(
                resubmissions,
                tool_calls = turn.tool_calls.len(),
                text_len = turn.text.len(),
                finish = ?turn.finish_reason,
                "model turn complete"
            );

            if !turn.has_tool_calls() {
                self.messages.push(ModelMessage::assistant(turn.text.clone()));
                self.events.emit(AgentEvent::TurnComplete { resubmissions });
                return Ok(TurnOutcome::Completed {
                    text: turn.text,
                    resubmissions,
                });
            }

            self.messages
                .push(ModelMessage::assistant_with_tool_calls(turn.text, turn.tool_calls.clone()));
            for call in turn.tool_calls {
                self.queue.enqueue(call);
            }
        }
    }

    async fn request_model(&self, cancel: &CancellationToken) -> Result<crate::stream::ParsedTurn, SandrunError> {
        let request = ProviderRequest::new(self.messages.clone(), self.tools.clone());
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(SandrunError::Cancelled),
            stream = self.provider.stream_chat(&request) => stream?,
        };
        let events = self.events.clone();
        let mut forward = move |delta: &str| events.emit(AgentEvent::TextDelta { text: delta.to_string() });
        parse_stream(stream, &mut forward, cancel).await
    }

    /// Dispatch queued calls one at a time, each awaited to its terminal
    /// event, appending one tool message per call.
    async fn drain(&mut self, cancel: &CancellationToken) -> Result<Drain, SandrunError> {
        let queue = Arc::clone(&self.queue);
        let Some(_guard) = queue.try_begin_drain() else {
            return Err(SandrunError::InvalidState("tool queue is already draining".into()));
        };

        while let Some(entry) = queue.pop() {
            if cancel.is_cancelled() {
                queue.requeue_front(entry);
                return Ok(Drain::Cancelled);
            }

            info!(tool = %entry.name, call_id = %entry.call_id, "invoking tool");
            self.events.emit(AgentEvent::ToolInvoking {
                call_id: entry.call_id.clone(),
                tool: entry.name.clone(),
                arguments: entry.arguments.clone(),
            });

            let request = match command::build(&entry.name, &ToolArguments::new(entry.arguments.clone())) {
                Ok(request) => request,
                Err(rejection) => {
                    self.events.emit(AgentEvent::ToolRejected {
                        call_id: entry.call_id.clone(),
                        tool: entry.name.clone(),
                        reason: rejection.reason.clone(),
                    });
                    self.messages.push(ModelMessage::tool_result(
                        &entry.call_id,
                        summarize_rejection(&entry.name, &rejection.reason),
                        true,
                    ));
                    continue;
                }
            };

            let events = self.events.clone();
            let call_id = entry.call_id.clone();
            let mut on_output = move |output: &TerminalOutputEvent| {
                events.emit(AgentEvent::ToolOutput {
                    call_id: call_id.clone(),
                    output: output.clone(),
                })
            };

            match self.dispatcher.dispatch(&request, &mut on_output, cancel).await {
                Ok(outcome) => {
                    let summary = summarize_outcome(&entry.name, &request.command_line(), &outcome);
                    let cancelled = matches!(outcome.status, TerminalStatus::Cancelled);
                    self.events.emit(AgentEvent::ToolFinished {
                        call_id: entry.call_id.clone(),
                        tool: entry.name.clone(),
                        status: outcome.status.clone(),
                        summary: summary.clone(),
                    });
                    self.messages.push(ModelMessage::tool_result(
                        &entry.call_id,
                        summary,
                        !outcome.status.is_success(),
                    ));
                    if cancelled {
                        return Ok(Drain::Cancelled);
                    }
                }
                Err(error) if error.surfaces_in_conversation() => {
                    self.messages.push(ModelMessage::tool_result(
                        &entry.call_id,
                        summarize_rejection(&entry.name, &error.to_string()),
                        true,
                    ));
                }
                Err(error) => {
                    self.abandon_queue(entry, &error);
                    return Err(error);
                }
            }
        }

        Ok(Drain::Finished)
    }

    /// Dispatch is impossible: empty the queue and answer every orphaned
    /// call so the history stays valid for a later turn.
    fn abandon_queue(&mut self, failed: ToolQueueEntry, error: &SandrunError) {
        let mut abandoned = vec![failed];
        abandoned.extend(self.queue.clear());
        warn!(%error, abandoned = abandoned.len(), "dispatch failed; tool queue flushed");
        for entry in &abandoned {
            self.messages.push(ModelMessage::tool_result(
                &entry.call_id,
                format!("[{}] not executed: {error}", entry.name),
                true,
            ));
        }
        self.events.emit(AgentEvent::Error {
            message: format!("tool dispatch failed: {error}"),
        });
    }
}
