//! Where validated requests go to run.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::ExecutionRequest;
use crate::error::SandrunError;
use crate::sandbox::{ExecutionEvent, ExecutionOutcome, SandboxExecutor, TerminalOutputEvent};
use crate::session::SessionClient;

/// Runs one request to its terminal event.
///
/// `Err` means the request could not be dispatched at all (not connected,
/// connection lost, ...). Anything that happened to the process itself,
/// including failure to spawn, comes back as an [`ExecutionOutcome`].
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        request: &ExecutionRequest,
        on_output: &mut (dyn for<'a> FnMut(&'a TerminalOutputEvent) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, SandrunError>;
}

#[async_trait]
impl ToolDispatcher for SessionClient {
    async fn dispatch(
        &self,
        request: &ExecutionRequest,
        on_output: &mut (dyn for<'a> FnMut(&'a TerminalOutputEvent) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, SandrunError> {
        self.execute(request, on_output, cancel).await
    }
}

/// Runs requests on an in-process executor, without a session server.
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    executor: SandboxExecutor,
}

impl LocalDispatcher {
    pub fn new(executor: SandboxExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ToolDispatcher for LocalDispatcher {
    async fn dispatch(
        &self,
        request: &ExecutionRequest,
        on_output: &mut (dyn for<'a> FnMut(&'a TerminalOutputEvent) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, SandrunError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let record = self.executor.spawn(request.clone(), events_tx);
        let mut outcome = ExecutionOutcome::new(&request.execution_id, crate::sandbox::TerminalStatus::Cancelled);

        loop {
            tokio::select! {
                _ = cancel.cancelled(), if !record.cancel.is_cancelled() => {
                    debug!(execution_id = %request.execution_id, "cancelling local execution");
                    record.cancel.cancel();
                }
                event = events_rx.recv() => match event {
                    Some(ExecutionEvent::Output(output)) => {
                        outcome.record(output.kind, &output.content);
                        on_output(&output);
                    }
                    Some(ExecutionEvent::Terminal { status, .. }) => {
                        outcome.status = status;
                        return Ok(outcome);
                    }
                    None => {
                        return Err(SandrunError::execution(
                            request.execution_id.clone(),
                            "execution ended without a terminal event",
                        ))
                    }
                },
            }
        }
    }
}
