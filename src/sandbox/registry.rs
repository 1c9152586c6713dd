//! Per-connection table of live executions.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SandrunError;

/// A live execution as tracked by its owning connection.
#[derive(Debug)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub started_at: Instant,
    /// Wall-clock limit enforced by the execution task.
    pub timeout: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) task: JoinHandle<()>,
}

impl ExecutionRecord {
    pub fn deadline(&self) -> Instant {
        self.started_at + self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether the execution task is still driving the process.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Executions owned by one connection, keyed by execution id.
///
/// Not shared: each connection handler owns its registry outright and
/// removes a record when the terminal event for it arrives. Dropping the
/// registry cancels whatever is still running.
#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    records: HashMap<String, ExecutionRecord>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ExecutionRecord) -> Result<(), SandrunError> {
        if self.records.contains_key(&record.execution_id) {
            record.cancel.cancel();
            return Err(SandrunError::InvalidState(format!(
                "execution {} is already running",
                record.execution_id
            )));
        }
        self.records.insert(record.execution_id.clone(), record);
        Ok(())
    }

    /// Signal cancellation. Unknown or finished ids are a no-op (`false`).
    pub fn cancel(&self, execution_id: &str) -> bool {
        match self.records.get(execution_id) {
            Some(record) => {
                record.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Release bookkeeping once the terminal event was delivered.
    pub fn finish(&mut self, execution_id: &str) -> Option<ExecutionRecord> {
        self.records.remove(execution_id)
    }

    pub fn cancel_all(&self) {
        for record in self.records.values() {
            record.cancel.cancel();
        }
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        self.records.contains_key(execution_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Drop for ExecutionRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> (ExecutionRecord, CancellationToken) {
        let cancel = CancellationToken::new();
        let record = ExecutionRecord {
            execution_id: id.to_string(),
            started_at: Instant::now(),
            timeout: Duration::from_secs(300),
            cancel: cancel.clone(),
            task: tokio::spawn(async {}),
        };
        (record, cancel)
    }

    #[tokio::test]
    async fn cancel_unknown_id_is_noop() {
        let registry = ExecutionRegistry::new();
        assert!(!registry.cancel("exec_missing"));
    }

    #[tokio::test]
    async fn cancel_signals_token_and_finish_releases() {
        let mut registry = ExecutionRegistry::new();
        let (rec, token) = record("exec_1");
        registry.insert(rec).unwrap();

        assert!(registry.cancel("exec_1"));
        assert!(token.is_cancelled());
        assert!(registry.finish("exec_1").is_some());
        assert!(registry.is_empty());
        assert!(!registry.cancel("exec_1"));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected_and_cancelled() {
        let mut registry = ExecutionRegistry::new();
        let (first, _) = record("exec_1");
        let (second, second_token) = record("exec_1");
        registry.insert(first).unwrap();
        assert!(registry.insert(second).is_err());
        assert!(second_token.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn dropping_registry_cancels_live_executions() {
        let mut registry = ExecutionRegistry::new();
        let (rec, token) = record("exec_1");
        registry.insert(rec).unwrap();
        drop(registry);
        assert!(token.is_cancelled());
    }
}
