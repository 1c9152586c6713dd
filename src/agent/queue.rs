//! FIFO of tool calls awaiting dispatch, drained single-flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::AgentToolCall;

/// A tool call waiting its turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolQueueEntry {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl From<AgentToolCall> for ToolQueueEntry {
    fn from(call: AgentToolCall) -> Self {
        Self {
            call_id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

/// Strict FIFO shared between producers and the single drainer.
#[derive(Debug, Default)]
pub struct ToolQueue {
    entries: Mutex<VecDeque<ToolQueueEntry>>,
    draining: AtomicBool,
}

/// Held for the duration of one drain cycle.
#[derive(Debug)]
pub struct DrainGuard<'a> {
    queue: &'a ToolQueue,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.queue.draining.store(false, Ordering::Release);
    }
}

impl ToolQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<ToolQueueEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, entry: impl Into<ToolQueueEntry>) {
        self.entries().push_back(entry.into());
    }

    pub fn pop(&self) -> Option<ToolQueueEntry> {
        self.entries().pop_front()
    }

    /// Put an entry back at the head, e.g. when a drain stops before
    /// dispatching it.
    pub fn requeue_front(&self, entry: ToolQueueEntry) {
        self.entries().push_front(entry);
    }

    /// Remove and return everything still queued.
    pub fn clear(&self) -> Vec<ToolQueueEntry> {
        self.entries().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Claim the drainer role. `None` while another drain cycle is running.
    pub fn try_begin_drain(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard { queue: self })
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}
