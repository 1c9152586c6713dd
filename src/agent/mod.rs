//! Execution queue and agent loop.

pub mod dispatch;
pub mod driver;
pub mod events;
pub mod queue;
pub mod summary;

pub use dispatch::{LocalDispatcher, ToolDispatcher};
pub use driver::{AgentDriver, TurnOutcome};
pub use events::{AgentEvent, AgentEventSink};
pub use queue::{DrainGuard, ToolQueue, ToolQueueEntry};
pub use summary::{summarize_outcome, summarize_rejection, MAX_SUMMARY_CHARS};
