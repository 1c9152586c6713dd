//! Reassembles tool calls from per-index stream fragments.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::types::{AgentToolCall, ToolCallFragment};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Tool-call fragments keyed by stream index.
///
/// `id` and `name` are taken from the first fragment that carries them;
/// argument chunks are concatenated in arrival order. Nothing is parsed
/// until [`ToolCallAccumulator::finalize`].
#[derive(Debug, Default, Clone)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PendingCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, fragment: &ToolCallFragment) {
        let call = self.calls.entry(fragment.index).or_default();
        if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
            if call.id.is_empty() {
                call.id = id.to_string();
            }
        }
        if let Some(name) = fragment.name.as_deref().filter(|name| !name.is_empty()) {
            if call.name.is_empty() {
                call.name = name.to_string();
            }
        }
        if let Some(chunk) = &fragment.arguments_chunk {
            call.arguments.push_str(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Materialize complete calls in index order.
    ///
    /// Entries missing a name or arguments are skipped. Arguments that do
    /// not parse to a JSON object drop that one call with a warning.
    pub fn finalize(self) -> Vec<AgentToolCall> {
        self.calls
            .into_iter()
            .filter_map(|(index, call)| finalize_call(index, call))
            .collect()
    }
}

fn finalize_call(index: usize, call: PendingCall) -> Option<AgentToolCall> {
    if call.name.is_empty() || call.arguments.trim().is_empty() {
        debug!(index, name = %call.name, "skipping incomplete tool call");
        return None;
    }

    let arguments = match serde_json::from_str::<serde_json::Value>(&call.arguments) {
        Ok(value) if value.is_object() => value,
        Ok(_) => {
            warn!(index, tool = %call.name, "dropping tool call: arguments are not a JSON object");
            return None;
        }
        Err(error) => {
            warn!(index, tool = %call.name, %error, "dropping tool call: arguments failed to parse");
            return None;
        }
    };

    let id = if call.id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        call.id
    };

    Some(AgentToolCall {
        id,
        name: call.name,
        arguments,
    })
}
