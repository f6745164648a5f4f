use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{NodeInput, NodeOutput};
use crate::flow::NodeId;

/// Longest preview string embedded in diagrams and log lines.
pub const PREVIEW_MAX_LEN: usize = 200;

/// Record of a single node invocation.
///
/// `sequence` reflects dispatch order and is monotonic per run; entries are
/// appended in completion order, so the two orderings differ under
/// concurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub node_id: NodeId,
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub input: NodeInput,
    pub output: NodeOutput,
    pub status: String,
    pub scheduled: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceEntry {
    /// Compact single-line rendering of the input payload, bounded at
    /// [`PREVIEW_MAX_LEN`] characters.
    pub fn input_preview(&self) -> String {
        preview(&self.input.payload)
    }

    /// Compact single-line rendering of the output data, bounded at
    /// [`PREVIEW_MAX_LEN`] characters.
    pub fn output_preview(&self) -> String {
        preview(&self.output.data)
    }
}

/// Render `value` as single-line JSON truncated to [`PREVIEW_MAX_LEN`]
/// characters, with a `…` marker when cut.
pub fn preview(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut flat = text.replace(['\n', '\r'], " ");
    if flat.chars().count() > PREVIEW_MAX_LEN {
        flat = flat.chars().take(PREVIEW_MAX_LEN - 1).collect();
        flat.push('…');
    }
    flat
}

/// Append-only, mutex-guarded log of node invocations for one run.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    entries: Arc<Mutex<Vec<TraceEntry>>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: TraceEntry) {
        let mut entries = self.entries.lock().expect("trace poisoned");
        entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("trace poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the entries recorded so far, in completion order.
    pub fn snapshot(&self) -> Vec<TraceEntry> {
        self.entries.lock().expect("trace poisoned").clone()
    }

    /// Consume the recorder, returning the recorded entries.
    pub fn into_entries(self) -> Vec<TraceEntry> {
        match Arc::try_unwrap(self.entries) {
            Ok(mutex) => mutex.into_inner().expect("trace poisoned"),
            Err(shared) => shared.lock().expect("trace poisoned").clone(),
        }
    }
}
