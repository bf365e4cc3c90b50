//! OutputLog - append-only record of everything a sink was told
//!
//! - `OutputEvent`: envelope with id + timestamp + kind
//! - `OutputEventKind`: the five sink notifications
//! - `OutputLog`: thread-safe, cheaply cloneable, exportable to JSON/YAML

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{OutputRecord, OutputSink};
use crate::error::{Result, ScratchError};

/// Single notification in the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEvent {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: OutputEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEventKind {
    Started,
    Record { record: OutputRecord },
    Error { message: String },
    Finished,
    Cleared,
}

/// Thread-safe, append-only output log
#[derive(Clone)]
pub struct OutputLog {
    events: Arc<RwLock<Vec<OutputEvent>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an event (thread-safe, returns event ID)
    pub fn push(&self, kind: OutputEventKind) -> u64 {
        // id allocation and push under one lock keeps ids in log order
        let mut events = self.events.write();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        events.push(OutputEvent {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        });
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<OutputEvent> {
        self.events.read().clone()
    }

    /// All records ever delivered, in delivery order
    pub fn records(&self) -> Vec<OutputRecord> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match &e.kind {
                OutputEventKind::Record { record } => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Records delivered since the last clear (what a UI would still show)
    pub fn visible_records(&self) -> Vec<OutputRecord> {
        let events = self.events.read();
        let since = events
            .iter()
            .rposition(|e| e.kind == OutputEventKind::Cleared)
            .map_or(0, |idx| idx + 1);
        events[since..]
            .iter()
            .filter_map(|e| match &e.kind {
                OutputEventKind::Record { record } => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of events matching `pred`
    pub fn count(&self, pred: impl Fn(&OutputEventKind) -> bool) -> usize {
        self.events.read().iter().filter(|e| pred(&e.kind)).count()
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.events()).map_err(|e| ScratchError::TraceExport {
            reason: e.to_string(),
        })
    }

    /// Write the log to `path`; format follows the extension
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::to_string_pretty(&self.events()).map_err(|e| {
                ScratchError::TraceExport {
                    reason: e.to_string(),
                }
            })?,
            Some("yaml") | Some("yml") => self.to_yaml()?,
            other => {
                return Err(ScratchError::TraceExport {
                    reason: format!("unsupported trace extension: {:?}", other),
                })
            }
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for OutputLog {
    fn on_start(&self) {
        self.push(OutputEventKind::Started);
    }

    fn handle(&self, record: &OutputRecord) {
        self.push(OutputEventKind::Record {
            record: record.clone(),
        });
    }

    fn error(&self, message: &str) {
        self.push(OutputEventKind::Error {
            message: message.to_string(),
        });
    }

    fn on_finish(&self) {
        self.push(OutputEventKind::Finished);
    }

    fn clear(&self) {
        self.push(OutputEventKind::Cleared);
    }
}

impl std::fmt::Debug for OutputLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLog")
            .field("len", &self.len())
            .finish()
    }
}
