//! CompositeOutputHandler - fan-out to subscribed sinks
//!
//! Each subscriber is notified independently. A panicking subscriber is
//! logged and skipped; the others still receive the notification.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use super::{OutputRecord, OutputSink};

#[derive(Default)]
pub struct CompositeOutputHandler {
    sinks: RwLock<Vec<Arc<dyn OutputSink>>>,
}

impl CompositeOutputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style subscribe
    pub fn with(self, sink: Arc<dyn OutputSink>) -> Self {
        self.add(sink);
        self
    }

    pub fn add(&self, sink: Arc<dyn OutputSink>) {
        self.sinks.write().push(sink);
    }

    /// Remove a sink by identity; returns whether it was subscribed
    pub fn remove(&self, sink: &Arc<dyn OutputSink>) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|s| !Arc::ptr_eq(s, sink));
        sinks.len() != before
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn each(&self, what: &str, f: impl Fn(&dyn OutputSink)) {
        // Snapshot so a sink may subscribe/unsubscribe while being notified
        let sinks: Vec<Arc<dyn OutputSink>> = self.sinks.read().clone();
        for (idx, sink) in sinks.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| f(sink.as_ref()))).is_err() {
                warn!(subscriber = idx, notification = what, "output subscriber panicked");
            }
        }
    }
}

impl OutputSink for CompositeOutputHandler {
    fn on_start(&self) {
        self.each("on_start", |s| s.on_start());
    }

    fn handle(&self, record: &OutputRecord) {
        self.each("handle", |s| s.handle(record));
    }

    fn error(&self, message: &str) {
        self.each("error", |s| s.error(message));
    }

    fn on_finish(&self) {
        self.each("on_finish", |s| s.on_finish());
    }

    fn clear(&self) {
        self.each("clear", |s| s.clear());
    }
}

impl std::fmt::Debug for CompositeOutputHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeOutputHandler")
            .field("sinks", &self.len())
            .finish()
    }
}
