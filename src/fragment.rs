//! Fragment - one executable unit of scratch source
//!
//! Fragments are immutable. The document replaces them on edit;
//! the engine only reads them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

static NEXT_FRAGMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a fragment across edits that don't touch it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentId(u64);

impl FragmentId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        Self(NEXT_FRAGMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inclusive, 0-based line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn shifted(&self, delta: isize) -> Self {
        Self {
            start: self.start.saturating_add_signed(delta),
            end: self.end.saturating_add_signed(delta),
        }
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 1-based for humans
        write!(f, "{}-{}", self.start + 1, self.end + 1)
    }
}

/// One executable unit of source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    id: FragmentId,
    text: Arc<str>,
    range: LineRange,
}

impl Fragment {
    pub fn new(id: FragmentId, text: impl Into<Arc<str>>, range: LineRange) -> Self {
        Self {
            id,
            text: text.into(),
            range,
        }
    }

    pub fn id(&self) -> FragmentId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn range(&self) -> LineRange {
        self.range
    }

    pub fn start_line(&self) -> usize {
        self.range.start
    }

    pub fn end_line(&self) -> usize {
        self.range.end
    }
}
