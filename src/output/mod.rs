//! Output Module - where execution results go
//!
//! - `OutputSink`: start/record/error/finish/clear notifications
//! - `OutputRecord`: one rendered result attached to a fragment's lines
//! - `CompositeOutputHandler`: fan-out to any number of sinks
//! - `OutputLog`: append-only event log, exportable as JSON/YAML
//! - `TerminalSink`: colored terminal rendering for the CLI

mod composite;
mod log;
mod terminal;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fragment::{Fragment, LineRange};

pub use composite::CompositeOutputHandler;
pub use log::{OutputEvent, OutputEventKind, OutputLog};
pub use terminal::TerminalSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Output,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Output => "output",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// One rendered result for one fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Source lines the record belongs to
    pub range: LineRange,
    /// Rendered text
    pub text: String,
    pub severity: Severity,
    /// Line the record is shown next to
    pub line: usize,
}

impl OutputRecord {
    /// Regular output, shown after the fragment's last line
    pub fn output(fragment: &Fragment, text: impl Into<String>) -> Self {
        Self::at(fragment, text, Severity::Output)
    }

    /// Fatal dispatch failure for `fragment`
    pub fn fatal(fragment: &Fragment, text: impl Into<String>) -> Self {
        Self::at(fragment, text, Severity::Fatal)
    }

    fn at(fragment: &Fragment, text: impl Into<String>, severity: Severity) -> Self {
        Self {
            range: fragment.range(),
            text: text.into(),
            severity,
            line: fragment.end_line(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// Destination for execution progress
///
/// Implementations must be cheap and non-blocking: the engine calls them
/// inline between fragment dispatches.
pub trait OutputSink: Send + Sync {
    /// A run is starting
    fn on_start(&self);

    /// A fragment produced a record
    fn handle(&self, record: &OutputRecord);

    /// An error not tied to a fragment (e.g. the interpreter failed to launch)
    fn error(&self, message: &str);

    /// A run, or the whole executor, finished
    fn on_finish(&self);

    /// Forget everything shown so far
    fn clear(&self);
}
