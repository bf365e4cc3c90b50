//! Scratch Runner - run-on-edit, cancel-on-change fragment execution
//!
//! A scratch file is split into fragments (runs of non-blank lines). The
//! engine feeds them one by one to a long-lived interpreter, appends new
//! fragments as they are written, and restarts from scratch when an edit
//! touches something that already ran.

pub mod config;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod output;
pub mod process;
pub mod source;
pub mod watch;

pub use config::{EngineConfig, ProcessConfig, ScratchConfig};
pub use engine::{SequentialExecutor, TeardownHandle};
pub use error::{FixSuggestion, Result, ScratchError};
pub use fragment::{Fragment, FragmentId, LineRange};
pub use output::{
    CompositeOutputHandler, OutputEvent, OutputEventKind, OutputLog, OutputRecord, OutputSink,
    Severity, TerminalSink,
};
pub use process::{
    DispatchOutcome, ProcessBackend, ProcessSession, ReplBackend, ScriptedBackend,
    ScriptedFailure, SessionId, TeardownMode,
};
pub use source::{
    DocumentEvent, DocumentId, ExpressionSource, FragmentSnapshot, ScratchDocument, Subscription,
};
pub use watch::{FileEvent, FileWatcher};
