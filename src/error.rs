//! Error types with fix suggestions
//!
//! Error code ranges:
//! - SCRATCH-000-009: Document/fragment errors
//! - SCRATCH-010-019: Process session errors
//! - SCRATCH-020-029: Engine lifecycle errors
//! - SCRATCH-030-039: Config/IO errors
//!
//! Fragment execution failures never surface here: the engine turns them
//! into fatal output records. These errors cover lifecycle and setup.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScratchError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum ScratchError {
    // ═══════════════════════════════════════════
    // DOCUMENT ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[SCRATCH-001] Line range {start}..{end} is outside the document ({line_count} lines)")]
    InvalidLineRange {
        start: usize,
        end: usize,
        line_count: usize,
    },

    #[error("[SCRATCH-002] Scratch file not found: {path}")]
    FileNotFound { path: String },

    // ═══════════════════════════════════════════
    // PROCESS ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[SCRATCH-010] Failed to launch '{program}': {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("[SCRATCH-011] Session {session} is not running")]
    SessionClosed { session: u64 },

    #[error("[SCRATCH-012] Process I/O failed: {reason}")]
    ProcessIo { reason: String },

    // ═══════════════════════════════════════════
    // ENGINE ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[SCRATCH-020] Executor is not started")]
    NotStarted,

    #[error("[SCRATCH-021] Executor is already started")]
    AlreadyStarted,

    #[error("[SCRATCH-022] Teardown did not signal completion within {}ms", .deadline.as_millis())]
    TeardownTimeout { deadline: Duration },

    #[error("[SCRATCH-023] No tokio runtime available: {reason}")]
    NoRuntime { reason: String },

    // ═══════════════════════════════════════════
    // CONFIG / IO ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[SCRATCH-030] Config error: {reason}")]
    ConfigError { reason: String },

    #[error("[SCRATCH-031] Watch error: {reason}")]
    WatchError { reason: String },

    #[error("[SCRATCH-032] Trace export failed: {reason}")]
    TraceExport { reason: String },

    #[error("[SCRATCH-039] IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScratchError {
    /// Short error code, e.g. `SCRATCH-022`
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidLineRange { .. } => "SCRATCH-001",
            Self::FileNotFound { .. } => "SCRATCH-002",
            Self::LaunchFailed { .. } => "SCRATCH-010",
            Self::SessionClosed { .. } => "SCRATCH-011",
            Self::ProcessIo { .. } => "SCRATCH-012",
            Self::NotStarted => "SCRATCH-020",
            Self::AlreadyStarted => "SCRATCH-021",
            Self::TeardownTimeout { .. } => "SCRATCH-022",
            Self::NoRuntime { .. } => "SCRATCH-023",
            Self::ConfigError { .. } => "SCRATCH-030",
            Self::WatchError { .. } => "SCRATCH-031",
            Self::TraceExport { .. } => "SCRATCH-032",
            Self::Io(_) => "SCRATCH-039",
        }
    }
}

impl FixSuggestion for ScratchError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            Self::InvalidLineRange { .. } => Some("Use a line range within the document"),
            Self::FileNotFound { .. } => Some("Check the file path exists"),
            Self::LaunchFailed { .. } => {
                Some("Check the interpreter is installed (--program or SCRATCH_PROGRAM)")
            }
            Self::SessionClosed { .. } => Some("Run execute() again to start a fresh session"),
            Self::ProcessIo { .. } => Some("The interpreter exited; check its stderr output"),
            Self::NotStarted => Some("Call start() before execute()"),
            Self::AlreadyStarted => Some("Call stop() before starting again"),
            Self::TeardownTimeout { .. } => {
                Some("The interpreter ignored termination; check for stuck child processes")
            }
            Self::NoRuntime { .. } => Some("Call start() from inside a tokio runtime"),
            Self::ConfigError { .. } => Some("Check ~/.config/scratch/config.toml syntax"),
            Self::WatchError { .. } => Some("Check the file is readable and not on a remote mount"),
            Self::TraceExport { .. } => Some("Use a .json, .yaml or .yml trace path"),
            Self::Io(_) => Some("Check file path and permissions"),
        }
    }
}
