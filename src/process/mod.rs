//! # Process Sessions
//!
//! The long-lived backing process fragments are executed in.
//!
//! - [`ProcessBackend`] - launches sessions
//! - [`ProcessSession`] - one process lifetime: dispatch, await exit, terminate
//! - [`ReplBackend`] - real interpreter over stdin/stdout (`sh` by default)
//! - [`ScriptedBackend`] - canned outputs, failure and delay injection for tests
//!
//! Backends report failures with `anyhow::Result`; the engine turns them
//! into fatal output records and never lets them escape `execute()`.

mod repl;
mod scripted;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fragment::Fragment;

pub use repl::{ReplBackend, ReplSession};
pub use scripted::{ScriptedBackend, ScriptedFailure, TeardownMode};

/// Identity of one process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Result of running one fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Captured output (stdout + stderr of the fragment)
    pub output: String,
    /// Status reported for the fragment; non-zero is a failure
    pub status: i32,
}

impl DispatchOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: 0,
        }
    }

    pub fn failed(output: impl Into<String>, status: i32) -> Self {
        Self {
            output: output.into(),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// One lifetime of the backing process
#[async_trait]
pub trait ProcessSession: Send {
    fn id(&self) -> SessionId;

    /// Whether the process can still accept fragments
    fn is_alive(&mut self) -> bool;

    /// Run one fragment and collect its output
    ///
    /// Dropping the returned future mid-flight leaves the session unusable;
    /// the engine only does that right before terminating it.
    async fn dispatch(&mut self, fragment: &Fragment) -> anyhow::Result<DispatchOutcome>;

    /// Wait for the process to exit on its own
    async fn await_exit(&mut self) -> anyhow::Result<Option<i32>>;

    /// Ask the process to exit, forcing it if needed, and wait for it
    async fn terminate(&mut self) -> anyhow::Result<Option<i32>>;
}

/// Launches process sessions
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn launch(&self, id: SessionId) -> anyhow::Result<Box<dyn ProcessSession>>;
}
