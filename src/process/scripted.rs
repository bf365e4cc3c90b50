//! Scripted backend for testing
//!
//! Returns canned outputs without spawning processes. Failures, slow
//! fragments, crashes and stuck teardowns can be injected, and every
//! launch/dispatch/terminate is recorded for assertions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DispatchOutcome, ProcessBackend, ProcessSession, SessionId};
use crate::error::ScratchError;
use crate::fragment::Fragment;

/// How a scripted fragment fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Dispatch itself errors (process-level failure)
    Error(String),
    /// Fragment ran but reported a non-zero status
    Status(i32),
}

/// How `terminate()` behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeardownMode {
    #[default]
    Immediate,
    Delay(Duration),
    /// Never completes; for teardown deadline tests
    Never,
}

#[derive(Default)]
struct Script {
    outputs: HashMap<String, String>,
    failures: HashMap<String, ScriptedFailure>,
    dispatch_delay: Duration,
    teardown: TeardownMode,
    launch_failure: Option<String>,
}

#[derive(Default)]
struct Journal {
    launched: Vec<SessionId>,
    dispatched: Vec<(SessionId, String)>,
    terminated: Vec<SessionId>,
    crashed: HashSet<SessionId>,
}

/// Backend whose sessions echo fragment text unless told otherwise
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output returned for a fragment with exactly this text
    pub fn with_output(self, text: impl Into<String>, output: impl Into<String>) -> Self {
        self.script.lock().outputs.insert(text.into(), output.into());
        self
    }

    pub fn failing_with_error(self, text: impl Into<String>, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .failures
            .insert(text.into(), ScriptedFailure::Error(message.into()));
        self
    }

    pub fn failing_with_status(self, text: impl Into<String>, status: i32) -> Self {
        self.script
            .lock()
            .failures
            .insert(text.into(), ScriptedFailure::Status(status));
        self
    }

    /// Every dispatch sleeps this long before answering
    pub fn with_dispatch_delay(self, delay: Duration) -> Self {
        self.script.lock().dispatch_delay = delay;
        self
    }

    pub fn with_teardown(self, mode: TeardownMode) -> Self {
        self.set_teardown(mode);
        self
    }

    pub fn failing_launch(self, message: impl Into<String>) -> Self {
        self.set_launch_failure(Some(message.into()));
        self
    }

    /// Change teardown behavior for sessions terminated from now on
    pub fn set_teardown(&self, mode: TeardownMode) {
        self.script.lock().teardown = mode;
    }

    pub fn set_launch_failure(&self, message: Option<String>) {
        self.script.lock().launch_failure = message;
    }

    /// Make a live session die as if the process crashed
    pub fn crash(&self, session: SessionId) {
        self.journal.lock().crashed.insert(session);
    }

    /// Sessions launched so far, in order
    pub fn launched(&self) -> Vec<SessionId> {
        self.journal.lock().launched.clone()
    }

    /// Every dispatch with the session it went to
    pub fn dispatched(&self) -> Vec<(SessionId, String)> {
        self.journal.lock().dispatched.clone()
    }

    pub fn dispatched_texts(&self) -> Vec<String> {
        self.journal
            .lock()
            .dispatched
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Sessions whose termination completed
    pub fn terminated(&self) -> Vec<SessionId> {
        self.journal.lock().terminated.clone()
    }
}

impl std::fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let journal = self.journal.lock();
        f.debug_struct("ScriptedBackend")
            .field("launched", &journal.launched.len())
            .field("dispatched", &journal.dispatched.len())
            .finish()
    }
}

#[async_trait]
impl ProcessBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn launch(&self, id: SessionId) -> anyhow::Result<Box<dyn ProcessSession>> {
        if let Some(reason) = self.script.lock().launch_failure.clone() {
            bail!(ScratchError::LaunchFailed {
                program: "scripted".into(),
                reason,
            });
        }
        self.journal.lock().launched.push(id);
        Ok(Box::new(ScriptedSession {
            id,
            backend: self.clone(),
            alive: true,
        }))
    }
}

struct ScriptedSession {
    id: SessionId,
    backend: ScriptedBackend,
    alive: bool,
}

impl ScriptedSession {
    fn crashed(&self) -> bool {
        self.backend.journal.lock().crashed.contains(&self.id)
    }
}

#[async_trait]
impl ProcessSession for ScriptedSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn is_alive(&mut self) -> bool {
        self.alive && !self.crashed()
    }

    async fn dispatch(&mut self, fragment: &Fragment) -> anyhow::Result<DispatchOutcome> {
        if !self.is_alive() {
            bail!(ScratchError::SessionClosed {
                session: self.id.get()
            });
        }

        let text = fragment.text().to_string();
        self.backend
            .journal
            .lock()
            .dispatched
            .push((self.id, text.clone()));

        let (delay, output, failure) = {
            let script = self.backend.script.lock();
            (
                script.dispatch_delay,
                script.outputs.get(&text).cloned().unwrap_or_else(|| text.clone()),
                script.failures.get(&text).cloned(),
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(ScriptedFailure::Error(message)) => bail!(message),
            Some(ScriptedFailure::Status(status)) => Ok(DispatchOutcome::failed(output, status)),
            None => Ok(DispatchOutcome::success(output)),
        }
    }

    async fn await_exit(&mut self) -> anyhow::Result<Option<i32>> {
        while self.is_alive() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(Some(if self.crashed() { 137 } else { 0 }))
    }

    async fn terminate(&mut self) -> anyhow::Result<Option<i32>> {
        self.alive = false;
        let mode = self.backend.script.lock().teardown;
        match mode {
            TeardownMode::Immediate => {}
            TeardownMode::Delay(delay) => tokio::time::sleep(delay).await,
            TeardownMode::Never => std::future::pending::<()>().await,
        }
        self.backend.journal.lock().terminated.push(self.id);
        Ok(Some(0))
    }
}
