//! Engine state - everything the engine owns, behind one lock

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::fragment::{Fragment, FragmentId};
use crate::process::{ProcessSession, SessionId};
use crate::source::Subscription;

/// A launched session plus its cancellation token
#[derive(Clone)]
pub(crate) struct ActiveSession {
    pub id: SessionId,
    pub process: Arc<tokio::sync::Mutex<Box<dyn ProcessSession>>>,
    pub cancel: CancellationToken,
}

impl ActiveSession {
    pub fn new(id: SessionId, process: Box<dyn ProcessSession>) -> Self {
        Self {
            id,
            process: Arc::new(tokio::sync::Mutex::new(process)),
            cancel: CancellationToken::new(),
        }
    }

    /// A session busy with a dispatch counts as alive
    pub fn is_alive(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.process.try_lock() {
            Ok(mut process) => process.is_alive(),
            Err(_) => true,
        }
    }
}

#[derive(Default)]
pub(crate) struct EngineState {
    /// Ids of the executed prefix, in order; the cursor is `len - 1`
    pub executed: Vec<FragmentId>,
    pub session: Option<ActiveSession>,
    pub subscription: Option<Subscription>,
    pub running: bool,
    /// Bumped on every invalidation; runs from an older generation stop
    pub generation: u64,
    pub next_session: u64,
    pub runtime: Option<Handle>,
}

impl EngineState {
    pub fn cursor(&self) -> Option<usize> {
        self.executed.len().checked_sub(1)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Executed ids still lead the current sequence, in order
    pub fn prefix_matches(&self, snapshot: &[Fragment]) -> bool {
        snapshot.len() >= self.executed.len()
            && snapshot
                .iter()
                .zip(&self.executed)
                .all(|(fragment, id)| fragment.id() == *id)
    }

    /// Executed work exists but can no longer be appended to
    pub fn needs_restart(&self, snapshot: &[Fragment]) -> bool {
        if self.executed.is_empty() {
            return false;
        }
        if !self.prefix_matches(snapshot) {
            return true;
        }
        !self.session.as_ref().is_some_and(ActiveSession::is_alive)
    }

    /// Reset the cursor and hand back the session for teardown
    pub fn invalidate(&mut self) -> Option<ActiveSession> {
        self.executed.clear();
        self.generation += 1;
        self.session.take()
    }

    pub fn allocate_session(&mut self) -> SessionId {
        self.next_session += 1;
        SessionId::new(self.next_session)
    }
}
