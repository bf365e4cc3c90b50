//! SequentialExecutor - run-on-edit, cancel-on-change
//!
//! Fragments run strictly in order in one long-lived session. The engine
//! remembers the executed prefix by fragment id, appends new fragments on
//! each `execute()`, and throws the session away when an edit touches
//! something already executed.
//!
//! Locking:
//! - `run_lock` (async) serializes `start()` and `execute()`
//! - `state` (parking_lot) is never held across an `.await`
//! - order is engine state, then document

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use super::listener::{edited_index, ChangeListener};
use super::state::{ActiveSession, EngineState};
use super::teardown::{self, TeardownHandle};
use crate::config::EngineConfig;
use crate::error::{Result, ScratchError};
use crate::fragment::{Fragment, FragmentId};
use crate::output::{OutputRecord, OutputSink};
use crate::process::{DispatchOutcome, ProcessBackend, SessionId};
use crate::source::{position_of, DocumentEvent, ExpressionSource};

pub(crate) struct Inner {
    source: Arc<dyn ExpressionSource>,
    backend: Arc<dyn ProcessBackend>,
    sink: Arc<dyn OutputSink>,
    config: EngineConfig,
    state: parking_lot::Mutex<EngineState>,
    run_lock: tokio::sync::Mutex<()>,
}

/// Sequential scratch executor
///
/// Cheap to clone; clones drive the same engine.
#[derive(Clone)]
pub struct SequentialExecutor {
    inner: Arc<Inner>,
}

impl SequentialExecutor {
    pub fn new(
        source: Arc<dyn ExpressionSource>,
        backend: Arc<dyn ProcessBackend>,
        sink: Arc<dyn OutputSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                backend,
                sink,
                config,
                state: parking_lot::Mutex::new(EngineState::default()),
                run_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Subscribe to edits and launch the first session
    ///
    /// A launch failure is reported through the sink; the executor still
    /// counts as started and retries the launch on `execute()`.
    #[instrument(skip(self), fields(backend = self.inner.backend.name()))]
    pub async fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| ScratchError::NoRuntime {
            reason: e.to_string(),
        })?;
        let inner = &self.inner;
        let _run = inner.run_lock.lock().await;

        let stale = {
            let mut state = inner.state.lock();
            if state.running {
                return Err(ScratchError::AlreadyStarted);
            }
            state.running = true;
            state.runtime = Some(runtime);
            state.invalidate()
        };
        let _ = inner.teardown(stale);

        let listener = ChangeListener::new(Arc::downgrade(inner), inner.source.document_id());
        let subscription = inner
            .source
            .subscribe(Arc::new(move |event: &DocumentEvent| {
                listener.on_document_changed(event)
            }));
        {
            let mut state = inner.state.lock();
            if state.running {
                state.subscription = Some(subscription);
            }
        }

        info!("executor started");
        inner.ensure_session().await;
        Ok(())
    }

    /// Unsubscribe, reset the cursor and tear the session down
    ///
    /// Idempotent: stopping a stopped executor returns a completed handle
    /// and notifies nobody.
    #[instrument(skip(self))]
    pub fn stop(&self) -> TeardownHandle {
        let inner = &self.inner;
        let (subscription, session) = {
            let mut state = inner.state.lock();
            if !state.running {
                return TeardownHandle::completed();
            }
            state.running = false;
            (state.subscription.take(), state.invalidate())
        };
        drop(subscription);

        info!(session = ?session.as_ref().map(|s| s.id), "executor stopped");
        inner.sink.on_finish();
        inner.teardown(session)
    }

    /// `stop()` and wait for teardown, up to the configured deadline
    pub async fn stop_and_wait(&self) -> Result<()> {
        self.stop()
            .wait(self.inner.config.teardown_timeout())
            .await
    }

    /// Run every fragment that has not run yet
    ///
    /// Restarts from scratch when the executed prefix lost its session or
    /// no longer matches the document. Fragment failures become fatal
    /// output records; only lifecycle problems are returned as errors.
    #[instrument(skip(self))]
    pub async fn execute(&self) -> Result<()> {
        let inner = &self.inner;
        let _run = inner.run_lock.lock().await;

        let restart = {
            let state = inner.state.lock();
            if !state.running {
                return Err(ScratchError::NotStarted);
            }
            let snapshot = inner.source.expressions();
            state.needs_restart(&snapshot)
        };

        if restart {
            let session = inner.state.lock().invalidate();
            info!(session = ?session.as_ref().map(|s| s.id), "restarting session");
            inner.sink.clear();
            inner.sink.on_start();
            if let Err(e) = inner
                .teardown(session)
                .wait(inner.config.teardown_timeout())
                .await
            {
                inner.sink.error(&e.to_string());
                inner.sink.on_finish();
                return Err(e);
            }
            inner.execute_new(true).await;
        } else {
            inner.execute_new(false).await;
        }
        Ok(())
    }

    /// Fragment right after the cursor
    pub fn first_new_expression(&self) -> Option<Fragment> {
        let state = self.inner.state.lock();
        let snapshot = self.inner.source.expressions();
        if !state.prefix_matches(&snapshot) {
            return snapshot.first().cloned();
        }
        snapshot.get(state.executed.len()).cloned()
    }

    /// Index of the last executed fragment; `None` before anything ran
    pub fn cursor(&self) -> Option<usize> {
        self.inner.state.lock().cursor()
    }

    /// Ids of the executed prefix, in order
    pub fn executed(&self) -> Vec<FragmentId> {
        self.inner.state.lock().executed.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.state.lock().session_id()
    }
}

impl std::fmt::Debug for SequentialExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SequentialExecutor")
            .field("running", &state.running)
            .field("cursor", &state.cursor())
            .field("session", &state.session_id())
            .finish()
    }
}

impl Inner {
    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn teardown(&self, session: Option<ActiveSession>) -> TeardownHandle {
        if session.is_none() {
            return TeardownHandle::completed();
        }
        let runtime = Handle::try_current()
            .ok()
            .or_else(|| self.state.lock().runtime.clone());
        teardown::spawn(session, runtime)
    }

    /// Invalidate when an edit reached the executed prefix
    ///
    /// The edited line is resolved in the post-edit sequence. Edits that
    /// start on a blank line or past the end can still delete or rewrite
    /// executed fragments, so the prefix is also checked by identity.
    /// Whitespace-only edits skip the line lookup.
    pub(super) fn invalidate_after_edit(&self, line: usize, whitespace_only: bool) {
        let stale = {
            let mut state = self.state.lock();
            if state.executed.is_empty() {
                return;
            }
            let snapshot = self.source.expressions();
            let executed = state.executed.len();
            let touched =
                !whitespace_only && edited_index(&snapshot, line).is_some_and(|i| i < executed);
            if !touched && state.prefix_matches(&snapshot) {
                return;
            }
            debug!(line, touched, cursor = ?state.cursor(), "edit reached executed prefix");
            state.invalidate()
        };
        self.sink.clear();
        let _ = self.teardown(stale);
    }

    /// Current live session, launching one if needed
    ///
    /// A dead session with an executed prefix is returned as is: the
    /// dispatch fails and the next `execute()` restarts.
    async fn ensure_session(&self) -> Option<ActiveSession> {
        let (id, dead) = {
            let mut state = self.state.lock();
            match &state.session {
                Some(session) if session.is_alive() || !state.executed.is_empty() => {
                    return Some(session.clone())
                }
                _ => {}
            }
            (state.allocate_session(), state.session.take())
        };
        let _ = self.teardown(dead);

        let process = match self.backend.launch(id).await {
            Ok(process) => process,
            Err(e) => {
                warn!(session = %id, error = %e, "launch failed");
                self.sink.error(&format!("{:#}", e));
                return None;
            }
        };

        let session = ActiveSession::new(id, process);
        let accepted = {
            let mut state = self.state.lock();
            if state.running {
                state.session = Some(session.clone());
                true
            } else {
                false
            }
        };
        if !accepted {
            debug!(session = %id, "stopped during launch");
            let _ = self.teardown(Some(session));
            return None;
        }
        info!(session = %id, backend = self.backend.name(), "session launched");
        Some(session)
    }

    async fn execute_new(&self, mut started: bool) {
        let generation = self.state.lock().generation;

        loop {
            let fragment = {
                let state = self.state.lock();
                if !state.running || state.generation != generation {
                    break;
                }
                let snapshot = self.source.expressions();
                if !state.prefix_matches(&snapshot) {
                    debug!("executed prefix changed mid-run");
                    break;
                }
                match snapshot.get(state.executed.len()) {
                    Some(fragment) => fragment.clone(),
                    None => break,
                }
            };

            if !started {
                self.sink.on_start();
                started = true;
            }

            let Some(session) = self.ensure_session().await else {
                break;
            };

            debug!(session = %session.id, fragment = %fragment.id(), range = %fragment.range(), "dispatching");
            let result = {
                let mut process = session.process.lock().await;
                tokio::select! {
                    biased;
                    _ = session.cancel.cancelled() => None,
                    result = process.dispatch(&fragment) => Some(result),
                }
            };
            let Some(result) = result else {
                debug!(fragment = %fragment.id(), "dispatch cancelled");
                break;
            };

            match result {
                Ok(outcome) if outcome.is_success() => {
                    if !self.advance(session.id, generation, &fragment) {
                        break;
                    }
                    self.sink
                        .handle(&OutputRecord::output(&fragment, outcome.output));
                }
                Ok(outcome) => {
                    if self.is_current(session.id, generation) {
                        self.sink
                            .handle(&OutputRecord::fatal(&fragment, failure_text(&outcome)));
                    }
                    break;
                }
                Err(e) => {
                    if self.is_current(session.id, generation) {
                        self.sink
                            .handle(&OutputRecord::fatal(&fragment, format!("{:#}", e)));
                    }
                    break;
                }
            }
        }

        if started && self.is_running() {
            self.sink.on_finish();
        }
    }

    fn is_current(&self, session: SessionId, generation: u64) -> bool {
        let state = self.state.lock();
        state.generation == generation && state.session_id() == Some(session)
    }

    /// Move the cursor onto `fragment` if it is still the next one
    ///
    /// Re-resolves the fragment by id in the current sequence. If it was
    /// edited or moved while running, the session holds code the document
    /// no longer has, so everything is invalidated.
    fn advance(&self, session: SessionId, generation: u64, fragment: &Fragment) -> bool {
        let stale = {
            let mut state = self.state.lock();
            if state.generation != generation || state.session_id() != Some(session) {
                return false;
            }
            let snapshot = self.source.expressions();
            let position = position_of(&snapshot, fragment.id());
            if position == Some(state.executed.len()) && state.prefix_matches(&snapshot) {
                state.executed.push(fragment.id());
                return true;
            }
            state.invalidate()
        };
        debug!(fragment = %fragment.id(), "fragment changed while running");
        self.sink.clear();
        let _ = self.teardown(stale);
        false
    }
}

fn failure_text(outcome: &DispatchOutcome) -> String {
    if outcome.output.is_empty() {
        format!("exit status {}", outcome.status)
    } else {
        format!("{}\nexit status {}", outcome.output, outcome.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputLog;
    use crate::process::ScriptedBackend;
    use crate::source::ScratchDocument;

    fn executor(text: &str) -> (SequentialExecutor, Arc<ScratchDocument>, ScriptedBackend, OutputLog) {
        let document = Arc::new(ScratchDocument::new(text));
        let backend = ScriptedBackend::new();
        let log = OutputLog::new();
        let executor = SequentialExecutor::new(
            document.clone(),
            Arc::new(backend.clone()),
            Arc::new(log.clone()),
            EngineConfig::default(),
        );
        (executor, document, backend, log)
    }

    #[tokio::test]
    async fn execute_before_start_is_rejected() {
        let (executor, _, _, _) = executor("a\n");
        let err = executor.execute().await.unwrap_err();
        assert!(matches!(err, ScratchError::NotStarted));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (executor, _, _, _) = executor("a\n");
        executor.start().await.unwrap();
        assert!(matches!(
            executor.start().await.unwrap_err(),
            ScratchError::AlreadyStarted
        ));
        executor.stop_and_wait().await.unwrap();
    }

    #[tokio::test]
    async fn start_launches_a_session() {
        let (executor, _, backend, _) = executor("a\n");
        executor.start().await.unwrap();

        assert!(executor.is_running());
        assert_eq!(executor.session_id(), Some(SessionId::new(1)));
        assert_eq!(backend.launched(), vec![SessionId::new(1)]);
        assert_eq!(executor.cursor(), None);
        executor.stop_and_wait().await.unwrap();
    }

    #[tokio::test]
    async fn first_new_expression_tracks_cursor() {
        let (executor, _, _, _) = executor("a\n\nb\n");
        executor.start().await.unwrap();
        assert_eq!(executor.first_new_expression().unwrap().text(), "a");

        executor.execute().await.unwrap();
        assert!(executor.first_new_expression().is_none());
        executor.stop_and_wait().await.unwrap();
    }

    #[tokio::test]
    async fn edits_from_other_documents_are_ignored() {
        let (executor, document, _, log) = executor("a\n");
        executor.start().await.unwrap();
        executor.execute().await.unwrap();

        let other = ScratchDocument::new("a\n");
        other.replace_lines(0, 1, "changed").unwrap();
        assert_eq!(executor.cursor(), Some(0));

        document.replace_lines(0, 1, "a2").unwrap();
        assert_eq!(executor.cursor(), None);
        assert_eq!(log.count(|k| matches!(k, crate::output::OutputEventKind::Cleared)), 1);
        executor.stop_and_wait().await.unwrap();
    }

    #[test]
    fn failure_text_includes_status() {
        assert_eq!(failure_text(&DispatchOutcome::failed("", 2)), "exit status 2");
        assert_eq!(
            failure_text(&DispatchOutcome::failed("no such file", 1)),
            "no such file\nexit status 1"
        );
    }
}
