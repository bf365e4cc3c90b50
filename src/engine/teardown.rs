//! Teardown handshake
//!
//! Tearing a session down is asynchronous. The caller gets a
//! `TeardownHandle` it can await with a deadline, or drop to fire and forget.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::state::ActiveSession;
use crate::error::{Result, ScratchError};

/// Completion signal of one teardown
#[derive(Debug)]
pub struct TeardownHandle {
    rx: oneshot::Receiver<()>,
}

impl TeardownHandle {
    /// Handle for a teardown with nothing to do
    pub fn completed() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Self { rx }
    }

    /// Wait for the teardown to signal, failing once `deadline` passes
    pub async fn wait(self, deadline: Duration) -> Result<()> {
        match tokio::time::timeout(deadline, self.rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ScratchError::ProcessIo {
                reason: "teardown ended without signalling completion".into(),
            }),
            Err(_) => Err(ScratchError::TeardownTimeout { deadline }),
        }
    }
}

/// Cancel the session and terminate it on `runtime`
///
/// The in-flight dispatch (if any) observes the cancellation and releases
/// the process, then `terminate()` runs and the handle is signalled.
pub(crate) fn spawn(session: Option<ActiveSession>, runtime: Option<Handle>) -> TeardownHandle {
    let Some(session) = session else {
        return TeardownHandle::completed();
    };
    session.cancel.cancel();

    let (tx, rx) = oneshot::channel();
    let Some(runtime) = runtime else {
        // No runtime to terminate on: dropping the last handle kills the child
        warn!(session = %session.id, "no runtime for teardown, dropping session");
        drop(session);
        let _ = tx.send(());
        return TeardownHandle { rx };
    };

    runtime.spawn(async move {
        let id = session.id;
        let mut process = session.process.lock().await;
        match process.terminate().await {
            Ok(status) => debug!(session = %id, ?status, "session terminated"),
            Err(e) => warn!(session = %id, error = %e, "session terminate failed"),
        }
        let _ = tx.send(());
    });
    TeardownHandle { rx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessBackend, ScriptedBackend, SessionId, TeardownMode};

    async fn session(backend: &ScriptedBackend, id: u64) -> ActiveSession {
        let process = backend.launch(SessionId::new(id)).await.unwrap();
        ActiveSession::new(SessionId::new(id), process)
    }

    #[tokio::test]
    async fn completed_handle_resolves_immediately() {
        TeardownHandle::completed()
            .wait(Duration::from_millis(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn teardown_terminates_and_signals() {
        let backend = ScriptedBackend::new();
        let active = session(&backend, 1).await;
        let cancel = active.cancel.clone();

        spawn(Some(active), Handle::try_current().ok())
            .wait(Duration::from_secs(1))
            .await
            .unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(backend.terminated(), vec![SessionId::new(1)]);
    }

    #[tokio::test]
    async fn stuck_teardown_times_out() {
        let backend = ScriptedBackend::new().with_teardown(TeardownMode::Never);
        let active = session(&backend, 1).await;

        let err = spawn(Some(active), Handle::try_current().ok())
            .wait(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ScratchError::TeardownTimeout { .. }));
    }
}
