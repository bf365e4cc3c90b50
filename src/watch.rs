//! File Watcher
//!
//! Watches one scratch file for changes and forwards them to async code.
//!
//! ```text
//! notify::RecommendedWatcher → std mpsc → blocking bridge → tokio mpsc
//! ```
//!
//! The parent directory is watched (non-recursively) so editors that save
//! by writing a temp file and renaming it are still seen.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;
use tracing::debug;

use crate::error::{Result, ScratchError};

/// Change to the watched file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// Created, written or renamed into place
    Modified(PathBuf),
    Removed(PathBuf),
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Modified(p) | FileEvent::Removed(p) => p,
        }
    }
}

pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    event_rx: async_mpsc::Receiver<FileEvent>,
    path: PathBuf,
}

impl FileWatcher {
    /// Start watching `path`; must be called inside a tokio runtime
    pub fn new(path: PathBuf) -> Result<Self> {
        let watch_err = |e: notify::Error| ScratchError::WatchError {
            reason: e.to_string(),
        };

        let path = path.canonicalize().map_err(|_| ScratchError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ScratchError::WatchError {
                reason: format!("{} has no parent directory", path.display()),
            })?;

        let (event_tx, event_rx) = async_mpsc::channel(100);
        let (sync_tx, sync_rx) = mpsc::channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = result {
                    let _ = sync_tx.send(event);
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .map_err(watch_err)?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(watch_err)?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || loop {
            match sync_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    if let Some(file_event) = convert_event(&event, &target) {
                        debug!(?file_event, "scratch file changed");
                        if event_tx.blocking_send(file_event).is_err() {
                            break;
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if event_tx.is_closed() {
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        });

        Ok(Self {
            _watcher: watcher,
            event_rx,
            path,
        })
    }

    /// Next change, collapsing a burst of events that arrive within `quiet`
    pub async fn next_debounced(&mut self, quiet: Duration) -> Option<FileEvent> {
        let mut last = self.event_rx.recv().await?;
        while let Ok(Some(event)) = tokio::time::timeout(quiet, self.event_rx.recv()).await {
            last = event;
        }
        Some(last)
    }

    /// Canonical path being watched
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Map a notify event to a change of `target`, if it concerns it
fn convert_event(event: &Event, target: &Path) -> Option<FileEvent> {
    let target_name = target.file_name()?;
    let path = event
        .paths
        .iter()
        .find(|p| p.file_name() == Some(target_name))?
        .clone();

    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => Some(FileEvent::Modified(path)),
        EventKind::Remove(_) => Some(FileEvent::Removed(path)),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}
