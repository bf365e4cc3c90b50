//! Expression Source - ordered fragments over editable text
//!
//! - `ExpressionSource`: what the engine reads (snapshots + line lookup)
//! - `DocumentEvent`: one edit, delivered to subscribers after it lands
//! - `ListenerRegistry` / `Subscription`: subscribe/unsubscribe with a
//!   disposable token
//! - `ScratchDocument`: the in-memory implementation

mod document;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::fragment::{Fragment, FragmentId};

pub use document::ScratchDocument;

/// Immutable view of the fragment sequence at one point in time
pub type FragmentSnapshot = Arc<Vec<Fragment>>;

/// Callback invoked for every edit
pub type DocumentListener = Arc<dyn Fn(&DocumentEvent) + Send + Sync>;

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(u64);

impl DocumentId {
    pub fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

/// A single edit to a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEvent {
    /// Document that was edited
    pub document: DocumentId,
    /// First edited line (same in pre- and post-edit coordinates)
    pub line: usize,
    /// Replaced text
    pub old_text: String,
    /// Inserted text
    pub new_text: String,
}

impl DocumentEvent {
    /// Whitespace replaced by whitespace: no semantic change
    pub fn is_whitespace_only(&self) -> bool {
        self.old_text.trim().is_empty() && self.new_text.trim().is_empty()
    }
}

/// Ordered fragments tied to editable text
pub trait ExpressionSource: Send + Sync {
    /// Identity of the underlying document
    fn document_id(&self) -> DocumentId;

    /// Consistent snapshot of the fragment sequence
    fn expressions(&self) -> FragmentSnapshot;

    /// Fragment covering `line`, if any
    fn expression_at_line(&self, line: usize) -> Option<Fragment> {
        self.expressions()
            .iter()
            .find(|f| f.range().contains(line))
            .cloned()
    }

    /// Register an edit listener; dropping the token unregisters it
    fn subscribe(&self, listener: DocumentListener) -> Subscription;
}

/// Index of `id` in `snapshot`
pub fn position_of(snapshot: &[Fragment], id: FragmentId) -> Option<usize> {
    snapshot.iter().position(|f| f.id() == id)
}

/// Listener list shared between a source and its subscription tokens
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<(u64, DocumentListener)>>,
    next_key: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(self: &Arc<Self>, listener: DocumentListener) -> Subscription {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((key, listener));
        Subscription {
            registry: Arc::downgrade(self),
            key: Some(key),
        }
    }

    fn remove(&self, key: u64) {
        self.listeners.lock().retain(|(k, _)| *k != key);
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke listeners in registration order. The lock is not held while
    /// they run, so a listener may read the source or unsubscribe.
    pub fn notify(&self, event: &DocumentEvent) {
        let listeners: Vec<DocumentListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            listener(event);
        }
    }
}

/// Disposable listener registration
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    key: Option<u64>,
}

impl Subscription {
    /// Unregister now (same as dropping)
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(key) = self.key.take() {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(key);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(old: &str, new: &str) -> DocumentEvent {
        DocumentEvent {
            document: DocumentId::next(),
            line: 0,
            old_text: old.into(),
            new_text: new.into(),
        }
    }

    #[test]
    fn whitespace_only_detection() {
        assert!(event("", "\n").is_whitespace_only());
        assert!(event("  \t", "").is_whitespace_only());
        assert!(!event("", "x").is_whitespace_only());
        assert!(!event("val a = 1", " ").is_whitespace_only());
    }

    #[test]
    fn subscription_drop_unregisters() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let sub = registry.subscribe(Arc::new(move |_: &DocumentEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(registry.len(), 1);

        registry.notify(&event("a", "b"));
        drop(sub);
        registry.notify(&event("a", "b"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn explicit_unsubscribe_only_removes_own_listener() {
        let registry = ListenerRegistry::new();
        let first = registry.subscribe(Arc::new(|_: &DocumentEvent| {}));
        let _second = registry.subscribe(Arc::new(|_: &DocumentEvent| {}));

        first.unsubscribe();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let registry = ListenerRegistry::new();
        let sub = registry.subscribe(Arc::new(|_: &DocumentEvent| {}));
        drop(registry);
        drop(sub);
    }

    #[test]
    fn listener_may_unsubscribe_during_notify() {
        let registry = ListenerRegistry::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_in_listener = Arc::clone(&slot);
        let sub = registry.subscribe(Arc::new(move |_: &DocumentEvent| {
            slot_in_listener.lock().take();
        }));
        *slot.lock() = Some(sub);

        registry.notify(&event("a", "b"));
        assert!(registry.is_empty());
    }
}
