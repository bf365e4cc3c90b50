//! Change Listener - turns document edits into invalidations
//!
//! An edit invalidates when its first line lands in an executed fragment,
//! or when the executed ids no longer lead the fragment sequence (a
//! deletion or merge that started on a blank line). Whitespace-only edits
//! are checked by identity alone.
//!
//! Holds only a weak reference to the engine, so a forgotten subscription
//! never keeps an executor alive.

use std::sync::Weak;

use crate::fragment::Fragment;
use crate::source::{DocumentEvent, DocumentId};

use super::executor::Inner;

pub(crate) struct ChangeListener {
    engine: Weak<Inner>,
    document: DocumentId,
}

impl ChangeListener {
    pub fn new(engine: Weak<Inner>, document: DocumentId) -> Self {
        Self { engine, document }
    }

    pub fn on_document_changed(&self, event: &DocumentEvent) {
        if event.document != self.document {
            return;
        }
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        engine.invalidate_after_edit(event.line, event.is_whitespace_only());
    }
}

/// Index of the fragment covering `line` in the post-edit sequence
pub(crate) fn edited_index(snapshot: &[Fragment], line: usize) -> Option<usize> {
    snapshot.iter().position(|f| f.range().contains(line))
}
