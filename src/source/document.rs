//! ScratchDocument - editable line buffer split into fragments
//!
//! A fragment is a maximal run of non-blank lines. Edits are line-range
//! replacements; fragments the edit doesn't touch keep their id, shifted
//! by the edit's line delta.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::{
    position_of, DocumentEvent, DocumentId, DocumentListener, ExpressionSource, FragmentSnapshot,
    ListenerRegistry, Subscription,
};
use crate::error::{Result, ScratchError};
use crate::fragment::{Fragment, FragmentId, LineRange};

/// Line range replaced by an edit: old `[start, old_end)` became `[start, start + new_len)`
#[derive(Debug, Clone, Copy)]
struct Edit {
    start: usize,
    old_end: usize,
    new_len: usize,
}

impl Edit {
    fn delta(&self) -> isize {
        self.new_len as isize - (self.old_end - self.start) as isize
    }
}

struct DocState {
    lines: Vec<String>,
    fragments: FragmentSnapshot,
}

/// In-memory scratch document
pub struct ScratchDocument {
    id: DocumentId,
    state: RwLock<DocState>,
    listeners: Arc<ListenerRegistry>,
}

impl ScratchDocument {
    pub fn new(text: &str) -> Self {
        let lines = split_lines(text);
        let fragments = Arc::new(segment(&lines, &[], None));
        Self {
            id: DocumentId::next(),
            state: RwLock::new(DocState { lines, fragments }),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Full text, newline-terminated when non-empty
    pub fn text(&self) -> String {
        let state = self.state.read();
        if state.lines.is_empty() {
            String::new()
        } else {
            let mut text = state.lines.join("\n");
            text.push('\n');
            text
        }
    }

    pub fn line_count(&self) -> usize {
        self.state.read().lines.len()
    }

    /// Replace lines `[start, end)` with `text` (split on `\n`; `""` inserts nothing)
    pub fn replace_lines(&self, start: usize, end: usize, text: &str) -> Result<()> {
        self.replace_range(start, end, split_lines(text))
    }

    /// Insert `text` before line `at`
    pub fn insert_lines(&self, at: usize, text: &str) -> Result<()> {
        self.replace_lines(at, at, text)
    }

    /// Append `text` after the last line
    pub fn append(&self, text: &str) -> Result<()> {
        let end = self.line_count();
        self.replace_lines(end, end, text)
    }

    /// Replace the whole buffer, reduced to the minimal changed line range
    pub fn set_text(&self, text: &str) -> Result<()> {
        let new_lines = split_lines(text);
        let (start, old_end, middle) = {
            let state = self.state.read();
            let old = &state.lines;

            let prefix = old
                .iter()
                .zip(new_lines.iter())
                .take_while(|(a, b)| a == b)
                .count();
            let max_suffix = old.len().min(new_lines.len()) - prefix;
            let suffix = old
                .iter()
                .rev()
                .zip(new_lines.iter().rev())
                .take(max_suffix)
                .take_while(|(a, b)| a == b)
                .count();

            if prefix == old.len() && prefix == new_lines.len() {
                return Ok(());
            }

            let middle = new_lines[prefix..new_lines.len() - suffix].to_vec();
            (prefix, old.len() - suffix, middle)
        };
        self.replace_range(start, old_end, middle)
    }

    /// Current index of a fragment, resolved by identity
    pub fn index_of(&self, id: FragmentId) -> Option<usize> {
        position_of(&self.state.read().fragments, id)
    }

    fn replace_range(&self, start: usize, end: usize, new_lines: Vec<String>) -> Result<()> {
        let event = {
            let mut state = self.state.write();
            let line_count = state.lines.len();
            if start > end || end > line_count {
                return Err(ScratchError::InvalidLineRange {
                    start,
                    end,
                    line_count,
                });
            }

            if state.lines[start..end] == new_lines[..] {
                return Ok(());
            }

            let edit = Edit {
                start,
                old_end: end,
                new_len: new_lines.len(),
            };
            let new_text = new_lines.join("\n");
            let old_text = state
                .lines
                .splice(start..end, new_lines)
                .collect::<Vec<_>>()
                .join("\n");

            let fragments = segment(&state.lines, &state.fragments, Some(edit));
            trace!(
                document = %self.id,
                start,
                end,
                fragments = fragments.len(),
                "document edited"
            );
            state.fragments = Arc::new(fragments);

            DocumentEvent {
                document: self.id,
                line: start,
                old_text,
                new_text,
            }
        };

        // Write lock released: listeners may read the document
        self.listeners.notify(&event);
        Ok(())
    }
}

impl ExpressionSource for ScratchDocument {
    fn document_id(&self) -> DocumentId {
        self.id
    }

    fn expressions(&self) -> FragmentSnapshot {
        Arc::clone(&self.state.read().fragments)
    }

    fn subscribe(&self, listener: DocumentListener) -> Subscription {
        self.listeners.subscribe(listener)
    }
}

impl std::fmt::Debug for ScratchDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ScratchDocument")
            .field("id", &self.id)
            .field("lines", &state.lines.len())
            .field("fragments", &state.fragments.len())
            .finish()
    }
}

fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

/// Split lines into fragments, reusing ids of fragments the edit didn't touch
fn segment(lines: &[String], previous: &[Fragment], edit: Option<Edit>) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut start = None;

    for (idx, line) in lines.iter().enumerate() {
        let blank = line.trim().is_empty();
        match (start, blank) {
            (None, false) => start = Some(idx),
            (Some(s), true) => {
                fragments.push(make_fragment(lines, s, idx - 1, previous, edit));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        fragments.push(make_fragment(lines, s, lines.len() - 1, previous, edit));
    }

    fragments
}

fn make_fragment(
    lines: &[String],
    start: usize,
    end: usize,
    previous: &[Fragment],
    edit: Option<Edit>,
) -> Fragment {
    let range = LineRange::new(start, end);
    let text = lines[start..=end].join("\n");

    let old_range = edit.and_then(|edit| {
        if end < edit.start {
            Some(range)
        } else if start >= edit.start + edit.new_len {
            Some(range.shifted(-edit.delta()))
        } else {
            None
        }
    });

    let id = old_range
        .and_then(|old| {
            previous
                .iter()
                .find(|f| f.range() == old && f.text() == text)
                .map(Fragment::id)
        })
        .unwrap_or_else(FragmentId::next);

    Fragment::new(id, text, range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn texts(doc: &ScratchDocument) -> Vec<String> {
        doc.expressions().iter().map(|f| f.text().to_string()).collect()
    }

    fn ids(doc: &ScratchDocument) -> Vec<FragmentId> {
        doc.expressions().iter().map(Fragment::id).collect()
    }

    #[test]
    fn splits_on_blank_lines() {
        let doc = ScratchDocument::new("a = 1\nb = 2\n\n\nprint(a)\n   \nprint(b)\n");
        assert_eq!(texts(&doc), vec!["a = 1\nb = 2", "print(a)", "print(b)"]);

        let ranges: Vec<_> = doc.expressions().iter().map(Fragment::range).collect();
        assert_eq!(
            ranges,
            vec![
                LineRange::new(0, 1),
                LineRange::new(4, 4),
                LineRange::new(6, 6)
            ]
        );
    }

    #[test]
    fn empty_document_has_no_fragments() {
        let doc = ScratchDocument::new("");
        assert!(doc.expressions().is_empty());
        assert_eq!(doc.line_count(), 0);
        assert_eq!(doc.text(), "");
    }

    #[test]
    fn text_roundtrips() {
        let doc = ScratchDocument::new("x\n\ny\n");
        assert_eq!(doc.text(), "x\n\ny\n");
        assert_eq!(doc.line_count(), 3);
    }

    #[test]
    fn expression_at_line_resolves_owner() {
        let doc = ScratchDocument::new("a\nb\n\nc\n");
        assert_eq!(doc.expression_at_line(1).unwrap().text(), "a\nb");
        assert!(doc.expression_at_line(2).is_none());
        assert_eq!(doc.expression_at_line(3).unwrap().text(), "c");
        assert!(doc.expression_at_line(99).is_none());
    }

    #[test]
    fn untouched_fragments_keep_ids_across_edit() {
        let doc = ScratchDocument::new("A\n\nB\n\nC\n");
        let before = ids(&doc);

        doc.replace_lines(2, 3, "B2").unwrap();
        let after = ids(&doc);

        assert_eq!(texts(&doc), vec!["A", "B2", "C"]);
        assert_eq!(after[0], before[0]);
        assert_ne!(after[1], before[1]);
        assert_eq!(after[2], before[2]);
    }

    #[test]
    fn insertion_shifts_later_fragments_but_keeps_ids() {
        let doc = ScratchDocument::new("A\n\nB\n");
        let before = ids(&doc);

        doc.insert_lines(0, "Z\n\n").unwrap();

        assert_eq!(texts(&doc), vec!["Z", "A", "B"]);
        let after = ids(&doc);
        assert_eq!(&after[1..], &before[..]);
        assert_eq!(doc.index_of(before[0]), Some(1));
        assert_eq!(doc.expressions()[2].range(), LineRange::new(4, 4));
    }

    #[test]
    fn deletion_drops_fragment_identity() {
        let doc = ScratchDocument::new("A\n\nB\n\nC\n");
        let b = ids(&doc)[1];

        doc.replace_lines(2, 4, "").unwrap();

        assert_eq!(texts(&doc), vec!["A", "C"]);
        assert_eq!(doc.index_of(b), None);
    }

    #[test]
    fn append_adds_fragment() {
        let doc = ScratchDocument::new("A\n");
        doc.append("\nD\n").unwrap();
        assert_eq!(texts(&doc), vec!["A", "D"]);
    }

    #[test]
    fn out_of_range_edit_is_rejected() {
        let doc = ScratchDocument::new("A\n");
        let err = doc.replace_lines(0, 5, "x").unwrap_err();
        assert!(matches!(
            err,
            ScratchError::InvalidLineRange { line_count: 1, .. }
        ));
    }

    #[test]
    fn listeners_see_post_edit_state() {
        let doc = Arc::new(ScratchDocument::new("A\n\nB\n"));
        let seen: Arc<Mutex<Vec<(DocumentEvent, Option<String>)>>> = Arc::default();

        let doc_in_listener = Arc::clone(&doc);
        let seen_in_listener = Arc::clone(&seen);
        let _sub = doc.subscribe(Arc::new(move |event: &DocumentEvent| {
            let owner = doc_in_listener
                .expression_at_line(event.line)
                .map(|f| f.text().to_string());
            seen_in_listener.lock().push((event.clone(), owner));
        }));

        doc.replace_lines(2, 3, "B!").unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.line, 2);
        assert_eq!(seen[0].0.old_text, "B");
        assert_eq!(seen[0].0.new_text, "B!");
        assert_eq!(seen[0].0.document, doc.document_id());
        assert_eq!(seen[0].1.as_deref(), Some("B!"));
    }

    #[test]
    fn noop_edit_emits_nothing() {
        let doc = ScratchDocument::new("A\n");
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let _sub = doc.subscribe(Arc::new(move |_: &DocumentEvent| *counter.lock() += 1));

        doc.replace_lines(0, 1, "A").unwrap();
        doc.set_text("A\n").unwrap();

        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn set_text_reduces_to_minimal_edit() {
        let doc = ScratchDocument::new("A\n\nB\n\nC\n");
        let before = ids(&doc);
        let events: Arc<Mutex<Vec<DocumentEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        let _sub = doc.subscribe(Arc::new(move |e: &DocumentEvent| sink.lock().push(e.clone())));

        doc.set_text("A\n\nB changed\n\nC\n").unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].line, 2);
        assert_eq!(events[0].old_text, "B");
        assert_eq!(events[0].new_text, "B changed");

        let after = ids(&doc);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[2], before[2]);
    }

    #[test]
    fn set_text_handles_pure_insertion_of_blank_line() {
        let doc = ScratchDocument::new("A\nB\n");
        doc.set_text("A\n\nB\n").unwrap();
        assert_eq!(texts(&doc), vec!["A", "B"]);
        assert_eq!(doc.line_count(), 3);
    }
}
