//! Text buffers and edits with stale-snapshot detection

use crate::body::TextRange;
use crate::error::{ModelError, Result};
use crate::snapshot::{Snapshot, SnapshotRef};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

struct BufferState {
    text: Arc<str>,
    /// Identifies the current content. Restored by undo, so equal stamps mean
    /// equal content.
    stamp: u64,
    /// Source of fresh stamps; never goes backwards.
    next_stamp: u64,
    saved_stamp: u64,
}

impl BufferState {
    fn fresh_stamp(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }
}

struct BufferInner {
    id: u64,
    path: Option<PathBuf>,
    state: RwLock<BufferState>,
}

/// Shared, editable text. Clones refer to the same buffer.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// In-memory buffer. It starts out saved.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_path(text.into(), None)
    }

    /// Buffer over the current contents of a file; `save` writes back to it.
    pub fn for_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = fs::read_to_string(&path)?;
        Ok(Self::with_path(text, Some(path)))
    }

    fn with_path(text: String, path: Option<PathBuf>) -> Self {
        Buffer {
            inner: Arc::new(BufferInner {
                id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
                path,
                state: RwLock::new(BufferState {
                    text: Arc::from(text),
                    stamp: 0,
                    next_stamp: 1,
                    saved_stamp: 0,
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn text(&self) -> Arc<str> {
        self.inner.state.read().text.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn modification_stamp(&self) -> u64 {
        self.inner.state.read().stamp
    }

    /// Whether the content differs from what was last saved.
    pub fn is_dirty(&self) -> bool {
        let state = self.inner.state.read();
        state.stamp != state.saved_stamp
    }

    pub fn snapshot(&self) -> SnapshotRef {
        Arc::new(self.text_snapshot())
    }

    /// Snapshot together with the contents it stands for, read atomically.
    pub fn snapshot_with_contents(&self) -> (SnapshotRef, Arc<str>) {
        let state = self.inner.state.read();
        let snapshot = TextSnapshot {
            buffer: self.inner.clone(),
            stamp: state.stamp,
        };
        (Arc::new(snapshot), state.text.clone())
    }

    fn text_snapshot(&self) -> TextSnapshot {
        TextSnapshot {
            buffer: self.inner.clone(),
            stamp: self.inner.state.read().stamp,
        }
    }

    /// Replace the whole content, e.g. after an external reload.
    pub fn set_text(&self, text: impl Into<String>) {
        let mut state = self.inner.state.write();
        state.text = Arc::from(text.into());
        state.stamp = state.fresh_stamp();
    }

    pub fn save(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        self.save_locked(&mut state)
    }

    fn save_locked(&self, state: &mut BufferState) -> Result<()> {
        self.write_through(&state.text)?;
        state.saved_stamp = state.stamp;
        Ok(())
    }

    fn write_through(&self, text: &str) -> Result<()> {
        if let Some(path) = &self.inner.path {
            fs::write(path, text.as_bytes())?;
            debug!("Saved buffer {} to {}", self.inner.id, path.display());
        }
        Ok(())
    }

    pub fn apply_change(&self, change: &BufferChange) -> Result<BufferChange> {
        BufferChangeOperation::new(self, change).execute()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Buffer")
            .field("id", &self.inner.id)
            .field("path", &self.inner.path)
            .field("stamp", &state.stamp)
            .field("len", &state.text.len())
            .finish()
    }
}

/// Snapshot of a buffer at a modification stamp. Expires as soon as the
/// buffer's stamp moves on.
pub struct TextSnapshot {
    buffer: Arc<BufferInner>,
    stamp: u64,
}

impl TextSnapshot {
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    fn is_stale(&self) -> bool {
        self.buffer.state.read().stamp != self.stamp
    }
}

impl fmt::Debug for TextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextSnapshot")
            .field("buffer", &self.buffer.id)
            .field("stamp", &self.stamp)
            .finish()
    }
}

impl Snapshot for TextSnapshot {
    fn contents(&self) -> Option<Arc<str>> {
        let state = self.buffer.state.read();
        (state.stamp == self.stamp).then(|| state.text.clone())
    }

    fn predict_equality(&self, other: &dyn Snapshot) -> Option<bool> {
        let other = other.as_any().downcast_ref::<TextSnapshot>()?;
        if !Arc::ptr_eq(&self.buffer, &other.buffer) {
            return None;
        }
        if self.is_stale() || other.is_stale() {
            return Some(false);
        }
        Some(self.stamp == other.stamp)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Replacement of a text range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: TextRange,
    pub text: String,
}

impl TextEdit {
    pub fn replace(range: TextRange, text: impl Into<String>) -> Self {
        TextEdit {
            range,
            text: text.into(),
        }
    }

    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::replace(TextRange::new(offset, 0), text)
    }

    pub fn delete(range: TextRange) -> Self {
        Self::replace(range, String::new())
    }
}

/// What to do with the saved state of a buffer after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Save if the buffer had no unsaved changes before.
    #[default]
    KeepSavedState,
    ForceSave,
    LeaveUnsaved,
}

/// A set of non-overlapping edits, optionally bound to the snapshot they were
/// computed against.
#[derive(Debug, Clone)]
pub struct BufferChange {
    edits: Vec<TextEdit>,
    base: Option<SnapshotRef>,
    save_mode: SaveMode,
    restore_stamp: Option<u64>,
}

impl BufferChange {
    pub fn new(edit: TextEdit) -> Self {
        Self::from_edits(vec![edit])
    }

    pub fn from_edits(edits: Vec<TextEdit>) -> Self {
        BufferChange {
            edits,
            base: None,
            save_mode: SaveMode::default(),
            restore_stamp: None,
        }
    }

    /// Refuse to apply unless the buffer still matches `base`.
    pub fn with_base(mut self, base: SnapshotRef) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_save_mode(mut self, save_mode: SaveMode) -> Self {
        self.save_mode = save_mode;
        self
    }

    pub fn edits(&self) -> &[TextEdit] {
        &self.edits
    }

    pub fn base(&self) -> Option<&SnapshotRef> {
        self.base.as_ref()
    }

    pub fn save_mode(&self) -> SaveMode {
        self.save_mode
    }

    /// Stamp the buffer returns to when this change is applied; set on undo changes.
    pub fn restore_stamp(&self) -> Option<u64> {
        self.restore_stamp
    }
}

/// Applies a [`BufferChange`] and produces its inverse.
pub struct BufferChangeOperation<'a> {
    buffer: &'a Buffer,
    change: &'a BufferChange,
}

impl<'a> BufferChangeOperation<'a> {
    pub fn new(buffer: &'a Buffer, change: &'a BufferChange) -> Self {
        BufferChangeOperation { buffer, change }
    }

    /// Apply the change. Fails with `StaleSnapshot` when the change's base no
    /// longer matches the buffer, and with `BadLocation` for invalid ranges.
    /// Returns the undo change, based on the post-edit snapshot.
    ///
    /// When the save mode asks for a save, the new text is written before the
    /// buffer changes; if the write fails the buffer is left as it was.
    pub fn execute(&self) -> Result<BufferChange> {
        let expected_stamp = match self.change.base() {
            Some(base) => {
                let current = self.buffer.text_snapshot();
                if !base.is_equal_to(&current) {
                    return Err(ModelError::StaleSnapshot);
                }
                Some(current.stamp)
            }
            None => None,
        };

        let mut state = self.buffer.inner.state.write();
        if let Some(expected) = expected_stamp {
            // The buffer may have moved on between the check and the lock.
            if state.stamp != expected {
                return Err(ModelError::StaleSnapshot);
            }
        }

        let edits = normalize_edits(&self.change.edits, &state.text)?;
        let was_saved = state.stamp == state.saved_stamp;
        let previous_stamp = state.stamp;
        let (text, undo_edits) = apply_edits(&state.text, &edits);
        let save = match self.change.save_mode {
            SaveMode::ForceSave => true,
            SaveMode::KeepSavedState => was_saved,
            SaveMode::LeaveUnsaved => false,
        };
        if save {
            self.buffer.write_through(&text)?;
        }

        state.text = Arc::from(text);
        state.stamp = match self.change.restore_stamp {
            Some(stamp) => stamp,
            None => state.fresh_stamp(),
        };
        if save {
            state.saved_stamp = state.stamp;
        }

        let base: SnapshotRef = Arc::new(TextSnapshot {
            buffer: self.buffer.inner.clone(),
            stamp: state.stamp,
        });
        Ok(BufferChange {
            edits: undo_edits,
            base: Some(base),
            save_mode: self.change.save_mode,
            restore_stamp: Some(previous_stamp),
        })
    }
}

fn normalize_edits(edits: &[TextEdit], text: &str) -> Result<Vec<TextEdit>> {
    let mut sorted = edits.to_vec();
    sorted.sort_by_key(|edit| edit.range.offset());

    let mut previous_end = 0;
    for edit in &sorted {
        let range = edit.range;
        let bad = range.end_offset() > text.len()
            || range.offset() < previous_end
            || !text.is_char_boundary(range.offset())
            || !text.is_char_boundary(range.end_offset());
        if bad {
            return Err(ModelError::BadLocation {
                offset: range.offset(),
                length: range.length(),
                len: text.len(),
            });
        }
        previous_end = range.end_offset();
    }
    Ok(sorted)
}

/// Edits must be sorted and non-overlapping.
fn apply_edits(text: &str, edits: &[TextEdit]) -> (String, Vec<TextEdit>) {
    let mut out = String::with_capacity(text.len());
    let mut undo = Vec::with_capacity(edits.len());
    let mut cursor = 0;
    for edit in edits {
        out.push_str(&text[cursor..edit.range.offset()]);
        let new_offset = out.len();
        out.push_str(&edit.text);
        undo.push(TextEdit::replace(
            TextRange::new(new_offset, edit.text.len()),
            &text[edit.range.offset()..edit.range.end_offset()],
        ));
        cursor = edit.range.end_offset();
    }
    out.push_str(&text[cursor..]);
    (out, undo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_multiple_edits() {
        let buffer = Buffer::new("fn f() {}\nfn g() {}\n");
        let change = BufferChange::from_edits(vec![
            TextEdit::replace(TextRange::new(13, 1), "h"),
            TextEdit::replace(TextRange::new(3, 1), "main"),
        ]);
        buffer.apply_change(&change).unwrap();
        assert_eq!(&*buffer.text(), "fn main() {}\nfn h() {}\n");
    }

    #[test]
    fn test_stale_base_is_rejected() {
        let buffer = Buffer::new("def f(): pass\n");
        let s0 = buffer.snapshot();
        buffer.set_text("def g(): pass\n");

        let change = BufferChange::new(TextEdit::insert(0, "# header\n")).with_base(s0);
        assert!(matches!(
            buffer.apply_change(&change),
            Err(ModelError::StaleSnapshot)
        ));
        assert_eq!(&*buffer.text(), "def g(): pass\n");

        // Without a base, or based on the current snapshot, the edit applies.
        buffer
            .apply_change(&BufferChange::new(TextEdit::insert(0, "# a\n")))
            .unwrap();
        let current = buffer.snapshot();
        buffer
            .apply_change(&BufferChange::new(TextEdit::insert(0, "# b\n")).with_base(current))
            .unwrap();
        assert_eq!(&*buffer.text(), "# b\n# a\ndef g(): pass\n");
    }

    #[test]
    fn test_undo_restores_text_and_stamp() {
        let buffer = Buffer::new("var x\n");
        let before = buffer.snapshot();
        let stamp_before = buffer.modification_stamp();

        let undo = buffer
            .apply_change(
                &BufferChange::new(TextEdit::replace(TextRange::new(4, 1), "renamed"))
                    .with_save_mode(SaveMode::LeaveUnsaved),
            )
            .unwrap();
        assert_eq!(&*buffer.text(), "var renamed\n");
        assert!(buffer.is_dirty());
        assert!(!before.is_equal_to(&*buffer.snapshot()));

        let redo = buffer.apply_change(&undo).unwrap();
        assert_eq!(&*buffer.text(), "var x\n");
        assert_eq!(buffer.modification_stamp(), stamp_before);
        assert!(!buffer.is_dirty());
        assert!(before.is_equal_to(&*buffer.snapshot()));

        buffer.apply_change(&redo).unwrap();
        assert_eq!(&*buffer.text(), "var renamed\n");
    }

    #[test]
    fn test_stamps_stay_fresh_after_undo() {
        let buffer = Buffer::new("a");
        let undo = buffer
            .apply_change(&BufferChange::new(TextEdit::insert(1, "b")))
            .unwrap();
        let first = buffer.modification_stamp();
        buffer.apply_change(&undo).unwrap();
        buffer
            .apply_change(&BufferChange::new(TextEdit::insert(1, "c")))
            .unwrap();
        assert_ne!(buffer.modification_stamp(), first);
    }

    #[test]
    fn test_undo_is_stale_after_other_edit() {
        let buffer = Buffer::new("abc");
        let undo = buffer
            .apply_change(&BufferChange::new(TextEdit::delete(TextRange::new(0, 1))))
            .unwrap();
        buffer.set_text("xyz");
        assert!(matches!(
            buffer.apply_change(&undo),
            Err(ModelError::StaleSnapshot)
        ));
    }

    #[test]
    fn test_bad_locations() {
        let buffer = Buffer::new("héllo");
        let out_of_bounds = BufferChange::new(TextEdit::delete(TextRange::new(4, 10)));
        assert!(matches!(
            buffer.apply_change(&out_of_bounds),
            Err(ModelError::BadLocation { offset: 4, length: 10, len: 6 })
        ));

        let overlapping = BufferChange::from_edits(vec![
            TextEdit::delete(TextRange::new(0, 3)),
            TextEdit::delete(TextRange::new(2, 2)),
        ]);
        assert!(matches!(
            buffer.apply_change(&overlapping),
            Err(ModelError::BadLocation { .. })
        ));

        // Offset 2 falls inside the two-byte 'é'.
        let split_char = BufferChange::new(TextEdit::insert(2, "x"));
        assert!(matches!(
            buffer.apply_change(&split_char),
            Err(ModelError::BadLocation { .. })
        ));
        assert_eq!(&*buffer.text(), "héllo");
    }

    #[test]
    fn test_save_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.rs");
        fs::write(&path, "fn a() {}\n").unwrap();
        let buffer = Buffer::for_file(&path).unwrap();

        buffer
            .apply_change(
                &BufferChange::new(TextEdit::insert(0, "// x\n"))
                    .with_save_mode(SaveMode::LeaveUnsaved),
            )
            .unwrap();
        assert!(buffer.is_dirty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "fn a() {}\n");

        // Buffer is dirty, so keeping the saved state does not write.
        buffer
            .apply_change(&BufferChange::new(TextEdit::insert(0, "// y\n")))
            .unwrap();
        assert!(buffer.is_dirty());

        buffer
            .apply_change(
                &BufferChange::new(TextEdit::insert(0, "// z\n")).with_save_mode(SaveMode::ForceSave),
            )
            .unwrap();
        assert!(!buffer.is_dirty());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "// z\n// y\n// x\nfn a() {}\n"
        );
    }

    #[test]
    fn test_failed_save_leaves_buffer_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone/lib.rs");
        let buffer = Buffer::with_path("fn a() {}\n".to_string(), Some(path));
        let stamp = buffer.modification_stamp();

        let err = buffer
            .apply_change(&BufferChange::new(TextEdit::insert(0, "// x\n")).with_save_mode(SaveMode::ForceSave))
            .unwrap_err();
        assert!(matches!(err, ModelError::Io(_)));
        assert_eq!(&*buffer.text(), "fn a() {}\n");
        assert_eq!(buffer.modification_stamp(), stamp);
        assert!(!buffer.is_dirty());

        // Without a save the same change goes through.
        let undo = buffer
            .apply_change(&BufferChange::new(TextEdit::insert(0, "// x\n")).with_save_mode(SaveMode::LeaveUnsaved))
            .unwrap();
        assert_eq!(&*buffer.text(), "// x\nfn a() {}\n");
        buffer.apply_change(&undo).unwrap();
        assert_eq!(&*buffer.text(), "fn a() {}\n");
    }

    #[test]
    fn test_text_snapshot_expires() {
        let buffer = Buffer::new("x");
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.contents().as_deref(), Some("x"));
        buffer.set_text("y");
        assert_eq!(snapshot.contents(), None);

        let other = Buffer::new("y");
        assert!(buffer.snapshot().is_equal_to(&*other.snapshot()));
    }
}
