//! Immutable, versioned views of textual content

use crate::error::{ModelError, Result};
use std::any::Any;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

pub type SnapshotRef = Arc<dyn Snapshot>;

/// A view of some content at a point in time.
///
/// Snapshots may expire: once the underlying content has moved on, `contents`
/// returns `None`. Equality is decided by [`is_equal_to`](trait.Snapshot.html#method.is_equal_to),
/// which first asks either side for a cheap prediction.
pub trait Snapshot: Send + Sync + fmt::Debug {
    /// Current contents, or `None` if this snapshot has expired.
    fn contents(&self) -> Option<Arc<str>>;

    /// `Some(answer)` when equality with `other` can be decided without
    /// comparing contents.
    fn predict_equality(&self, _other: &dyn Snapshot) -> Option<bool> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

impl<'a> dyn Snapshot + 'a {
    pub fn is_equal_to(&self, other: &dyn Snapshot) -> bool {
        if std::ptr::addr_eq(self, other) {
            return true;
        }
        if let Some(answer) = self.predict_equality(other) {
            return answer;
        }
        if let Some(answer) = other.predict_equality(self) {
            return answer;
        }
        match (self.contents(), other.contents()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Equality over optional snapshots: two absent snapshots are equal.
pub fn snapshots_equal(a: Option<&SnapshotRef>, b: Option<&SnapshotRef>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.is_equal_to(&**b),
        _ => false,
    }
}

/// Snapshot over fixed text. Never expires.
#[derive(Debug, Clone)]
pub struct StringSnapshot {
    contents: Arc<str>,
}

impl StringSnapshot {
    pub fn new(contents: impl Into<Arc<str>>) -> Self {
        StringSnapshot {
            contents: contents.into(),
        }
    }
}

impl Snapshot for StringSnapshot {
    fn contents(&self) -> Option<Arc<str>> {
        Some(self.contents.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Captures the contents of another snapshot eagerly so they stay available
/// after the wrapped snapshot expires.
#[derive(Debug)]
pub struct NonExpiringSnapshot {
    wrapped: SnapshotRef,
    contents: Arc<str>,
}

impl NonExpiringSnapshot {
    /// Fails with `StaleSnapshot` if the wrapped snapshot has already expired.
    pub fn new(wrapped: SnapshotRef) -> Result<Self> {
        let contents = wrapped.contents().ok_or(ModelError::StaleSnapshot)?;
        Ok(NonExpiringSnapshot { wrapped, contents })
    }

    pub fn wrapped(&self) -> &SnapshotRef {
        &self.wrapped
    }

    pub fn text(&self) -> Arc<str> {
        self.contents.clone()
    }
}

impl Snapshot for NonExpiringSnapshot {
    fn contents(&self) -> Option<Arc<str>> {
        Some(self.contents.clone())
    }

    fn predict_equality(&self, other: &dyn Snapshot) -> Option<bool> {
        match other.as_any().downcast_ref::<NonExpiringSnapshot>() {
            Some(other) if self.wrapped.is_equal_to(&*other.wrapped) => Some(true),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

fn file_stamp(path: &Path) -> Option<FileStamp> {
    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    Some(FileStamp {
        modified: metadata.modified().ok()?,
        len: metadata.len(),
    })
}

/// Snapshot of a file's stored content, keyed by modification time and length.
pub struct FileSnapshot {
    path: PathBuf,
    stamp: Option<FileStamp>,
    contents: OnceLock<Option<Arc<str>>>,
}

impl FileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stamp = file_stamp(&path);
        FileSnapshot {
            path,
            stamp,
            contents: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file existed when the snapshot was taken.
    pub fn exists(&self) -> bool {
        self.stamp.is_some()
    }

    fn is_stale(&self) -> bool {
        file_stamp(&self.path) != self.stamp
    }
}

impl fmt::Debug for FileSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSnapshot")
            .field("path", &self.path)
            .field("stamp", &self.stamp)
            .finish()
    }
}

impl Snapshot for FileSnapshot {
    fn contents(&self) -> Option<Arc<str>> {
        if self.stamp.is_none() || self.is_stale() {
            return None;
        }
        let contents = self
            .contents
            .get_or_init(|| fs::read_to_string(&self.path).ok().map(Arc::from))
            .clone();
        if self.is_stale() {
            return None;
        }
        contents
    }

    fn predict_equality(&self, other: &dyn Snapshot) -> Option<bool> {
        if self.stamp.is_some() && self.is_stale() {
            return Some(false);
        }
        let other = other.as_any().downcast_ref::<FileSnapshot>()?;
        if other.path == self.path {
            Some(self.stamp == other.stamp)
        } else {
            None
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
