//! Collaborators the model builds on, and their local-filesystem versions

use crate::body::NewElements;
use crate::context::{Context, SourceText};
use crate::error::{ModelError, Result};
use crate::handle::{ElementKind, Handle};
use crate::snapshot::{FileSnapshot, SnapshotRef};
use std::sync::Arc;

/// Produces bodies for a handle and its descendants.
///
/// Source files get their text in `source`; other elements get `None`. The
/// builder must insert a body for `handle` itself into `elements`.
pub trait StructureBuilder: Send + Sync {
    fn build_structure(
        &self,
        handle: &Handle,
        source: Option<&SourceText>,
        elements: &mut NewElements,
        ctx: &Context,
    ) -> anyhow::Result<()>;
}

/// Answers whether the resource behind a handle exists.
pub trait ResourceOracle: Send + Sync {
    fn exists(&self, handle: &Handle) -> bool;
}

/// Snapshots of stored file content.
pub trait SnapshotProvider: Send + Sync {
    fn file_snapshot(&self, file: &Handle) -> Result<SnapshotRef>;
}

/// Oracle and snapshot provider over the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl ResourceOracle for LocalFileSystem {
    fn exists(&self, handle: &Handle) -> bool {
        match handle.kind() {
            ElementKind::Root { path } | ElementKind::Project { path } | ElementKind::Folder { path } => {
                path.is_dir()
            }
            ElementKind::SourceFile { path } => path.is_file(),
            // Constructs exist if their file's structure contains them.
            ElementKind::Construct(_) => true,
        }
    }
}

impl SnapshotProvider for LocalFileSystem {
    fn file_snapshot(&self, file: &Handle) -> Result<SnapshotRef> {
        let path = match file.kind() {
            ElementKind::SourceFile { path } => path,
            _ => return Err(ModelError::does_not_exist(file)),
        };
        let snapshot = FileSnapshot::new(path);
        if !snapshot.exists() {
            return Err(ModelError::does_not_exist(file));
        }
        Ok(Arc::new(snapshot))
    }
}
