//! Translation of watch events into model closes and element deltas

use crate::watcher::WatchEvent;
use arbor_core::{Context, DeltaFlags, ElementChangeEvent, ElementDelta, ElementDeltaBuilder, Handle, Model};
use arbor_indexer::languages::is_supported_path;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Applies filesystem changes to a model: stale structure is closed so it is
/// rebuilt on next access, and the changes are collected into one delta per
/// batch, rooted at the model root.
///
/// Working copies keep their structure, since it reflects their buffer. A
/// change to the file underneath one is reported as `UNDERLYING_RESOURCE`.
pub struct DeltaProcessor {
    model: Arc<Model>,
    root: Handle,
    pending: ElementDeltaBuilder,
}

impl DeltaProcessor {
    pub fn new(model: Arc<Model>, root: Handle) -> Self {
        let pending = ElementDeltaBuilder::new(root.clone());
        DeltaProcessor { model, root, pending }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn process(&mut self, event: &WatchEvent) {
        match event {
            WatchEvent::Created(path) => {
                if let Some(handle) = self.resolve_existing(path) {
                    self.added(handle);
                }
            }
            WatchEvent::Modified(path) => {
                if path.is_dir() {
                    return;
                }
                if let Some(handle) = self.resolve_existing(path) {
                    self.modified(handle);
                }
            }
            WatchEvent::Removed(path) => {
                if let Some(handle) = self.resolve_removed(path, path.extension().is_none()) {
                    self.removed(handle);
                }
            }
            WatchEvent::Renamed { from, to } => self.renamed(from, to),
        }
    }

    /// Publish the changes collected since the last flush, if any.
    pub fn flush(&mut self) -> Option<ElementDelta> {
        let pending = std::mem::replace(&mut self.pending, ElementDeltaBuilder::new(self.root.clone()));
        if pending.is_empty() {
            return None;
        }
        let delta = pending.into_delta();
        debug!("Firing delta:\n{}", delta);
        self.model.fire_change(ElementChangeEvent::post_change(delta.clone()));
        Some(delta)
    }

    fn is_working_copy(&self, handle: &Handle) -> bool {
        self.model.is_working_copy(handle, &Context::new())
    }

    fn added(&mut self, handle: Handle) {
        if self.is_working_copy(&handle) {
            self.pending.changed(handle, DeltaFlags::UNDERLYING_RESOURCE);
            return;
        }
        if let Some(parent) = handle.parent() {
            self.model.close(parent);
        }
        self.pending.added(handle, DeltaFlags::empty());
    }

    fn modified(&mut self, handle: Handle) {
        if self.is_working_copy(&handle) {
            self.pending.changed(handle, DeltaFlags::UNDERLYING_RESOURCE);
            return;
        }
        self.model.close(&handle);
        self.pending
            .changed(handle, DeltaFlags::CONTENT | DeltaFlags::UNDERLYING_RESOURCE);
    }

    fn removed(&mut self, handle: Handle) {
        if self.is_working_copy(&handle) {
            self.pending.changed(handle, DeltaFlags::UNDERLYING_RESOURCE);
            return;
        }
        self.model.close(&handle);
        if let Some(parent) = handle.parent() {
            self.model.close(parent);
        }
        self.pending.removed(handle, DeltaFlags::empty());
    }

    fn renamed(&mut self, from: &Path, to: &Path) {
        let target = self.resolve_existing(to);
        let source = self.resolve_removed(from, to.is_dir());
        match (source, target) {
            (Some(source), Some(target)) if !self.is_working_copy(&source) && !self.is_working_copy(&target) => {
                self.model.close(&source);
                for parent in [source.parent(), target.parent()].into_iter().flatten() {
                    self.model.close(parent);
                }
                self.pending.moved_to(source.clone(), target.clone());
                self.pending.moved_from(target, source);
            }
            (source, target) => {
                if let Some(source) = source {
                    self.removed(source);
                }
                if let Some(target) = target {
                    self.added(target);
                }
            }
        }
    }

    /// Handle for a path that is on disk. Unsupported files are not part of
    /// the model.
    fn resolve_existing(&self, path: &Path) -> Option<Handle> {
        let is_dir = path.is_dir();
        if !is_dir && !is_supported_path(path) {
            return None;
        }
        Handle::resolve_path(&self.root, path, is_dir).filter(|h| *h != self.root)
    }

    /// Handle for a path that is gone. Supported files resolve to source
    /// files; anything else only to a folder the model already knows.
    fn resolve_removed(&self, path: &Path, maybe_dir: bool) -> Option<Handle> {
        if is_supported_path(path) {
            return Handle::resolve_path(&self.root, path, false);
        }
        if !maybe_dir {
            return None;
        }
        let folder = Handle::resolve_path(&self.root, path, true).filter(|h| *h != self.root)?;
        self.is_known(&folder).then_some(folder)
    }

    fn is_known(&self, handle: &Handle) -> bool {
        self.model.peek_body(handle).is_some()
            || handle
                .parent()
                .and_then(|parent| self.model.peek_body(parent))
                .is_some_and(|body| body.children().contains(handle))
    }
}
