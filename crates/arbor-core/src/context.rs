//! Per-call operation context: cancellation and build options

use crate::error::{ModelError, Result};
use crate::handle::Handle;
use crate::snapshot::SnapshotRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and the operations
/// it started.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ModelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Text a source file's structure is built from.
#[derive(Debug, Clone)]
pub struct SourceText {
    contents: Arc<str>,
    snapshot: Option<SnapshotRef>,
}

impl SourceText {
    pub fn new(contents: Arc<str>, snapshot: Option<SnapshotRef>) -> Self {
        SourceText { contents, snapshot }
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn snapshot(&self) -> Option<&SnapshotRef> {
        self.snapshot.as_ref()
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

/// Options travelling with one model operation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancellation: CancellationToken,
    force_open: bool,
    reconciling: Option<Handle>,
    source: Option<SourceText>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn check_cancelled(&self) -> Result<()> {
        self.cancellation.check()
    }

    /// Context for building a parent: same cancellation, no build options.
    pub(crate) fn for_ancestors(&self) -> Self {
        Context {
            cancellation: self.cancellation.clone(),
            ..Context::default()
        }
    }

    pub(crate) fn with_force_open(mut self) -> Self {
        self.force_open = true;
        self
    }

    pub fn force_open(&self) -> bool {
        self.force_open
    }

    /// Marks `file` as being turned into a working copy on this call chain.
    pub(crate) fn with_reconciling(mut self, file: &Handle) -> Self {
        self.reconciling = Some(file.clone());
        self
    }

    pub fn is_reconciling(&self, file: &Handle) -> bool {
        self.reconciling.as_ref() == Some(file)
    }

    pub(crate) fn with_source(mut self, source: SourceText) -> Self {
        self.source = Some(source);
        self
    }

    pub fn source(&self) -> Option<&SourceText> {
        self.source.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let ctx = Context::new().with_cancellation(token.clone());
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(ModelError::Cancelled)));
        assert!(ctx.for_ancestors().cancellation().is_cancelled());
    }

    #[test]
    fn test_ancestor_context_drops_build_options() {
        let file = Handle::root("/ws").project("p").source_file("a.rs");
        let ctx = Context::new().with_force_open().with_reconciling(&file);
        assert!(ctx.force_open());
        assert!(ctx.is_reconciling(&file));

        let parent_ctx = ctx.for_ancestors();
        assert!(!parent_ctx.force_open());
        assert!(!parent_ctx.is_reconciling(&file));
    }
}
