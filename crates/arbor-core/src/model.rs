//! The model: handle-based access to lazily built, cached element structure

use crate::body::{Body, NewElements, TextRange};
use crate::cache::CacheStats;
use crate::config::ModelConfig;
use crate::context::{Context, SourceText};
use crate::error::{ModelError, Result};
use crate::handle::{ElementCategory, Handle};
use crate::manager::ElementManager;
use crate::notification::{ElementChangeEvent, NotificationSink};
use crate::snapshot::{NonExpiringSnapshot, SnapshotRef};
use crate::workspace::{LocalFileSystem, ResourceOracle, SnapshotProvider, StructureBuilder};
use std::sync::Arc;
use tracing::debug;

/// Engine context. Owns the element manager and the collaborators used to
/// build, validate and publish element structure.
pub struct Model {
    pub(crate) config: ModelConfig,
    pub(crate) manager: ElementManager,
    builder: Arc<dyn StructureBuilder>,
    pub(crate) resources: Arc<dyn ResourceOracle>,
    snapshots: Arc<dyn SnapshotProvider>,
    notifications: Option<Arc<dyn NotificationSink>>,
}

impl Model {
    /// Model over the local filesystem, without change notifications.
    pub fn new(config: ModelConfig, builder: Arc<dyn StructureBuilder>) -> Self {
        let manager = ElementManager::new(&config.cache);
        Model {
            config,
            manager,
            builder,
            resources: Arc::new(LocalFileSystem),
            snapshots: Arc::new(LocalFileSystem),
            notifications: None,
        }
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceOracle>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_snapshot_provider(mut self, snapshots: Arc<dyn SnapshotProvider>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = Some(sink);
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn manager(&self) -> &ElementManager {
        &self.manager
    }

    pub fn has_notifications(&self) -> bool {
        self.notifications.is_some()
    }

    /// Publish an event through the notification sink, if any.
    pub fn fire_change(&self, event: ElementChangeEvent) {
        if let Some(sink) = &self.notifications {
            sink.fire_change(event);
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.manager.stats()
    }

    /// Body of `handle`, building it if it is not cached.
    pub fn body(&self, handle: &Handle, ctx: &Context) -> Result<Arc<Body>> {
        if let Some(body) = self.manager.find_body(handle) {
            return Ok(body);
        }
        self.open(handle, ctx)
    }

    pub fn children(&self, handle: &Handle, ctx: &Context) -> Result<Vec<Handle>> {
        Ok(self.body(handle, ctx)?.children().to_vec())
    }

    /// Cached body, if any. Never builds.
    pub fn peek_body(&self, handle: &Handle) -> Option<Arc<Body>> {
        self.manager.peek_body(handle)
    }

    /// Cached body, if any, marked as recently used. Never builds.
    pub fn find_body(&self, handle: &Handle) -> Option<Arc<Body>> {
        self.manager.find_body(handle)
    }

    pub fn exists(&self, handle: &Handle) -> bool {
        if self.manager.peek_body(handle).is_some() {
            return true;
        }
        if handle.category() != ElementCategory::Construct {
            return self.is_working_copy(handle, &Context::new()) || self.resources.exists(handle);
        }
        match self.body(handle, &Context::new()) {
            Ok(_) => true,
            Err(err) if err.is_does_not_exist() => false,
            Err(err) => {
                debug!("Treating {:?} as missing: {}", handle, err);
                false
            }
        }
    }

    /// Build and install the structure of `handle`.
    ///
    /// Missing ancestors are opened first, except for working copies, which
    /// are built from their buffer. Constructs are built by their source file,
    /// so opening one only makes sure its file is open.
    pub fn open(&self, handle: &Handle, ctx: &Context) -> Result<Arc<Body>> {
        ctx.check_cancelled()?;
        let working_copy = self.is_working_copy(handle, ctx);
        if !working_copy {
            if !self.resources.exists(handle) {
                return Err(ModelError::does_not_exist(handle));
            }
            if let Some(parent) = handle.parent() {
                if self.manager.peek_body(parent).is_none() {
                    self.open(parent, &ctx.for_ancestors())?;
                }
            }
        }

        if handle.category() == ElementCategory::Construct {
            return self
                .manager
                .find_body(handle)
                .ok_or_else(|| ModelError::does_not_exist(handle));
        }

        let mut elements = NewElements::new();
        self.build_structure(handle, working_copy, ctx, &mut elements)?;
        let Some(body) = elements.remove(handle) else {
            return Err(ModelError::build_failed(
                handle,
                anyhow::anyhow!("builder produced no body for the element itself"),
            ));
        };
        // Only constructs are built with their parent; any other element
        // builds its own body when it is opened.
        elements.retain(|descendant, _| {
            let keep = descendant.category() == ElementCategory::Construct && handle.is_ancestor_of(descendant);
            if !keep {
                debug!("Dropping body of {:?} built with {:?}", descendant, handle);
            }
            keep
        });
        Ok(self.manager.install(handle, body, elements, ctx.force_open()))
    }

    fn build_structure(
        &self,
        handle: &Handle,
        working_copy: bool,
        ctx: &Context,
        elements: &mut NewElements,
    ) -> Result<()> {
        if handle.category() != ElementCategory::SourceFile {
            return self
                .builder
                .build_structure(handle, None, elements, ctx)
                .map_err(|err| ModelError::build_failed(handle, err));
        }

        let source = match ctx.source() {
            Some(source) => source.clone(),
            None if working_copy => self.working_copy_source(handle)?,
            None => {
                let captured = NonExpiringSnapshot::new(self.snapshots.file_snapshot(handle)?)?;
                SourceText::new(captured.text(), Some(captured.wrapped().clone()))
            }
        };

        self.builder
            .build_structure(handle, Some(&source), elements, ctx)
            .map_err(|err| ModelError::build_failed(handle, err))?;
        if let Some(body) = elements.get_mut(handle) {
            body.set_full_range(TextRange::new(0, source.len()));
        }
        if let Some(snapshot) = source.snapshot() {
            elements.propagate_snapshot(handle, snapshot);
        }
        Ok(())
    }

    fn working_copy_source(&self, file: &Handle) -> Result<SourceText> {
        let info = self
            .manager
            .peek_working_copy_info(file)
            .ok_or_else(|| ModelError::not_working_copy(file))?;
        let (snapshot, contents) = info.buffer().snapshot_with_contents();
        Ok(SourceText::new(contents, Some(snapshot)))
    }

    /// Drop the cached structure of `handle` and its descendants. Working
    /// copies are not affected.
    pub fn close(&self, handle: &Handle) {
        self.manager.close(handle);
    }

    /// Innermost source element of `handle` whose range covers `offset`.
    ///
    /// With a `base` snapshot, fails with `StaleSnapshot` unless the structure
    /// was built from content equal to it.
    pub fn source_element_at(
        &self,
        handle: &Handle,
        offset: usize,
        base: Option<&SnapshotRef>,
        ctx: &Context,
    ) -> Result<Option<Handle>> {
        let body = self.body(handle, ctx)?;
        if let Some(base) = base {
            let current = body.snapshot().ok_or(ModelError::StaleSnapshot)?;
            if !base.is_equal_to(&**current) {
                return Err(ModelError::StaleSnapshot);
            }
        }
        match body.full_range() {
            Some(range) if range.covers(offset) => {}
            _ => return Ok(None),
        }
        for child in body.children() {
            if let Some(found) = self.source_element_at(child, offset, base, ctx)? {
                return Ok(Some(found));
            }
        }
        Ok(Some(handle.clone()))
    }
}
