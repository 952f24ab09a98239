//! Working copies: shared, reference-counted edit sessions on source files
//!
//! A source file becomes a working copy when some owner binds it to a
//! [`Buffer`]. From then on its structure is built from the buffer instead of
//! the file on disk and is rebuilt by reconciling. Further owners join the
//! same working copy; the last one to leave disposes it.

use crate::buffer::Buffer;
use crate::context::{Context, SourceText};
use crate::delta::{DeltaFlags, ElementDeltaBuilder};
use crate::diff::ElementDifferencer;
use crate::error::{ModelError, Result};
use crate::handle::{Handle, WorkingCopyCapable};
use crate::manager::ElementManager;
use crate::model::Model;
use crate::notification::ElementChangeEvent;
use crate::snapshot::SnapshotRef;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Waits on another thread's initialization before releasing and retrying.
const INIT_WAIT_ROUNDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Pending,
    Succeeded,
    Failed,
}

/// One-shot initialization result that other threads can wait for.
struct InitTask {
    state: Mutex<InitState>,
    done: Condvar,
}

impl InitTask {
    fn new() -> Self {
        InitTask {
            state: Mutex::new(InitState::Pending),
            done: Condvar::new(),
        }
    }

    fn state(&self) -> InitState {
        *self.state.lock()
    }

    fn complete(&self, succeeded: bool) {
        let mut state = self.state.lock();
        if *state == InitState::Pending {
            *state = if succeeded {
                InitState::Succeeded
            } else {
                InitState::Failed
            };
            self.done.notify_all();
        }
    }

    fn wait(&self, timeout: Duration) -> InitState {
        let mut state = self.state.lock();
        if *state == InitState::Pending {
            self.done.wait_for(&mut state, timeout);
        }
        *state
    }
}

/// Marks the init task failed unless finished explicitly, so a panicking
/// initializer does not leave waiters pending.
struct InitCompletion<'a> {
    task: &'a InitTask,
    finished: bool,
}

impl InitCompletion<'_> {
    fn finish(mut self, succeeded: bool) {
        self.task.complete(succeeded);
        self.finished = true;
    }
}

impl Drop for InitCompletion<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.task.complete(false);
        }
    }
}

/// Record binding a source file to its buffer while it is a working copy.
pub struct WorkingCopyInfo {
    buffer: Buffer,
    strategy: Arc<dyn ReconcileStrategy>,
    callback: Arc<dyn WorkingCopyCallback>,
    init: InitTask,
    created: AtomicBool,
    disposed: AtomicBool,
}

impl WorkingCopyInfo {
    pub fn new(
        buffer: Buffer,
        strategy: Arc<dyn ReconcileStrategy>,
        callback: Arc<dyn WorkingCopyCallback>,
    ) -> Self {
        WorkingCopyInfo {
            buffer,
            strategy,
            callback,
            init: InitTask::new(),
            created: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn strategy(&self) -> &Arc<dyn ReconcileStrategy> {
        &self.strategy
    }

    pub fn callback(&self) -> &Arc<dyn WorkingCopyCallback> {
        &self.callback
    }

    pub fn init_state(&self) -> InitState {
        self.init.state()
    }

    pub fn is_initialized(&self) -> bool {
        self.init_state() == InitState::Succeeded
    }

    /// Whether the working copy's structure has been built from the buffer.
    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::SeqCst)
    }

    fn mark_created(&self) {
        self.created.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for WorkingCopyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingCopyInfo")
            .field("buffer", &self.buffer)
            .field("init", &self.init_state())
            .field("created", &self.is_created())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A working copy as seen by callbacks and strategies.
pub struct WorkingCopy<'a> {
    model: &'a Model,
    handle: &'a Handle,
    info: &'a WorkingCopyInfo,
}

impl<'a> WorkingCopy<'a> {
    pub fn model(&self) -> &'a Model {
        self.model
    }

    pub fn handle(&self) -> &'a Handle {
        self.handle
    }

    pub fn buffer(&self) -> &'a Buffer {
        &self.info.buffer
    }

    pub fn info(&self) -> &'a WorkingCopyInfo {
        self.info
    }

    /// Hand `request` to the working copy's reconcile strategy.
    pub fn reconcile_structure(&self, request: ReconcileRequest, ctx: &Context) -> Result<()> {
        self.info
            .strategy
            .reconcile(self.model, self.handle, request, ctx)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Reconcile even if the buffer has not changed since the last time.
    pub force: bool,
    /// When forced without a change, still rebuild the structure.
    pub rebuild_if_forced: bool,
}

/// Input of a reconcile strategy.
#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub source: SourceText,
    /// Reconciling was forced although the buffer did not change.
    pub forced: bool,
    pub rebuild_if_forced: bool,
}

/// Rebuilds a working copy's structure from source text.
pub trait ReconcileStrategy: Send + Sync {
    fn reconcile(&self, model: &Model, file: &Handle, request: ReconcileRequest, ctx: &Context) -> Result<()>;
}

/// Rebuilds the working copy's body tree, and when the model has a
/// notification sink, publishes the difference as a `PostReconcile` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureReconciler;

impl ReconcileStrategy for StructureReconciler {
    fn reconcile(&self, model: &Model, file: &Handle, request: ReconcileRequest, ctx: &Context) -> Result<()> {
        model.reconcile_structure(file, request, ctx)
    }
}

/// Hooks into a working copy's lifecycle.
pub trait WorkingCopyCallback: Send + Sync {
    /// Runs once, on the thread that created the working copy.
    fn on_init(&self, wc: &WorkingCopy<'_>, ctx: &Context) -> Result<()> {
        self.reconcile(wc, ReconcileOptions::default(), ctx)
    }

    fn needs_reconciling(&self, wc: &WorkingCopy<'_>) -> bool;

    fn reconcile(&self, wc: &WorkingCopy<'_>, options: ReconcileOptions, ctx: &Context) -> Result<()>;

    /// Runs when the last owner released the working copy.
    fn on_dispose(&self, _wc: &WorkingCopy<'_>) {}
}

/// Reconciles whenever the buffer moved on from the last reconciled snapshot.
#[derive(Default)]
pub struct DefaultWorkingCopyCallback {
    reconciling: Mutex<()>,
    last_reconciled: Mutex<Option<SnapshotRef>>,
}

impl DefaultWorkingCopyCallback {
    pub fn new() -> Self {
        Self::default()
    }

    fn differs_from_last(&self, snapshot: &SnapshotRef) -> bool {
        match &*self.last_reconciled.lock() {
            Some(last) => !snapshot.is_equal_to(&**last),
            None => true,
        }
    }
}

impl WorkingCopyCallback for DefaultWorkingCopyCallback {
    fn needs_reconciling(&self, wc: &WorkingCopy<'_>) -> bool {
        self.differs_from_last(&wc.buffer().snapshot())
    }

    fn reconcile(&self, wc: &WorkingCopy<'_>, options: ReconcileOptions, ctx: &Context) -> Result<()> {
        let _serial = self.reconciling.lock();
        let (snapshot, contents) = wc.buffer().snapshot_with_contents();
        let needed = self.differs_from_last(&snapshot);
        if !needed && !options.force {
            return Ok(());
        }
        let request = ReconcileRequest {
            source: SourceText::new(contents, Some(snapshot.clone())),
            forced: !needed,
            rebuild_if_forced: options.rebuild_if_forced,
        };
        wc.reconcile_structure(request, ctx)?;
        *self.last_reconciled.lock() = Some(snapshot);
        Ok(())
    }

    fn on_dispose(&self, _wc: &WorkingCopy<'_>) {
        self.last_reconciled.lock().take();
    }
}

/// Scoped ownership of a working copy. Dropping the guard releases it.
#[must_use = "dropping the guard releases the working copy"]
pub struct WorkingCopyGuard<'m> {
    model: &'m Model,
    handle: Handle,
    info: Arc<WorkingCopyInfo>,
    released: bool,
}

impl<'m> WorkingCopyGuard<'m> {
    fn new(model: &'m Model, handle: Handle, info: Arc<WorkingCopyInfo>) -> Self {
        WorkingCopyGuard {
            model,
            handle,
            info,
            released: false,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn info(&self) -> &Arc<WorkingCopyInfo> {
        &self.info
    }

    pub fn buffer(&self) -> &Buffer {
        self.info.buffer()
    }

    pub fn working_copy(&self) -> WorkingCopy<'_> {
        WorkingCopy {
            model: self.model,
            handle: &self.handle,
            info: &self.info,
        }
    }

    pub fn needs_reconciling(&self) -> bool {
        self.info.callback.needs_reconciling(&self.working_copy())
    }

    pub fn reconcile(&self, options: ReconcileOptions, ctx: &Context) -> Result<()> {
        self.info
            .callback
            .reconcile(&self.working_copy(), options, ctx)
    }

    /// Release now. Returns whether this disposed the working copy.
    pub fn discard(mut self) -> Result<bool> {
        self.released = true;
        self.model.discard_working_copy(&self.handle)
    }
}

impl Drop for WorkingCopyGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.model.discard_working_copy(&self.handle) {
                warn!("Failed to release working copy {:?}: {}", self.handle, err);
            }
        }
    }
}

impl Model {
    /// Put `file` into working-copy mode on `buffer`, or join the existing
    /// working copy. Uses the default callback and reconcile strategy.
    pub fn become_working_copy(&self, file: &Handle, buffer: &Buffer, ctx: &Context) -> Result<WorkingCopyGuard<'_>> {
        self.become_working_copy_with(
            file,
            buffer,
            Arc::new(StructureReconciler),
            Arc::new(DefaultWorkingCopyCallback::new()),
            ctx,
        )
    }

    /// Like [`become_working_copy`](Model::become_working_copy) with a custom
    /// strategy and callback. Both are ignored when joining an existing
    /// working copy.
    pub fn become_working_copy_with(
        &self,
        file: &Handle,
        buffer: &Buffer,
        strategy: Arc<dyn ReconcileStrategy>,
        callback: Arc<dyn WorkingCopyCallback>,
        ctx: &Context,
    ) -> Result<WorkingCopyGuard<'_>> {
        if !file.supports_working_copy() {
            return Err(ModelError::not_working_copy(file));
        }
        let info = Arc::new(WorkingCopyInfo::new(buffer.clone(), strategy, callback));
        let joined = self.acquire_working_copy(file, ctx, |manager| {
            manager.put_working_copy_info_if_absent(file, info.clone())
        })?;
        if let Some(existing) = joined {
            return Ok(WorkingCopyGuard::new(self, file.clone(), existing));
        }

        info!("Creating working copy {:?}", file);
        let guard = WorkingCopyGuard::new(self, file.clone(), info.clone());
        let completion = InitCompletion {
            task: &info.init,
            finished: false,
        };
        match info.callback.on_init(&guard.working_copy(), ctx) {
            Ok(()) => {
                completion.finish(true);
                Ok(guard)
            }
            Err(err) => {
                warn!("Failed to initialize working copy {:?}: {}", file, err);
                completion.finish(false);
                drop(guard);
                Err(err)
            }
        }
    }

    /// Join the working copy of `file` if there is one.
    pub fn acquire_existing_working_copy(&self, file: &Handle, ctx: &Context) -> Result<Option<WorkingCopyGuard<'_>>> {
        let info = self.acquire_working_copy(file, ctx, |manager| manager.get_working_copy_info(file))?;
        Ok(info.map(|info| WorkingCopyGuard::new(self, file.clone(), info)))
    }

    /// Take a reference through `acquire` and wait for the working copy's
    /// initialization. `Ok(None)` means `acquire` took no reference.
    fn acquire_working_copy(
        &self,
        file: &Handle,
        ctx: &Context,
        acquire: impl Fn(&ElementManager) -> Option<Arc<WorkingCopyInfo>>,
    ) -> Result<Option<Arc<WorkingCopyInfo>>> {
        let deadline = Instant::now() + self.config.working_copy.acquire_timeout();
        loop {
            ctx.check_cancelled()?;
            let Some(info) = acquire(&self.manager) else {
                return Ok(None);
            };
            match self.wait_for_init(&info, ctx) {
                Ok(true) => return Ok(Some(info)),
                Ok(false) => {
                    debug!("Working copy {:?} not ready, retrying", file);
                    self.release_quietly(file);
                }
                Err(err) => {
                    self.release_quietly(file);
                    return Err(err);
                }
            }
            if Instant::now() >= deadline {
                return Err(ModelError::AcquireTimeout {
                    element: file.to_string(),
                });
            }
        }
    }

    fn wait_for_init(&self, info: &WorkingCopyInfo, ctx: &Context) -> Result<bool> {
        let config = &self.config.working_copy;
        let mut slice = config.init_wait();
        for _ in 0..INIT_WAIT_ROUNDS {
            ctx.check_cancelled()?;
            match info.init.wait(slice) {
                InitState::Succeeded => return Ok(true),
                InitState::Failed => return Ok(false),
                InitState::Pending => slice = (slice * 2).min(config.init_wait_max()),
            }
        }
        Ok(false)
    }

    fn release_quietly(&self, file: &Handle) {
        if let Err(err) = self.discard_working_copy(file) {
            debug!("Release of {:?} failed: {}", file, err);
        }
    }

    /// Release one reference to the working copy of `file`. Returns `true`
    /// if this disposed a working copy that had been created.
    pub fn discard_working_copy(&self, file: &Handle) -> Result<bool> {
        let released = self
            .manager
            .release_working_copy_info(file)
            .ok_or_else(|| ModelError::not_working_copy(file))?;
        if !released.disposed {
            return Ok(false);
        }

        info!("Disposing working copy {:?}", file);
        let wc = WorkingCopy {
            model: self,
            handle: file,
            info: &released.info,
        };
        released.info.callback.on_dispose(&wc);
        if released.info.is_created() {
            self.working_copy_mode_changed(file);
            return Ok(true);
        }
        Ok(false)
    }

    /// Whether `handle` is a created working copy, or is being turned into
    /// one on the call chain `ctx` belongs to.
    pub fn is_working_copy(&self, handle: &Handle, ctx: &Context) -> bool {
        match self.manager.peek_working_copy_info(handle) {
            Some(info) => info.is_created() || ctx.is_reconciling(handle),
            None => false,
        }
    }

    pub fn needs_reconciling(&self, file: &Handle) -> bool {
        match self.manager.peek_working_copy_info(file) {
            Some(info) if info.is_created() => {
                let wc = WorkingCopy {
                    model: self,
                    handle: file,
                    info: &info,
                };
                info.callback.needs_reconciling(&wc)
            }
            _ => false,
        }
    }

    /// Reconcile the working copy of `file` with its buffer. Does nothing if
    /// `file` is not a working copy.
    pub fn reconcile(&self, file: &Handle, options: ReconcileOptions, ctx: &Context) -> Result<()> {
        match self.acquire_existing_working_copy(file, ctx)? {
            Some(guard) => guard.reconcile(options, ctx),
            None => Ok(()),
        }
    }

    pub fn working_copy_buffer(&self, file: &Handle) -> Option<Buffer> {
        self.manager
            .peek_working_copy_info(file)
            .filter(|info| info.is_created())
            .map(|info| info.buffer().clone())
    }

    /// The working copy's buffer, or a new buffer over the file's stored content.
    pub fn buffer(&self, file: &Handle, ctx: &Context) -> Result<Buffer> {
        ctx.check_cancelled()?;
        if let Some(buffer) = self.working_copy_buffer(file) {
            return Ok(buffer);
        }
        let path = file
            .file_path()
            .ok_or_else(|| ModelError::not_working_copy(file))?;
        if !self.resources.exists(file) {
            return Err(ModelError::does_not_exist(file));
        }
        Buffer::for_file(path)
    }

    pub fn working_copies(&self) -> Vec<Handle> {
        self.manager.working_copies()
    }

    /// Rebuild the structure of working copy `file` from `request.source`.
    ///
    /// The first call creates the working copy. A forced request for an
    /// unchanged buffer skips the rebuild unless `rebuild_if_forced` is set.
    pub(crate) fn reconcile_structure(&self, file: &Handle, request: ReconcileRequest, ctx: &Context) -> Result<()> {
        let info = self
            .manager
            .peek_working_copy_info(file)
            .ok_or_else(|| ModelError::not_working_copy(file))?;
        let create = !info.is_created();

        if create || !request.forced || request.rebuild_if_forced {
            let differencer = self
                .has_notifications()
                .then(|| ElementDifferencer::new(ElementDeltaBuilder::new(file.clone()), &self.manager));
            let build_ctx = ctx
                .clone()
                .with_force_open()
                .with_reconciling(file)
                .with_source(request.source);
            self.open(file, &build_ctx)?;

            if let Some(mut differencer) = differencer {
                differencer.build_delta(&self.manager);
                if !differencer.is_empty_delta() {
                    debug!("Reconciled {:?}:\n{}", file, differencer.delta());
                    self.fire_change(ElementChangeEvent::post_reconcile(differencer.into_delta()));
                }
            }
        }

        if create {
            info.mark_created();
            self.working_copy_mode_changed(file);
        }
        Ok(())
    }

    fn working_copy_mode_changed(&self, file: &Handle) {
        if !self.has_notifications() {
            return;
        }
        let mut builder = ElementDeltaBuilder::new(file.root_handle());
        if self.resources.exists(file) {
            builder.changed(file.clone(), DeltaFlags::WORKING_COPY);
        } else if self.is_working_copy(file, &Context::new()) {
            builder.added(file.clone(), DeltaFlags::WORKING_COPY);
        } else {
            builder.removed(file.clone(), DeltaFlags::WORKING_COPY);
        }
        self.fire_change(ElementChangeEvent::post_change(builder.into_delta()));
    }
}
