//! Element manager: body cache plus working-copy registry behind one lock

use crate::body::{Body, NewElements};
use crate::cache::{BodyCache, CacheStats};
use crate::config::CacheConfig;
use crate::diff::BodyLookup;
use crate::handle::{ElementCategory, Handle};
use crate::working_copy::WorkingCopyInfo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

struct WorkingCopyEntry {
    info: Arc<WorkingCopyInfo>,
    refcount: usize,
}

/// Result of releasing one reference to a working copy.
pub struct ReleasedWorkingCopy {
    pub info: Arc<WorkingCopyInfo>,
    /// The last reference is gone and the info was removed.
    pub disposed: bool,
}

struct ManagerState {
    cache: BodyCache,
    working_copies: HashMap<Handle, WorkingCopyEntry>,
}

impl ManagerState {
    fn is_pinned(&self, handle: &Handle) -> bool {
        self.working_copies.contains_key(handle)
    }

    /// Remove the body and, recursively, its children's. Working copies stay.
    fn close(&mut self, handle: &Handle) {
        if self.is_pinned(handle) {
            return;
        }
        self.remove_with_children(handle);
    }

    fn remove_with_children(&mut self, handle: &Handle) {
        if let Some(body) = self.cache.remove(handle) {
            for child in body.children() {
                self.close(child);
            }
        }
    }

    /// Trim every over-capacity category, least recently used first. Never
    /// evicts working copies, the handle just installed or its ancestors; if
    /// nothing else is left, the category stays over capacity.
    fn make_room(&mut self, installed: &Handle) {
        for category in ElementCategory::ALL {
            if self.cache.overflow(category) == 0 {
                continue;
            }
            for candidate in self.cache.lru_keys(category) {
                if self.cache.overflow(category) == 0 {
                    break;
                }
                if &candidate == installed
                    || candidate.is_ancestor_of(installed)
                    || self.is_pinned(&candidate)
                    || !self.cache.contains(&candidate)
                {
                    continue;
                }
                debug!("Evicting {:?}", candidate);
                self.close(&candidate);
            }
            let overflow = self.cache.overflow(category);
            if overflow > 0 {
                debug!(
                    "{} cache stays {} over capacity: remaining entries are in use",
                    category.as_str(),
                    overflow
                );
            }
        }
    }
}

/// Owns all cached bodies and working-copy records of a model.
pub struct ElementManager {
    state: Mutex<ManagerState>,
}

impl ElementManager {
    pub fn new(config: &CacheConfig) -> Self {
        ElementManager {
            state: Mutex::new(ManagerState {
                cache: BodyCache::new(config),
                working_copies: HashMap::new(),
            }),
        }
    }

    /// Cached body, marked as recently used.
    pub fn find_body(&self, handle: &Handle) -> Option<Arc<Body>> {
        self.state.lock().cache.get(handle)
    }

    /// Cached body without affecting eviction order.
    pub fn peek_body(&self, handle: &Handle) -> Option<Arc<Body>> {
        self.state.lock().cache.peek(handle)
    }

    /// Install a freshly built body together with its descendants' bodies.
    ///
    /// Unless `force` is set, a body another thread installed in the meantime
    /// wins and is returned instead. A forced install first closes the old
    /// children so constructs that disappeared stop existing.
    pub fn install(&self, handle: &Handle, body: Body, descendants: NewElements, force: bool) -> Arc<Body> {
        let mut state = self.state.lock();
        match state.cache.peek(handle) {
            Some(existing) if !force => {
                debug!("Discarding concurrently built body of {:?}", handle);
                return state.cache.get(handle).unwrap_or(existing);
            }
            Some(existing) => {
                for child in existing.children() {
                    state.close(child);
                }
            }
            None => {}
        }

        let count = descendants.len();
        for (descendant, descendant_body) in descendants {
            state.cache.put(descendant, Arc::new(descendant_body));
        }
        let body = Arc::new(body);
        state.cache.put(handle.clone(), body.clone());
        debug!("Installed {:?} with {} descendant bodies", handle, count);

        state.make_room(handle);
        body
    }

    /// Close an element. Closing a working copy does nothing.
    pub fn close(&self, handle: &Handle) {
        self.state.lock().close(handle);
    }

    /// Register `info` for `handle` with one reference, or, if a working copy
    /// already exists, take a reference to it and return it instead.
    pub fn put_working_copy_info_if_absent(
        &self,
        handle: &Handle,
        info: Arc<WorkingCopyInfo>,
    ) -> Option<Arc<WorkingCopyInfo>> {
        let mut state = self.state.lock();
        if let Some(entry) = state.working_copies.get_mut(handle) {
            entry.refcount += 1;
            return Some(entry.info.clone());
        }
        state
            .working_copies
            .insert(handle.clone(), WorkingCopyEntry { info, refcount: 1 });
        None
    }

    /// Take a reference to an existing working copy.
    pub fn get_working_copy_info(&self, handle: &Handle) -> Option<Arc<WorkingCopyInfo>> {
        let mut state = self.state.lock();
        let entry = state.working_copies.get_mut(handle)?;
        entry.refcount += 1;
        Some(entry.info.clone())
    }

    /// Existing working copy without taking a reference.
    pub fn peek_working_copy_info(&self, handle: &Handle) -> Option<Arc<WorkingCopyInfo>> {
        self.state
            .lock()
            .working_copies
            .get(handle)
            .map(|entry| entry.info.clone())
    }

    /// Drop one reference. The last release removes the info and closes the
    /// working copy's structure.
    pub fn release_working_copy_info(&self, handle: &Handle) -> Option<ReleasedWorkingCopy> {
        let mut state = self.state.lock();
        let entry = state.working_copies.get_mut(handle)?;
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return Some(ReleasedWorkingCopy {
                info: entry.info.clone(),
                disposed: false,
            });
        }
        let entry = state.working_copies.remove(handle)?;
        entry.info.mark_disposed();
        state.close(handle);
        Some(ReleasedWorkingCopy {
            info: entry.info,
            disposed: true,
        })
    }

    pub fn working_copy_refcount(&self, handle: &Handle) -> usize {
        self.state
            .lock()
            .working_copies
            .get(handle)
            .map_or(0, |entry| entry.refcount)
    }

    /// Handles currently in working-copy mode.
    pub fn working_copies(&self) -> Vec<Handle> {
        self.state.lock().working_copies.keys().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().cache.stats()
    }
}

impl BodyLookup for ElementManager {
    fn lookup_body(&self, handle: &Handle) -> Option<Arc<Body>> {
        self.peek_body(handle)
    }
}
