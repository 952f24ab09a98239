//! Body cache partitioned by element category

use crate::body::Body;
use crate::config::CacheConfig;
use crate::handle::{ElementCategory, Handle};
use crate::lru_cache::LruCache;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

struct CategoryCache {
    entries: LruCache<Handle, Arc<Body>>,
    default_capacity: Option<usize>,
    /// Parent whose child count raised the capacity above its default.
    raised_by: Option<Handle>,
}

impl CategoryCache {
    fn new(capacity: Option<usize>) -> Self {
        CategoryCache {
            entries: LruCache::with_capacity(capacity),
            default_capacity: capacity,
            raised_by: None,
        }
    }

    fn ensure_capacity(&mut self, child_count: usize, parent: &Handle) {
        let Some(capacity) = self.entries.capacity() else {
            return;
        };
        // Leave some headroom beyond the children themselves.
        let needed = child_count + child_count / 10;
        if capacity < needed {
            self.entries.set_capacity(Some(needed));
            self.raised_by = Some(parent.clone());
        }
    }

    fn reset_capacity(&mut self, parent: &Handle) {
        if self.raised_by.as_ref() == Some(parent) {
            self.entries.set_capacity(self.default_capacity);
            self.raised_by = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub category: &'static str,
    pub len: usize,
    pub capacity: Option<usize>,
}

/// Entry counts and capacities per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub categories: Vec<CategoryStats>,
}

impl CacheStats {
    pub fn len(&self, category: ElementCategory) -> usize {
        self.categories
            .iter()
            .find(|c| c.category == category.as_str())
            .map_or(0, |c| c.len)
    }

    pub fn total(&self) -> usize {
        self.categories.iter().map(|c| c.len).sum()
    }
}

/// One LRU per category. Storing never evicts; the element manager trims
/// over-capacity categories after installing a batch.
pub struct BodyCache {
    categories: Vec<CategoryCache>,
}

impl BodyCache {
    pub fn new(config: &CacheConfig) -> Self {
        BodyCache {
            categories: ElementCategory::ALL
                .iter()
                .map(|c| CategoryCache::new(config.capacity(*c)))
                .collect(),
        }
    }

    fn category(&self, category: ElementCategory) -> &CategoryCache {
        &self.categories[category.index()]
    }

    fn category_mut(&mut self, category: ElementCategory) -> &mut CategoryCache {
        &mut self.categories[category.index()]
    }

    pub fn get(&mut self, handle: &Handle) -> Option<Arc<Body>> {
        self.category_mut(handle.category()).entries.get(handle).cloned()
    }

    pub fn peek(&self, handle: &Handle) -> Option<Arc<Body>> {
        self.category(handle.category()).entries.peek(handle).cloned()
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.category(handle.category()).entries.contains(handle)
    }

    pub fn put(&mut self, handle: Handle, body: Arc<Body>) -> Option<Arc<Body>> {
        self.raise_capacity_for(&handle, &body);
        self.category_mut(handle.category()).entries.put(handle, body)
    }

    pub fn remove(&mut self, handle: &Handle) -> Option<Arc<Body>> {
        let removed = self.category_mut(handle.category()).entries.remove(handle);
        if removed.is_some() {
            for category in &mut self.categories {
                category.reset_capacity(handle);
            }
        }
        removed
    }

    /// A container with many children must be able to keep all of them open.
    fn raise_capacity_for(&mut self, parent: &Handle, body: &Body) {
        if parent.category() == ElementCategory::SourceFile
            || parent.category() == ElementCategory::Construct
        {
            return;
        }
        let mut counts = [0usize; 5];
        for child in body.children() {
            counts[child.category().index()] += 1;
        }
        for category in ElementCategory::ALL {
            let count = counts[category.index()];
            if count > 0 {
                let cache = self.category_mut(category);
                let before = cache.entries.capacity();
                cache.ensure_capacity(count, parent);
                if cache.entries.capacity() != before {
                    debug!(
                        "Raised {} cache capacity to {:?} for {}",
                        category.as_str(),
                        cache.entries.capacity(),
                        parent
                    );
                }
            }
        }
    }

    pub fn overflow(&self, category: ElementCategory) -> usize {
        self.category(category).entries.overflow()
    }

    /// Eviction candidates of a category, least recently used first.
    pub fn lru_keys(&self, category: ElementCategory) -> Vec<Handle> {
        self.category(category).entries.lru_keys()
    }

    pub fn capacity(&self, category: ElementCategory) -> Option<usize> {
        self.category(category).entries.capacity()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            categories: ElementCategory::ALL
                .iter()
                .map(|c| CategoryStats {
                    category: c.as_str(),
                    len: self.category(*c).entries.len(),
                    capacity: self.category(*c).entries.capacity(),
                })
                .collect(),
        }
    }
}
