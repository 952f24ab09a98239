//! Model configuration, loadable from `arbor.toml`

use crate::handle::ElementCategory;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub cache: CacheConfig,
    pub working_copy: WorkingCopyConfig,
    pub indexer: IndexerConfig,
}

/// Default capacities of the body cache, per element category. `None` means
/// unbounded. Roots and constructs are always unbounded: constructs live and
/// die with their source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub project_capacity: Option<usize>,
    pub folder_capacity: Option<usize>,
    pub file_capacity: Option<usize>,
    /// Scales every bounded capacity.
    pub memory_ratio: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            project_capacity: None,
            folder_capacity: Some(500),
            file_capacity: Some(250),
            memory_ratio: 1.0,
        }
    }
}

impl CacheConfig {
    pub fn capacity(&self, category: ElementCategory) -> Option<usize> {
        let base = match category {
            ElementCategory::Root | ElementCategory::Construct => None,
            ElementCategory::Project => self.project_capacity,
            ElementCategory::Folder => self.folder_capacity,
            ElementCategory::SourceFile => self.file_capacity,
        }?;
        let scaled = (base as f64 * self.memory_ratio).round();
        Some((scaled as usize).max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingCopyConfig {
    /// Give up joining a working copy whose initialization never settles.
    pub acquire_timeout_ms: u64,
    /// First wait slice for another thread's initialization; doubles up to
    /// `init_wait_max_ms`.
    pub init_wait_ms: u64,
    pub init_wait_max_ms: u64,
}

impl Default for WorkingCopyConfig {
    fn default() -> Self {
        WorkingCopyConfig {
            acquire_timeout_ms: 30_000,
            init_wait_ms: 1,
            init_wait_max_ms: 50,
        }
    }
}

impl WorkingCopyConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn init_wait(&self) -> Duration {
        Duration::from_millis(self.init_wait_ms.max(1))
    }

    pub fn init_wait_max(&self) -> Duration {
        Duration::from_millis(self.init_wait_max_ms.max(self.init_wait_ms).max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Glob patterns, relative to the workspace root, excluded from the model.
    pub exclude: Vec<String>,
    /// Honour `.gitignore` files while walking directories.
    pub respect_gitignore: bool,
    /// Parser threads; defaults to the number of CPUs.
    pub parser_workers: Option<usize>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            exclude: vec!["**/target".to_string(), "**/node_modules".to_string()],
            respect_gitignore: true,
            parser_workers: None,
        }
    }
}
