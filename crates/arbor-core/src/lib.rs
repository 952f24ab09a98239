//! Arbor Core: Handle/body element model, working copies, and change deltas

pub mod handle;
pub mod body;
pub mod snapshot;
pub mod buffer;
pub mod lru_cache;
pub mod cache;
pub mod config;
pub mod context;
pub mod delta;
pub mod diff;
pub mod error;
pub mod manager;
pub mod model;
pub mod notification;
pub mod working_copy;
pub mod workspace;


#[cfg(test)]
pub mod test_utils;

pub use handle::{Handle, ElementCategory, ElementKind, ConstructKey, WorkingCopyCapable};
pub use body::{Body, TextRange, Property, NewElements, StructureHelper, HasChildren, HasSourceRange};
pub use snapshot::{Snapshot, SnapshotRef, StringSnapshot, NonExpiringSnapshot, FileSnapshot, snapshots_equal};
pub use buffer::{Buffer, BufferChange, BufferChangeOperation, TextEdit, SaveMode};
pub use lru_cache::LruCache;
pub use cache::{BodyCache, CacheStats, CategoryStats};
pub use config::{ModelConfig, CacheConfig, WorkingCopyConfig, IndexerConfig};
pub use context::{Context, CancellationToken, SourceText};
pub use delta::{DeltaFlags, DeltaKind, ElementDelta, ElementDeltaBuilder};
pub use diff::{BodyLookup, ElementDifferencer};
pub use error::{ModelError, Result};
pub use manager::ElementManager;
pub use model::Model;
pub use notification::{ChangeEventKind, ElementChangeEvent, ElementChangeListener, NotificationManager, NotificationSink, ListenerId};
pub use working_copy::{
    WorkingCopy, WorkingCopyInfo, WorkingCopyGuard, WorkingCopyCallback, DefaultWorkingCopyCallback,
    ReconcileOptions, ReconcileRequest, ReconcileStrategy, StructureReconciler, InitState,
};
pub use workspace::{StructureBuilder, ResourceOracle, SnapshotProvider, LocalFileSystem};
