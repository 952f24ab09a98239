//! Arbor Watcher: Filesystem events to model updates and element deltas

pub mod delta_processor;
pub mod watcher;

pub use delta_processor::DeltaProcessor;
pub use watcher::{FileWatcher, PathFilter, WatchEvent, WatcherService};
