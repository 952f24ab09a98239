//! Filesystem watcher implementation

use crate::delta_processor::DeltaProcessor;
use anyhow::{Result, bail};
use arbor_core::{Handle, IndexerConfig, Model};
use arbor_indexer::build_excludes;
use globset::GlobSet;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Events emitted by the file watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// File or directory created
    Created(PathBuf),
    /// File contents modified
    Modified(PathBuf),
    /// File or directory removed
    Removed(PathBuf),
    /// File or directory renamed within the watched tree
    Renamed { from: PathBuf, to: PathBuf },
}

/// Decides which paths the watcher reports: hidden entries and paths matching
/// the configured excludes, relative to the workspace root, are dropped.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    excludes: GlobSet,
}

impl PathFilter {
    pub fn new(root: impl Into<PathBuf>, config: &IndexerConfig) -> Result<Self> {
        Ok(PathFilter {
            root: root.into(),
            excludes: build_excludes(config)?,
        })
    }

    pub fn should_ignore(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        let hidden = relative
            .components()
            .any(|c| c.as_os_str().to_str().is_some_and(|name| name.starts_with('.')));
        hidden
            || relative
                .ancestors()
                .filter(|p| !p.as_os_str().is_empty())
                .any(|p| self.excludes.is_match(p))
    }
}

/// File system watcher for monitoring code changes
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    watched_paths: HashSet<PathBuf>,
}

impl FileWatcher {
    /// Create a new file watcher reporting the paths `filter` lets through
    pub fn new(filter: PathFilter) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                debug!("File system event: {:?}", event);
                for event in translate_event(event) {
                    if event_paths(&event).any(|p| filter.should_ignore(p)) {
                        continue;
                    }
                    if let Err(e) = event_tx.send(event) {
                        warn!("Failed to send watch event: {}", e);
                    }
                }
            }
            Err(e) => {
                error!("File system watch error: {}", e);
            }
        })?;

        Ok(Self {
            watcher,
            event_rx,
            watched_paths: HashSet::new(),
        })
    }

    /// Watch a directory recursively
    pub fn watch_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Watching directory: {:?}", path);

        self.watcher.watch(path, RecursiveMode::Recursive)?;
        self.watched_paths.insert(path.to_path_buf());
        Ok(())
    }

    /// Stop watching a path
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Stopping watch for: {:?}", path);

        self.watcher.unwatch(path)?;
        self.watched_paths.remove(path);
        Ok(())
    }

    pub fn event_receiver(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.event_rx
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_paths.contains(path)
    }
}

/// Convert a notify event into watch events. Renames arrive as one event
/// carrying both paths; the separate halves notify also reports are dropped.
fn translate_event(event: notify::Event) -> Vec<WatchEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(WatchEvent::Created).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(WatchEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match <[PathBuf; 2]>::try_from(event.paths) {
            Ok([from, to]) => vec![WatchEvent::Renamed { from, to }],
            Err(paths) => {
                debug!("Rename with unexpected paths: {:?}", paths);
                Vec::new()
            }
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::To)) => Vec::new(),
        // Backends that cannot pair renames report each side on its own.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .into_iter()
            .map(|path| {
                if path.exists() {
                    WatchEvent::Created(path)
                } else {
                    WatchEvent::Removed(path)
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event.paths.into_iter().map(WatchEvent::Modified).collect(),
        _ => Vec::new(),
    }
}

fn event_paths(event: &WatchEvent) -> impl Iterator<Item = &Path> {
    let (first, second) = match event {
        WatchEvent::Created(path) | WatchEvent::Modified(path) | WatchEvent::Removed(path) => (path, None),
        WatchEvent::Renamed { from, to } => (from, Some(to)),
    };
    std::iter::once(first.as_path()).chain(second.map(PathBuf::as_path))
}

/// Watches a project directory and publishes the resulting element deltas.
pub struct WatcherService {
    watcher: FileWatcher,
    processor: DeltaProcessor,
    project_path: PathBuf,
    debounce: Duration,
}

impl WatcherService {
    pub fn new(model: Arc<Model>, project: &Handle, config: &IndexerConfig) -> Result<Self> {
        let root = project.root_handle();
        let (Some(root_path), Some(project_path)) = (root.path(), project.path()) else {
            bail!("{} is not a directory element", project);
        };
        let watcher = FileWatcher::new(PathFilter::new(root_path, config)?)?;
        Ok(Self {
            watcher,
            processor: DeltaProcessor::new(model, root.clone()),
            project_path: project_path.to_path_buf(),
            debounce: Duration::from_millis(50),
        })
    }

    /// How long to wait for more events before publishing a batch
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn start_watching(&mut self) -> Result<()> {
        let project_path = self.project_path.clone();
        self.watcher.watch_directory(&project_path)?;
        info!("Started watching project directory: {:?}", project_path);
        Ok(())
    }

    /// Process events until the watcher shuts down, publishing one delta
    /// per batch of events.
    pub async fn process_events(&mut self) -> Result<()> {
        while let Some(event) = self.watcher.event_receiver().recv().await {
            self.handle_event(&event);
            tokio::time::sleep(self.debounce).await;
            while let Ok(event) = self.watcher.event_receiver().try_recv() {
                self.handle_event(&event);
            }
            if let Some(delta) = self.processor.flush() {
                info!("Published changes:\n{}", delta);
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: &WatchEvent) {
        match event {
            WatchEvent::Created(path) => info!("File created: {:?}", path),
            WatchEvent::Modified(path) => info!("File modified: {:?}", path),
            WatchEvent::Removed(path) => info!("File removed: {:?}", path),
            WatchEvent::Renamed { from, to } => info!("File renamed: {:?} -> {:?}", from, to),
        }
        self.processor.process(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind};
    use tempfile::TempDir;
    use tokio::time::sleep;

    fn filter() -> PathFilter {
        PathFilter::new("/ws", &IndexerConfig::default()).unwrap()
    }

    #[test]
    fn test_should_ignore_path() {
        let filter = filter();
        assert!(!filter.should_ignore(Path::new("/ws/demo/src/lib.rs")));
        assert!(filter.should_ignore(Path::new("/ws/demo/.git/index")));
        assert!(filter.should_ignore(Path::new("/ws/demo/target/debug/build.rs")));
        assert!(filter.should_ignore(Path::new("/ws/demo/web/node_modules/x/index.js")));
        assert!(filter.should_ignore(Path::new("/elsewhere/lib.rs")));
    }

    #[test]
    fn test_translate_event() {
        let created = notify::Event::new(EventKind::Create(CreateKind::File)).add_path("/ws/a.rs".into());
        assert_eq!(translate_event(created), vec![WatchEvent::Created("/ws/a.rs".into())]);

        let written = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/ws/a.rs".into());
        assert_eq!(translate_event(written), vec![WatchEvent::Modified("/ws/a.rs".into())]);

        let renamed = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/ws/a.rs".into())
            .add_path("/ws/b.rs".into());
        assert_eq!(
            translate_event(renamed),
            vec![WatchEvent::Renamed {
                from: "/ws/a.rs".into(),
                to: "/ws/b.rs".into()
            }]
        );

        let half = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path("/ws/a.rs".into());
        assert!(translate_event(half).is_empty());

        let touched = notify::Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)))
            .add_path("/ws/a.rs".into());
        assert!(translate_event(touched).is_empty());
    }

    #[tokio::test]
    async fn test_file_watcher_creation() {
        let temp_dir = TempDir::new().unwrap();
        let filter = PathFilter::new(temp_dir.path(), &IndexerConfig::default()).unwrap();
        let mut watcher = FileWatcher::new(filter).unwrap();
        watcher.watch_directory(temp_dir.path()).unwrap();
        assert!(watcher.is_watching(temp_dir.path()));
        watcher.unwatch(temp_dir.path()).unwrap();
        assert!(!watcher.is_watching(temp_dir.path()));
    }

    #[tokio::test]
    async fn test_watch_events() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let filter = PathFilter::new(&root, &IndexerConfig::default()).unwrap();
        let mut watcher = FileWatcher::new(filter).unwrap();

        let test_file = root.join("test.rs");
        std::fs::write(&test_file, "fn main() {}").unwrap();
        watcher.watch_directory(&root).unwrap();

        std::fs::write(&test_file, "fn main() { println!(\"Hello\"); }").unwrap();

        // Give the watcher time to detect the change
        sleep(Duration::from_millis(100)).await;

        while let Ok(event) = watcher.event_receiver().try_recv() {
            if let WatchEvent::Modified(path) = event {
                assert_eq!(path, test_file);
            }
        }
    }
}
