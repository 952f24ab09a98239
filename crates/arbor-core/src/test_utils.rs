//! Test utilities for Arbor: an in-memory workspace and a line-based builder

use crate::body::{Body, NewElements, Property, StructureHelper, TextRange};
use crate::context::{Context, SourceText};
use crate::error::{ModelError, Result};
use crate::handle::{ElementKind, Handle};
use crate::snapshot::{SnapshotRef, StringSnapshot};
use crate::workspace::{ResourceOracle, SnapshotProvider, StructureBuilder};
use anyhow::bail;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const WORKSPACE_ROOT: &str = "/ws";

/// Text after `=` in a `def` line.
pub const DEF_BODY: Property<String> = Property::new("def_body");

/// Files held in memory, keyed by absolute path under [`WORKSPACE_ROOT`].
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    files: RwLock<BTreeMap<PathBuf, String>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Handle {
        Handle::root(WORKSPACE_ROOT)
    }

    /// Write `contents` to `relative`, e.g. `"p/src/a.foo"`.
    pub fn write(&self, relative: &str, contents: &str) {
        self.files
            .write()
            .insert(Path::new(WORKSPACE_ROOT).join(relative), contents.to_string());
    }

    pub fn remove(&self, relative: &str) {
        self.files.write().remove(&Path::new(WORKSPACE_ROOT).join(relative));
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.files
            .read()
            .keys()
            .any(|file| file != path && file.starts_with(path))
    }

    /// Direct entries of directory `dir`, each with whether it is a directory.
    fn entries(&self, dir: &Path) -> Vec<(String, bool)> {
        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        for file in self.files.read().keys() {
            let Ok(rest) = file.strip_prefix(dir) else {
                continue;
            };
            let mut components = rest.components();
            if let Some(first) = components.next() {
                let is_dir = components.next().is_some();
                let name = first.as_os_str().to_string_lossy().into_owned();
                *entries.entry(name).or_insert(false) |= is_dir;
            }
        }
        entries.into_iter().collect()
    }
}

impl ResourceOracle for MemoryWorkspace {
    fn exists(&self, handle: &Handle) -> bool {
        match handle.kind() {
            ElementKind::Root { path } => path == Path::new(WORKSPACE_ROOT),
            ElementKind::Project { path } | ElementKind::Folder { path } => self.is_dir(path),
            ElementKind::SourceFile { path } => self.files.read().contains_key(path),
            ElementKind::Construct(_) => true,
        }
    }
}

impl SnapshotProvider for MemoryWorkspace {
    fn file_snapshot(&self, file: &Handle) -> Result<SnapshotRef> {
        let contents = file
            .path()
            .and_then(|path| self.files.read().get(path).cloned())
            .ok_or_else(|| ModelError::does_not_exist(file))?;
        Ok(Arc::new(StringSnapshot::new(contents)))
    }
}

/// Builds structure for the line-based "foo" language:
///
/// ```text
/// var NAME
/// def NAME(T1, T2) = body
/// ```
///
/// `var` lines become `var` constructs, `def` lines `fn` constructs with the
/// parameter types in their key. Containers list the workspace entries.
pub struct FooBuilder {
    workspace: Arc<MemoryWorkspace>,
    builds: AtomicUsize,
    delay: Mutex<Duration>,
    fail_marker: Mutex<Option<String>>,
}

impl FooBuilder {
    pub fn new(workspace: Arc<MemoryWorkspace>) -> Self {
        FooBuilder {
            workspace,
            builds: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            fail_marker: Mutex::new(None),
        }
    }

    /// Number of source files built so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Fail any build whose source text contains `marker`.
    pub fn fail_on(&self, marker: Option<&str>) {
        *self.fail_marker.lock() = marker.map(str::to_string);
    }

    fn build_container(&self, handle: &Handle, elements: &mut NewElements) -> anyhow::Result<()> {
        let Some(dir) = handle.path() else {
            bail!("{} has no path", handle);
        };
        elements.insert(handle.clone(), Body::new());
        let mut helper = StructureHelper::new(elements);
        for (name, is_dir) in self.workspace.entries(dir) {
            let child = match handle.kind() {
                ElementKind::Root { .. } if is_dir => handle.project(&name),
                ElementKind::Root { .. } => continue,
                _ if is_dir => handle.folder(&name),
                _ => handle.source_file(&name),
            };
            helper.add_child(handle, child);
        }
        helper.complete();
        Ok(())
    }

    fn build_file(&self, file: &Handle, source: &SourceText, elements: &mut NewElements) -> anyhow::Result<()> {
        let text = source.contents();
        if let Some(marker) = &*self.fail_marker.lock() {
            if text.contains(marker.as_str()) {
                bail!("syntax error near {:?}", marker);
            }
        }
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        elements.insert(file.clone(), Body::new_source());
        let mut helper = StructureHelper::new(elements);
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            let start = offset;
            offset += line.len();
            let line = line.trim_end_matches(['\n', '\r']);
            let Some((handle, name_at, name_len, def_body)) = parse_line(file, line) else {
                continue;
            };
            let mut body = Body::new_source();
            body.set_full_range(TextRange::new(start, line.len()));
            body.set_identifying_range(TextRange::new(start + name_at, name_len));
            if let Some(def_body) = def_body {
                body.set(&DEF_BODY, def_body);
            }
            helper.push_child(file, handle, body);
        }
        helper.complete();
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Construct handle, name offset within the line, name length and def body.
fn parse_line(file: &Handle, line: &str) -> Option<(Handle, usize, usize, Option<String>)> {
    if let Some(rest) = line.strip_prefix("var ") {
        let name = rest.trim();
        if name.is_empty() {
            return None;
        }
        let name_at = "var ".len() + leading_space(rest);
        return Some((file.construct("var", name), name_at, name.len(), None));
    }
    let rest = line.strip_prefix("def ")?;
    let open = rest.find('(')?;
    let close = rest.find(')')?;
    let name = rest[..open].trim();
    if name.is_empty() || close < open {
        return None;
    }
    let params = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    let def_body = rest[close + 1..]
        .trim()
        .strip_prefix('=')
        .map(|b| b.trim().to_string())
        .unwrap_or_default();
    Some((
        file.construct_with_params("fn", name, params),
        "def ".len() + leading_space(rest),
        name.len(),
        Some(def_body),
    ))
}

fn leading_space(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

impl StructureBuilder for FooBuilder {
    fn build_structure(
        &self,
        handle: &Handle,
        source: Option<&SourceText>,
        elements: &mut NewElements,
        ctx: &Context,
    ) -> anyhow::Result<()> {
        ctx.check_cancelled()?;
        match handle.kind() {
            ElementKind::SourceFile { .. } => match source {
                Some(source) => self.build_file(handle, source, elements),
                None => bail!("no source text for {}", handle),
            },
            ElementKind::Construct(_) => bail!("constructs are built with their file"),
            _ => self.build_container(handle, elements),
        }
    }
}
