//! Element handles: immutable, value-comparable element identifiers

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Cache partition an element belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementCategory {
    Root,
    Project,
    Folder,
    SourceFile,
    Construct,
}

impl ElementCategory {
    pub const ALL: [ElementCategory; 5] = [
        ElementCategory::Root,
        ElementCategory::Project,
        ElementCategory::Folder,
        ElementCategory::SourceFile,
        ElementCategory::Construct,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementCategory::Root => "root",
            ElementCategory::Project => "project",
            ElementCategory::Folder => "folder",
            ElementCategory::SourceFile => "source_file",
            ElementCategory::Construct => "construct",
        }
    }
}

/// Discriminators of a construct inside a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstructKey {
    /// Language-level kind tag such as `fn` or `struct`.
    pub kind: String,
    pub parameter_types: Vec<String>,
    /// 1 for the first sibling with equal discriminators, 2 for the next, ...
    pub occurrence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Root { path: PathBuf },
    Project { path: PathBuf },
    Folder { path: PathBuf },
    SourceFile { path: PathBuf },
    Construct(ConstructKey),
}

impl ElementKind {
    pub fn category(&self) -> ElementCategory {
        match self {
            ElementKind::Root { .. } => ElementCategory::Root,
            ElementKind::Project { .. } => ElementCategory::Project,
            ElementKind::Folder { .. } => ElementCategory::Folder,
            ElementKind::SourceFile { .. } => ElementCategory::SourceFile,
            ElementKind::Construct(_) => ElementCategory::Construct,
        }
    }
}

struct HandleData {
    hash: u64,
    parent: Option<Handle>,
    name: String,
    kind: ElementKind,
}

impl PartialEq for HandleData {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.name == other.name
            && self.kind == other.kind
            && self.parent == other.parent
    }
}

/// Lightweight reference to an element. Equal handles denote the same element;
/// the element's structure lives in the model's body cache.
#[derive(Clone)]
pub struct Handle(Arc<HandleData>);

impl Handle {
    fn new(parent: Option<Handle>, name: String, kind: ElementKind) -> Self {
        let mut hasher = DefaultHasher::new();
        if let Some(parent) = &parent {
            parent.0.hash.hash(&mut hasher);
        }
        name.hash(&mut hasher);
        kind.hash(&mut hasher);
        Handle(Arc::new(HandleData {
            hash: hasher.finish(),
            parent,
            name,
            kind,
        }))
    }

    /// Top-level element for a workspace directory.
    pub fn root(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Handle::new(None, name, ElementKind::Root { path })
    }

    pub fn project(&self, name: &str) -> Handle {
        let path = self.child_path(name);
        Handle::new(Some(self.clone()), name.to_string(), ElementKind::Project { path })
    }

    pub fn folder(&self, name: &str) -> Handle {
        let path = self.child_path(name);
        Handle::new(Some(self.clone()), name.to_string(), ElementKind::Folder { path })
    }

    pub fn source_file(&self, name: &str) -> Handle {
        let path = self.child_path(name);
        Handle::new(
            Some(self.clone()),
            name.to_string(),
            ElementKind::SourceFile { path },
        )
    }

    pub fn construct(&self, kind: &str, name: &str) -> Handle {
        self.construct_with_params(kind, name, Vec::new())
    }

    pub fn construct_with_params(&self, kind: &str, name: &str, parameter_types: Vec<String>) -> Handle {
        Handle::new(
            Some(self.clone()),
            name.to_string(),
            ElementKind::Construct(ConstructKey {
                kind: kind.to_string(),
                parameter_types,
                occurrence: 1,
            }),
        )
    }

    /// Same construct with a different occurrence count. Other handles are
    /// returned unchanged.
    pub fn with_occurrence(&self, occurrence: u32) -> Handle {
        match &self.0.kind {
            ElementKind::Construct(key) if key.occurrence != occurrence => Handle::new(
                self.0.parent.clone(),
                self.0.name.clone(),
                ElementKind::Construct(ConstructKey {
                    occurrence,
                    ..key.clone()
                }),
            ),
            _ => self.clone(),
        }
    }

    fn child_path(&self, name: &str) -> PathBuf {
        match self.path() {
            Some(path) => path.join(name),
            None => PathBuf::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &ElementKind {
        &self.0.kind
    }

    pub fn category(&self) -> ElementCategory {
        self.0.kind.category()
    }

    pub fn parent(&self) -> Option<&Handle> {
        self.0.parent.as_ref()
    }

    /// Filesystem location; `None` for constructs.
    pub fn path(&self) -> Option<&Path> {
        match &self.0.kind {
            ElementKind::Root { path }
            | ElementKind::Project { path }
            | ElementKind::Folder { path }
            | ElementKind::SourceFile { path } => Some(path),
            ElementKind::Construct(_) => None,
        }
    }

    pub fn construct_key(&self) -> Option<&ConstructKey> {
        match &self.0.kind {
            ElementKind::Construct(key) => Some(key),
            _ => None,
        }
    }

    pub fn occurrence(&self) -> u32 {
        self.construct_key().map_or(1, |key| key.occurrence)
    }

    /// Proper ancestors, nearest first.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent(),
        }
    }

    /// Topmost ancestor (or the handle itself when it has no parent).
    pub fn root_handle(&self) -> Handle {
        self.ancestors().last().unwrap_or(self).clone()
    }

    pub fn is_ancestor_of(&self, other: &Handle) -> bool {
        other.ancestors().any(|a| a == self)
    }

    /// The handle itself if it is a source file, else its nearest enclosing file.
    pub fn source_file_handle(&self) -> Option<Handle> {
        std::iter::once(self)
            .chain(self.ancestors())
            .find(|h| h.category() == ElementCategory::SourceFile)
            .cloned()
    }

    /// Map a filesystem path under `root` to a handle. The first component below
    /// the root names a project, intermediate directories are folders. Files
    /// lying directly in the root are not part of the model.
    pub fn resolve_path(root: &Handle, path: &Path, is_dir: bool) -> Option<Handle> {
        let root_path = root.path()?;
        let relative = path.strip_prefix(root_path).ok()?;
        let names: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        let Some((last, rest)) = names.split_last() else {
            return Some(root.clone());
        };
        let Some((project, folders)) = rest.split_first() else {
            return is_dir.then(|| root.project(last));
        };

        let mut handle = root.project(project);
        for folder in folders {
            handle = handle.folder(folder);
        }
        Some(if is_dir {
            handle.folder(last)
        } else {
            handle.source_file(last)
        })
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)?;
        if let Some(key) = self.construct_key() {
            if !key.parameter_types.is_empty() {
                write!(f, "({})", key.parameter_types.join(","))?;
            }
            if key.occurrence > 1 {
                write!(f, "~{}", key.occurrence)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chain: Vec<&Handle> = self.ancestors().collect();
        chain.reverse();
        chain.push(self);
        let names: Vec<String> = chain.iter().map(|h| h.to_string()).collect();
        write!(f, "Handle({})", names.join("/"))
    }
}

pub struct Ancestors<'a> {
    next: Option<&'a Handle>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Handle;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

/// Elements that can be put into working-copy mode.
pub trait WorkingCopyCapable {
    fn supports_working_copy(&self) -> bool;

    /// Backing file of the working copy.
    fn file_path(&self) -> Option<&Path>;
}

impl WorkingCopyCapable for Handle {
    fn supports_working_copy(&self) -> bool {
        self.category() == ElementCategory::SourceFile
    }

    fn file_path(&self) -> Option<&Path> {
        if self.supports_working_copy() {
            self.path()
        } else {
            None
        }
    }
}
