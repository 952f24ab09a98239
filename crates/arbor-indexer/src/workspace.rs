//! Filesystem structure builder: directories, projects and source files

use crate::config::build_excludes;
use crate::languages::{self, LanguageBuilder};
use crate::parser_pool::{ParseRequest, ParserPool, create_parser_pool};
use anyhow::{Result, bail};
use arbor_core::{
    Body, Context, ElementKind, Handle, IndexerConfig, NewElements, Property, SourceText, StructureBuilder,
    StructureHelper,
};
use globset::GlobSet;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Kind of build system a project directory uses, e.g. `cargo`.
pub const PROJECT_KIND: Property<WorkspaceType> = Property::new("project_kind");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceType {
    Cargo,
    Python,
}

impl WorkspaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceType::Cargo => "cargo",
            WorkspaceType::Python => "python",
        }
    }
}

/// Detect the build system of a project directory from its manifest
pub fn detect_workspace(root: &Path) -> Option<WorkspaceType> {
    if root.join("Cargo.toml").exists() {
        Some(WorkspaceType::Cargo)
    } else if root.join("pyproject.toml").exists() || root.join("setup.py").exists() {
        Some(WorkspaceType::Python)
    } else {
        None
    }
}

/// Root and project handles for a project directory: the model is rooted at
/// the directory's parent, the directory itself is the project.
pub fn project_handles(dir: &Path) -> Result<(Handle, Handle)> {
    let dir = dir.canonicalize()?;
    let (Some(parent), Some(name)) = (dir.parent(), dir.file_name()) else {
        bail!("{:?} cannot be a project directory", dir);
    };
    let root = Handle::root(parent);
    let project = root.project(&name.to_string_lossy());
    Ok((root, project))
}

/// Builds bodies for everything on disk: containers list their entries,
/// source files are parsed with the language builder for their extension.
pub struct WorkspaceBuilder {
    pool: ParserPool,
    excludes: GlobSet,
    respect_gitignore: bool,
}

impl WorkspaceBuilder {
    pub fn new(config: &IndexerConfig) -> Result<Self> {
        Ok(WorkspaceBuilder {
            pool: create_parser_pool(config.parser_workers),
            excludes: build_excludes(config)?,
            respect_gitignore: config.respect_gitignore,
        })
    }

    fn build_container(&self, handle: &Handle, elements: &mut NewElements, ctx: &Context) -> Result<()> {
        let Some(dir) = handle.path() else {
            bail!("{} has no directory", handle);
        };
        let mut body = Body::new();
        if matches!(handle.kind(), ElementKind::Project { .. }) {
            if let Some(kind) = detect_workspace(dir) {
                body.set(&PROJECT_KIND, kind);
            }
        }
        elements.insert(handle.clone(), body);

        let workspace_root = handle.root_handle().path().map(Path::to_path_buf).unwrap_or_default();
        let mut helper = StructureHelper::new(elements);
        for (path, is_dir) in self.entries(dir)? {
            ctx.check_cancelled()?;
            let relative = path.strip_prefix(&workspace_root).unwrap_or(&path);
            if self.excludes.is_match(relative) {
                tracing::debug!("Excluding {:?}", path);
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let child = match handle.kind() {
                ElementKind::Root { .. } if is_dir => handle.project(&name),
                // Files directly in the root belong to no project.
                ElementKind::Root { .. } => continue,
                _ if is_dir => handle.folder(&name),
                _ if languages::is_supported_path(&path) => handle.source_file(&name),
                _ => continue,
            };
            helper.add_child(handle, child);
        }
        helper.complete();
        Ok(())
    }

    /// Direct entries of `dir`, sorted by name, honouring ignore files.
    fn entries(&self, dir: &Path) -> Result<Vec<(PathBuf, bool)>> {
        let walker = WalkBuilder::new(dir)
            .max_depth(Some(1))
            .hidden(true)
            .git_ignore(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut entries = Vec::new();
        for entry in walker {
            let entry = entry?;
            if entry.depth() == 0 {
                continue;
            }
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            entries.push((entry.into_path(), is_dir));
        }
        Ok(entries)
    }

    fn build_source_file(
        &self,
        file: &Handle,
        source: &SourceText,
        elements: &mut NewElements,
        ctx: &Context,
    ) -> Result<()> {
        let Some(path) = file.path() else {
            bail!("{} has no path", file);
        };
        let Some(builder) = languages::get_builder(path) else {
            bail!("No structure builder for {:?}", path);
        };

        let tree = self.pool.parse_blocking(ParseRequest {
            file_type: builder.file_type(),
            content: Arc::from(source.contents()),
        })?;
        ctx.check_cancelled()?;
        if tree.root_node().has_error() {
            tracing::debug!("Syntax errors in {:?}, building what parsed", path);
        }

        elements.insert(file.clone(), Body::new_source());
        let mut helper = StructureHelper::new(elements);
        builder.build(file, tree.root_node(), source.contents(), &mut helper)?;
        helper.complete();
        Ok(())
    }
}

impl StructureBuilder for WorkspaceBuilder {
    fn build_structure(
        &self,
        handle: &Handle,
        source: Option<&SourceText>,
        elements: &mut NewElements,
        ctx: &Context,
    ) -> Result<()> {
        ctx.check_cancelled()?;
        match handle.kind() {
            ElementKind::SourceFile { .. } => match source {
                Some(source) => self.build_source_file(handle, source, elements, ctx),
                None => bail!("No source text for {}", handle),
            },
            ElementKind::Construct(_) => bail!("{} is built with its source file", handle),
            _ => self.build_container(handle, elements, ctx),
        }
    }
}
