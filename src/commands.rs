//! CLI command implementations

use anyhow::{Context as _, bail};
use arbor_core::{Context, ElementChangeEvent, ElementKind, Handle, Model, ModelConfig, NotificationManager};
use arbor_indexer::{SIGNATURE, VISIBILITY, WorkspaceBuilder, load_config, project_handles};
use arbor_watcher::WatcherService;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct OutlineNode {
    name: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    visibility: Option<String>,
    /// 1-based line of the element's name
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<OutlineNode>,
}

/// Config, workspace builder and project handle for the project directory `root`.
fn load_project(root: &Path) -> anyhow::Result<(ModelConfig, WorkspaceBuilder, Handle)> {
    let config = load_config(root)?;
    let builder = WorkspaceBuilder::new(&config.indexer)?;
    let (_, project) = project_handles(root)?;
    Ok((config, builder, project))
}

pub fn outline(root: PathBuf, file: PathBuf, json: bool) -> anyhow::Result<()> {
    let (config, builder, project) = load_project(&root)?;
    let model = Model::new(config, Arc::new(builder));
    let path = root
        .join(&file)
        .canonicalize()
        .with_context(|| format!("Cannot open {}", file.display()))?;
    let handle = Handle::resolve_path(&project.root_handle(), &path, false)
        .filter(|h| project.is_ancestor_of(h))
        .with_context(|| format!("{} is not inside {}", file.display(), root.display()))?;
    if !matches!(handle.kind(), ElementKind::SourceFile { .. }) {
        bail!("{} is not a source file", file.display());
    }

    let ctx = Context::new();
    let text = model.buffer(&handle, &ctx)?.text();
    tracing::debug!("Building outline of {:?}", handle);
    let node = outline_node(&model, &handle, &text, &ctx)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&node)?);
    } else {
        print_node(&node, 0);
    }
    Ok(())
}

fn outline_node(model: &Model, handle: &Handle, text: &str, ctx: &Context) -> anyhow::Result<OutlineNode> {
    let body = model.body(handle, ctx)?;
    let kind = match handle.kind() {
        ElementKind::Construct(key) => key.kind.clone(),
        other => other.category().as_str().to_string(),
    };
    let line = body
        .identifying_range()
        .map(|range| text.get(..range.offset()).unwrap_or_default().matches('\n').count() + 1);
    let children = body
        .children()
        .iter()
        .map(|child| outline_node(model, child, text, ctx))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(OutlineNode {
        name: handle.to_string(),
        kind,
        signature: body.get(&SIGNATURE).cloned(),
        visibility: body.get(&VISIBILITY).cloned(),
        line,
        children,
    })
}

fn print_node(node: &OutlineNode, depth: usize) {
    let detail = node.signature.as_deref().unwrap_or(&node.name);
    match node.line {
        Some(line) => println!("{:indent$}{:<8} {}  :{}", "", node.kind, detail, line, indent = depth * 2),
        None => println!("{:indent$}{:<8} {}", "", node.kind, detail, indent = depth * 2),
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

pub async fn watch(root: PathBuf) -> anyhow::Result<()> {
    let (config, builder, project) = load_project(&root)?;

    let notifications = Arc::new(NotificationManager::new());
    notifications.add_listener(|event: &ElementChangeEvent| {
        println!("{:?}:\n{}", event.kind, event.delta);
    });
    let model = Arc::new(Model::new(config.clone(), Arc::new(builder)).with_notifications(notifications));

    // Open the project so removed folders can be recognized.
    let children = model.children(&project, &Context::new())?;
    tracing::info!("Project {} has {} top-level entries", project, children.len());

    let mut watcher = WatcherService::new(Arc::clone(&model), &project, &config.indexer)?;
    watcher.start_watching()?;

    tokio::select! {
        result = watcher.process_events() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Stopping watcher");
            Ok(())
        }
    }
}
