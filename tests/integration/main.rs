//! Integration tests for Arbor
//!
//! These tests verify that the model, the indexer and the watcher work together.

use arbor_core::{
    Buffer, BufferChange, ChangeEventKind, Context, DeltaFlags, ElementChangeEvent, Handle, Model, NotificationManager,
    ReconcileOptions, TextEdit, TextRange,
};
use arbor_indexer::{WorkspaceBuilder, load_config, project_handles};
use arbor_watcher::{DeltaProcessor, WatchEvent};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

const LIB_RS: &str = "pub struct Point;\n\nimpl Point {\n    pub fn new() -> Self {\n        Point\n    }\n}\n\npub fn run() {}\n";

fn create_project() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("demo");
    fs::create_dir_all(root.join("src")).unwrap();
    fs::create_dir_all(root.join("scripts")).unwrap();
    fs::write(root.join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
    fs::write(root.join("src/lib.rs"), LIB_RS).unwrap();
    fs::write(root.join("scripts/build.py"), "def build():\n    pass\n").unwrap();
    (temp_dir, root)
}

fn open_model(dir: &Path) -> (Handle, Model) {
    let config = load_config(dir).unwrap();
    let builder = WorkspaceBuilder::new(&config.indexer).unwrap();
    let (_, project) = project_handles(dir).unwrap();
    (project, Model::new(config, Arc::new(builder)))
}

fn names(handles: &[Handle]) -> Vec<String> {
    handles.iter().map(|h| h.to_string()).collect()
}

/// Test that the CLI can be invoked
#[test]
fn test_cli_invocation() {
    let output = Command::new(env!("CARGO_BIN_EXE_arbor"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("arbor"));
    assert!(stdout.contains("outline"));
    assert!(stdout.contains("watch"));
}

#[test]
fn test_cli_outline_json() {
    let (_temp_dir, root) = create_project();
    let output = Command::new(env!("CARGO_BIN_EXE_arbor"))
        .arg("--root")
        .arg(&root)
        .args(["outline", "src/lib.rs", "--json"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let outline: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outline["name"], "lib.rs");
    assert_eq!(outline["kind"], "source_file");

    let children = outline["children"].as_array().unwrap();
    assert_eq!(children.len(), 3);
    assert_eq!(children[0]["name"], "Point");
    assert_eq!(children[0]["kind"], "struct");
    assert_eq!(children[0]["line"], 1);
    assert_eq!(children[1]["kind"], "impl");
    assert_eq!(children[1]["line"], 3);

    let new = &children[1]["children"][0];
    assert_eq!(new["name"], "new");
    assert_eq!(new["signature"], "pub fn new() -> Self");
    assert_eq!(new["visibility"], "pub");
    assert_eq!(new["line"], 4);
}

#[test]
fn test_cli_outline_rejects_outside_file() {
    let (temp_dir, root) = create_project();
    fs::write(temp_dir.path().join("stray.rs"), "fn stray() {}\n").unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_arbor"))
        .arg("--root")
        .arg(&root)
        .args(["outline", "../stray.rs"])
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
}

#[test]
fn test_config_file_excludes() {
    let (_temp_dir, root) = create_project();
    fs::write(root.join("arbor.toml"), "[indexer]\nexclude = [\"**/scripts\"]\n").unwrap();

    let (project, model) = open_model(&root);
    assert_eq!(names(&model.children(&project, &Context::new()).unwrap()), vec!["src"]);
}

/// Edit a working copy, reconcile it, then change the file on disk underneath it.
#[test]
fn test_working_copy_with_external_changes() {
    let (_temp_dir, root) = create_project();
    let (project, model) = open_model(&root);

    let notifications = Arc::new(NotificationManager::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    notifications.add_listener(move |event: &ElementChangeEvent| recorded.lock().push(event.clone()));
    let model = Arc::new(model.with_notifications(notifications));
    let mut processor = DeltaProcessor::new(model.clone(), project.root_handle());

    let ctx = Context::new();
    let lib = project.folder("src").source_file("lib.rs");
    let lib_path = lib.path().unwrap().to_path_buf();
    let buffer = Buffer::for_file(&lib_path).unwrap();
    let guard = model.become_working_copy(&lib, &buffer, &ctx).unwrap();
    events.lock().clear();

    let at = LIB_RS.rfind("run").unwrap();
    buffer
        .apply_change(&BufferChange::new(TextEdit::replace(TextRange::new(at, 3), "start")))
        .unwrap();
    assert!(guard.needs_reconciling());
    guard.reconcile(ReconcileOptions::default(), &ctx).unwrap();
    assert!(!guard.needs_reconciling());
    assert_eq!(names(&model.children(&lib, &ctx).unwrap()), vec!["Point", "Point", "start"]);

    fs::write(&lib_path, "pub fn external() {}\n").unwrap();
    processor.process(&WatchEvent::Modified(lib_path.clone()));
    let delta = processor.flush().unwrap();
    assert_eq!(delta.find(&lib).unwrap().flags(), DeltaFlags::UNDERLYING_RESOURCE);
    // The working copy still shows its buffer.
    assert_eq!(names(&model.children(&lib, &ctx).unwrap()), vec!["Point", "Point", "start"]);

    assert!(guard.discard().unwrap());
    let events = events.lock();
    let kinds: Vec<ChangeEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeEventKind::PostReconcile,
            ChangeEventKind::PostChange,
            ChangeEventKind::PostChange
        ]
    );
    let mode_change = events[2].delta.find(&lib).unwrap();
    assert!(mode_change.flags().contains(DeltaFlags::WORKING_COPY));
}
