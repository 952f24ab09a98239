//! On-disk tests for the workspace builder

use crate::languages::python::DECORATORS;
use crate::{PROJECT_KIND, SIGNATURE, WorkspaceBuilder, WorkspaceType, detect_workspace, project_handles};
use arbor_core::{
    Buffer, BufferChange, Context, ElementChangeEvent, Handle, Model, ModelConfig, NotificationManager,
    ReconcileOptions, TextEdit, TextRange,
};
use std::fs;
use std::path::Path;
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_project() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("demo");

    fs::create_dir_all(root.join("src/utils")).unwrap();
    fs::create_dir_all(root.join("scripts")).unwrap();
    fs::create_dir_all(root.join("target/debug")).unwrap();
    fs::create_dir_all(root.join("generated")).unwrap();

    fs::write(root.join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
    fs::write(root.join(".gitignore"), "generated/\n").unwrap();
    fs::write(root.join("README.md"), "# demo\n").unwrap();
    fs::write(
        root.join("src/lib.rs"),
        "pub mod utils;\n\npub fn run() {}\n\nfn helper(n: usize) -> usize {\n    n\n}\n",
    )
    .unwrap();
    fs::write(root.join("src/utils/mod.rs"), "pub struct Config;\n").unwrap();
    fs::write(
        root.join("scripts/build.py"),
        "@task\ndef build():\n    pass\n\nclass Step:\n    def run(self):\n        pass\n",
    )
    .unwrap();
    fs::write(root.join("target/debug/out.rs"), "fn stale() {}\n").unwrap();
    fs::write(root.join("generated/gen.rs"), "fn gen() {}\n").unwrap();

    temp_dir
}

fn open_model(dir: &Path, config: ModelConfig) -> (Handle, Model) {
    let builder = WorkspaceBuilder::new(&config.indexer).unwrap();
    let (_, project) = project_handles(dir).unwrap();
    (project, Model::new(config, Arc::new(builder)))
}

fn names(handles: &[Handle]) -> Vec<String> {
    handles.iter().map(|h| h.to_string()).collect()
}

#[test]
fn test_project_structure_skips_excluded_entries() {
    let temp_dir = create_test_project();
    let (project, model) = open_model(&temp_dir.path().join("demo"), ModelConfig::default());
    let ctx = Context::new();

    let children = model.children(&project, &ctx).unwrap();
    assert_eq!(names(&children), vec!["scripts", "src"]);
    assert_eq!(
        model.body(&project, &ctx).unwrap().get(&PROJECT_KIND),
        Some(&WorkspaceType::Cargo)
    );

    let src = project.folder("src");
    assert_eq!(names(&model.children(&src, &ctx).unwrap()), vec!["lib.rs", "utils"]);
}

#[test]
fn test_detect_workspace() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    assert_eq!(detect_workspace(dir), None);

    fs::write(dir.join("package.json"), "{}\n").unwrap();
    assert_eq!(detect_workspace(dir), None);

    fs::write(dir.join("pyproject.toml"), "[project]\nname = \"demo\"\n").unwrap();
    assert_eq!(detect_workspace(dir), Some(WorkspaceType::Python));

    fs::write(dir.join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
    assert_eq!(detect_workspace(dir).map(|kind| kind.as_str()), Some("cargo"));
}

#[test]
fn test_custom_excludes() {
    let temp_dir = create_test_project();
    let mut config = ModelConfig::default();
    config.indexer.exclude = vec!["**/scripts".to_string()];
    config.indexer.respect_gitignore = false;
    let (project, model) = open_model(&temp_dir.path().join("demo"), config);

    let children = model.children(&project, &Context::new()).unwrap();
    assert_eq!(names(&children), vec!["generated", "src", "target"]);
}

#[test]
fn test_rust_file_structure() {
    let temp_dir = create_test_project();
    let (project, model) = open_model(&temp_dir.path().join("demo"), ModelConfig::default());
    let ctx = Context::new();
    let lib = project.folder("src").source_file("lib.rs");

    let children = model.children(&lib, &ctx).unwrap();
    assert_eq!(names(&children), vec!["utils", "run", "helper(usize)"]);

    let helper = lib.construct_with_params("fn", "helper", vec!["usize".to_string()]);
    let body = model.body(&helper, &ctx).unwrap();
    assert_eq!(
        body.get(&SIGNATURE).map(String::as_str),
        Some("fn helper(n: usize) -> usize")
    );
    let source = fs::read_to_string(lib.path().unwrap()).unwrap();
    let at = source.find("helper").unwrap();
    assert_eq!(body.identifying_range(), Some(TextRange::new(at, "helper".len())));

    assert_eq!(
        model.source_element_at(&lib, at + 2, None, &ctx).unwrap(),
        Some(helper)
    );
}

#[test]
fn test_python_file_structure() {
    let temp_dir = create_test_project();
    let (project, model) = open_model(&temp_dir.path().join("demo"), ModelConfig::default());
    let ctx = Context::new();
    let script = project.folder("scripts").source_file("build.py");

    assert_eq!(names(&model.children(&script, &ctx).unwrap()), vec!["build", "Step"]);
    let step = script.construct("class", "Step");
    assert_eq!(names(&model.children(&step, &ctx).unwrap()), vec!["run"]);

    let build = model.body(&script.construct("function", "build"), &ctx).unwrap();
    assert_eq!(build.get(&DECORATORS), Some(&vec!["task".to_string()]));
    assert_eq!(build.full_range().unwrap().offset(), 0);
}

#[test]
fn test_working_copy_reconcile_on_disk_file() {
    let temp_dir = create_test_project();
    let dir = temp_dir.path().join("demo");
    let config = ModelConfig::default();
    let builder = WorkspaceBuilder::new(&config.indexer).unwrap();
    let (_, project) = project_handles(&dir).unwrap();

    let notifications = Arc::new(NotificationManager::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    notifications.add_listener(move |event: &ElementChangeEvent| recorded.lock().push(event.clone()));
    let model = Model::new(config, Arc::new(builder)).with_notifications(notifications);

    let ctx = Context::new();
    let lib = project.folder("src").source_file("lib.rs");
    let buffer = Buffer::for_file(lib.path().unwrap()).unwrap();
    let guard = model.become_working_copy(&lib, &buffer, &ctx).unwrap();
    events.lock().clear();

    let text = buffer.text();
    let at = text.find("run").unwrap();
    buffer
        .apply_change(&BufferChange::new(TextEdit::replace(TextRange::new(at, 3), "start")))
        .unwrap();
    guard.reconcile(ReconcileOptions::default(), &ctx).unwrap();

    assert_eq!(
        names(&model.children(&lib, &ctx).unwrap()),
        vec!["utils", "start", "helper(usize)"]
    );
    let events = events.lock();
    assert_eq!(events.len(), 1);
    let delta = &events[0].delta;
    assert_eq!(names(&delta.added_children().map(|d| d.element().clone()).collect::<Vec<_>>()), vec!["start"]);
    assert_eq!(names(&delta.removed_children().map(|d| d.element().clone()).collect::<Vec<_>>()), vec!["run"]);

    // Saved through the buffer, since it was clean before the edit.
    assert!(fs::read_to_string(dir.join("src/lib.rs")).unwrap().contains("pub fn start()"));
}
