//! Built-in capabilities against a real directory tree

use std::fs;

use sdk::{ToolError, ToolInput};
use serde_json::json;
use tempfile::TempDir;
use warden_engine::fs_guard::FileSystemGuard;
use warden_engine::tools::{names, ScanSettings, ToolRegistry};


fn repo() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("src/api")).unwrap();
    fs::create_dir_all(root.join("node_modules/left-pad")).unwrap();
    fs::write(
        root.join("src/lib.rs"),
        "mod api;\nuse serde::Serialize;\n\npub fn run(x: u32) -> u32 {\n    if x > 1 && x < 10 { x } else { 0 }\n}\n",
    )
    .unwrap();
    fs::write(root.join("src/api/mod.rs"), "use crate::db;\npub fn handler() {}\n").unwrap();
    fs::write(root.join("src/db.rs"), "pub fn connect() {}\n").unwrap();
    fs::write(root.join("node_modules/left-pad/index.js"), "module.exports = 1;\n").unwrap();
    fs::write(
        root.join("Cargo.toml"),
        "[package]\nname = \"demo\"\n\n[dependencies]\nserde = \"1\"\ntokio = { version = \"1\", features = [\"full\"] }\n",
    )
    .unwrap();
    fs::write(root.join(".env"), "SECRET=1\n").unwrap();
    temp
}

#[test]
fn test_every_builtin_is_declared_read_only() {
    let registry = ToolRegistry::with_builtins(ScanSettings::default());
    assert_eq!(registry.len(), 14);

    for descriptor in registry.descriptors() {
        assert!(descriptor.read_only, "{} is not read-only", descriptor.name);
        assert!(!descriptor.description.is_empty());
        assert_eq!(descriptor.input_schema["type"], "object");
    }

    let value = serde_json::to_value(&registry.descriptors()[0]).unwrap();
    assert!(value.get("readOnly").is_some());
    assert!(value.get("inputSchema").is_some());
}

#[tokio::test]
async fn test_directory_tree_skips_vendored_and_denied_paths() {
    let temp = repo();
    let registry = ToolRegistry::with_builtins(ScanSettings::default());
    let tree = registry.get(names::DIRECTORY_TREE).unwrap();

    let output = tree.invoke(ToolInput::new(temp.path())).await.unwrap();
    let rendered = output.data.to_string();

    assert!(!rendered.contains("node_modules"));
    assert!(!rendered.contains(".env"));
    assert_eq!(output.data["file_count"], 4);
    assert_eq!(output.data["extensions"]["rs"], 3);
}

#[tokio::test]
async fn test_rust_dependency_graph_resolves_crate_paths() {
    let temp = repo();
    let registry = ToolRegistry::with_builtins(ScanSettings::default());
    let graph = registry.get(names::DEPENDENCY_GRAPH).unwrap();

    let output = graph.invoke(ToolInput::new(temp.path())).await.unwrap();
    let edges = output.data["edges"].as_array().unwrap();

    assert!(edges.contains(&json!({ "from": "crate", "to": "api" })));
    assert!(edges.contains(&json!({ "from": "api", "to": "db" })));
    assert_eq!(output.data["external"]["serde"], 1);
}

#[tokio::test]
async fn test_cargo_manifest_is_listed() {
    let temp = repo();
    let registry = ToolRegistry::with_builtins(ScanSettings::default());
    let deps = registry.get(names::LIST_DEPENDENCIES).unwrap();

    let output = deps.invoke(ToolInput::new(temp.path())).await.unwrap();
    let manifest = &output.data["manifests"][0];

    assert_eq!(manifest["ecosystem"], "cargo");
    assert_eq!(output.data["total_dependencies"], 2);
    assert!(manifest["dependencies"]
        .as_array()
        .unwrap()
        .contains(&json!({ "name": "serde", "spec": "1", "kind": "normal" })));
}

#[tokio::test]
async fn test_reads_are_confined_to_the_repository() {
    let temp = repo();
    let registry = ToolRegistry::with_builtins(ScanSettings::default());
    let read = registry.get(names::READ_FILE).unwrap();

    for target in ["../outside.txt", ".env", "/etc/passwd"] {
        let err = read
            .invoke(ToolInput::new(temp.path()).with_targets(vec![target.to_string()]))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ToolError::PathRejected(_)),
            "{} was not rejected: {:?}",
            target,
            err
        );
    }

    let ok = read
        .invoke(ToolInput::new(temp.path()).with_targets(vec!["src/db.rs".to_string()]))
        .await
        .unwrap();
    assert_eq!(ok.data["path"], "src/db.rs");
}

#[test]
fn test_guard_denies_credentials_inside_workspace() {
    let temp = repo();
    let guard = FileSystemGuard::new(temp.path()).unwrap();

    assert!(guard.resolve("src/lib.rs").is_ok());
    assert!(guard.resolve(".env").is_err());
    assert!(guard.resolve("../").is_err());
    assert!(guard.is_denied(&temp.path().join(".ssh/id_rsa")));
}

#[tokio::test]
async fn test_quality_scanners_and_docs_share_the_guarded_walk() {
    let temp = repo();
    let registry = ToolRegistry::with_builtins(ScanSettings::default());

    let dead = registry
        .get(names::DETECT_DEAD_CODE)
        .unwrap()
        .invoke(ToolInput::new(temp.path()))
        .await
        .unwrap();
    let unused: Vec<&str> = dead.data["unused_functions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["name"].as_str())
        .collect();
    assert_eq!(unused, vec!["handler", "connect"]);
    assert_eq!(dead.data["file_count"], 3);

    let docs = registry
        .get(names::GENERATE_DOCS)
        .unwrap()
        .invoke(ToolInput::new(temp.path()))
        .await
        .unwrap();
    let content = docs.data["content"].as_str().unwrap();
    assert!(content.contains("- `src/api/mod.rs` (rust, 2 lines)"));
    assert!(!content.contains("node_modules"));
    assert!(!content.contains(".env"));
}
