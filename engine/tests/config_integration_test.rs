//! Integration tests for configuration management
//!
//! Config files are parsed, validated and processed with path expansion and
//! canonicalization.

use std::fs;

use tempfile::TempDir;
use warden_engine::config::Config;

fn toml_for(workspace: &std::path::Path, data_dir: &std::path::Path, extra: &str) -> String {
    format!(
        r#"
[core]
workspace = "{}"
log_level = "debug"
data_dir = "{}"

{}
"#,
        workspace.display(),
        data_dir.display(),
        extra
    )
}

#[test]
fn test_full_config_parsing() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    let contents = toml_for(
        temp.path(),
        &data_dir,
        r#"
[llm]
enabled = true
timeout_secs = 10
max_retries = 1
retry_base_delay_ms = 250
retry_max_delay_ms = 2000
api_keys_env = "WARDEN_TEST_KEYS"

[llm.gemini]
base_url = "http://localhost:9999/v1beta"
model = "gemini-1.5-flash"

[memory]
max_exchanges = 4
history_last_n = 3
long_term_file = "profile.json"

[worker]
max_concurrency = 2
tool_timeout_secs = 5
max_files = 100
max_log_files = 1
"#,
    );

    let config = Config::from_toml_str(&contents).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.core.workspace, temp.path().canonicalize().unwrap());
    assert!(data_dir.is_dir());
    assert_eq!(config.llm.max_retries, 1);
    assert_eq!(config.llm.gemini.model, "gemini-1.5-flash");
    assert_eq!(config.memory.max_exchanges, 4);
    assert_eq!(config.worker.max_files, 100);
    assert_eq!(config.long_term_store_path(), data_dir.join("profile.json"));
}

#[test]
fn test_missing_sections_use_defaults() {
    let temp = TempDir::new().unwrap();
    let contents = toml_for(temp.path(), &temp.path().join("data"), "");

    let config = Config::from_toml_str(&contents).unwrap();
    assert_eq!(config.memory.max_exchanges, 8);
    assert_eq!(config.memory.history_last_n, 5);
    assert_eq!(config.llm.max_retries, 2);
    assert_eq!(config.worker.max_concurrency, 4);
}

#[test]
fn test_invalid_values_are_rejected() {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");

    for extra in [
        "[llm]\nprovider = \"openai\"",
        "[llm]\ntemperature = 3.5",
        "[llm]\ntimeout_secs = 0",
        "[llm]\nretry_base_delay_ms = 5000\nretry_max_delay_ms = 100",
        "[memory]\nmax_exchanges = 0",
        "[memory]\nlong_term_file = \"../escape.json\"",
        "[worker]\nmax_concurrency = 0",
    ] {
        let contents = toml_for(temp.path(), &data_dir, extra);
        assert!(
            Config::from_toml_str(&contents).is_err(),
            "expected rejection for {:?}",
            extra
        );
    }
}

#[test]
fn test_missing_workspace_is_rejected() {
    let temp = TempDir::new().unwrap();
    let contents = toml_for(&temp.path().join("nope"), &temp.path().join("data"), "");
    assert!(Config::from_toml_str(&contents).is_err());
}

#[test]
fn test_load_from_path() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, toml_for(temp.path(), &temp.path().join("data"), "")).unwrap();

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.core.log_level, "debug");

    assert!(Config::load_from_path(&temp.path().join("missing.toml")).is_err());
}
