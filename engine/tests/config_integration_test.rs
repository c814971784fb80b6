//! Integration tests for configuration management
//!
//! These tests verify that the Config struct can be properly loaded,
//! validated, and processed with path expansion and defaults.

use designcore_engine::config::{Config, RunAllPolicy};
use sdk::errors::ClientError;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_toml_parsing() {
    let toml_content = r#"
[core]
log_level = "debug"
export_dir = "/tmp/designcore-exports"

[backend]
base_url = "https://design.example.test/"
request_timeout_secs = 120
asset_prefix = "assets"

[generation]
model_name = "models/gemini-2.5-pro"
image_count = 6
persona = "minimalist industrial designer"

[polling]
detail_interval_ms = 1500
list_interval_secs = 10
max_consecutive_errors = 3

[workflow]
run_all_policy = "delegated"
stream_steps = true
"#;

    let config = Config::from_toml_str(toml_content).expect("config parses");

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(
        config.core.export_dir.to_str(),
        Some("/tmp/designcore-exports")
    );
    assert_eq!(config.backend.base_url, "https://design.example.test");
    assert_eq!(config.backend.asset_prefix, "/assets");
    assert_eq!(config.request_timeout(), Duration::from_secs(120));
    assert_eq!(config.generation.image_count, 6);
    assert_eq!(config.detail_poll_interval(), Duration::from_millis(1500));
    assert_eq!(config.list_poll_interval(), Duration::from_secs(10));
    assert_eq!(config.polling.max_consecutive_errors, 3);
    assert_eq!(config.workflow.run_all_policy, RunAllPolicy::Delegated);
    assert!(config.workflow.stream_steps);

    let settings = config.generation_settings();
    assert_eq!(settings.image_count, 6);
    assert_eq!(settings.persona, "minimalist industrial designer");
    assert_eq!(settings.session_credential, None);
}

#[test]
fn test_missing_file_is_created_with_defaults() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("nested").join("config.toml");

    let created = Config::load(Some(&path)).expect("default config");
    assert!(path.exists());
    assert_eq!(created.backend.base_url, "http://localhost:8000");
    assert_eq!(created.workflow.run_all_policy, RunAllPolicy::Sequential);

    // The written file loads back to the same settings
    let loaded = Config::load(Some(&path)).expect("config reloads");
    assert_eq!(loaded.backend.base_url, created.backend.base_url);
    assert_eq!(loaded.core.export_dir, created.core.export_dir);
    assert_eq!(loaded.polling.detail_interval_ms, 2000);
}

#[test]
fn test_export_dir_tilde_expansion() {
    let config = Config::from_toml_str(
        r#"
[core]
export_dir = "~/designcore/exports"
"#,
    )
    .expect("config parses");

    let export_dir = config.core.export_dir.to_str().expect("utf-8 path");
    assert!(!export_dir.starts_with('~'));
    assert!(export_dir.ends_with("designcore/exports"));
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        "[core]\nlog_level = \"verbose\"",
        "[backend]\nbase_url = \"localhost:8000\"",
        "[backend]\nrequest_timeout_secs = 0",
        "[generation]\nimage_count = 9",
        "[generation]\nimage_count = 0",
        "[generation]\nmodel_name = \"  \"",
        "[polling]\ndetail_interval_ms = 0",
        "[workflow]\nrun_all_policy = \"parallel\"",
    ];

    for case in cases {
        match Config::from_toml_str(case) {
            Err(ClientError::Config(_)) => {}
            other => panic!("Expected a config error for {:?}, got {:?}", case, other),
        }
    }
}

#[test]
fn test_unreadable_file_reports_config_error() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[backend\nbase_url = ").expect("write");

    let result = Config::load(Some(&path));
    assert!(matches!(result, Err(ClientError::Config(_))));
}
