//! Configuration management
//!
//! This module handles loading, validation, and management of the DesignCore
//! client configuration. Configuration is stored in TOML format at
//! ~/.designcore/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, export directory
//! - **backend**: Backend base URL, request timeout, static asset prefix
//! - **generation**: Model, image count, persona, session credential
//! - **polling**: Detail and list poll intervals, error tolerance
//! - **workflow**: Run-all policy and step streaming
//!
//! # Examples
//!
//! ```no_run
//! use designcore_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Backend: {}", config.backend.base_url);
//! # Ok(())
//! # }
//! ```

use sdk::errors::ClientError;
use sdk::types::GenerationSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core client settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Generation parameters forwarded with every step
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Poll loop settings
    #[serde(default)]
    pub polling: PollingConfig,

    /// Pipeline execution settings
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Core client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory export bundles are written to (supports ~ expansion)
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the generation service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound for any single request, streamed bodies included
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Static prefix project assets are served under
    #[serde(default = "default_asset_prefix")]
    pub asset_prefix: String,
}

/// Generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Model identifier passed to the backend
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Requested number of images (1-8)
    #[serde(default = "default_image_count")]
    pub image_count: u32,

    /// Free-text persona for the generating agents
    #[serde(default)]
    pub persona: String,

    /// Optional credential for an external generation session
    #[serde(default)]
    pub session_credential: Option<String>,
}

/// Poll loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval for the actively viewed project
    #[serde(default = "default_detail_interval")]
    pub detail_interval_ms: u64,

    /// Interval for the background project list refresh
    #[serde(default = "default_list_interval")]
    pub list_interval_secs: u64,

    /// Consecutive failed fetches after which a poll loop gives up
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

/// How "run all" is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunAllPolicy {
    /// Invoke each stage in turn and wait for it
    Sequential,
    /// Submit one background run and observe it by polling
    Delegated,
}

/// Pipeline execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Policy used by run-all
    #[serde(default = "default_run_all_policy")]
    pub run_all_policy: RunAllPolicy,

    /// Stream step output instead of waiting for the buffered envelope
    #[serde(default)]
    pub stream_steps: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("~/.designcore/exports")
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_asset_prefix() -> String {
    "/projects".to_string()
}

fn default_model_name() -> String {
    "models/gemini-2.5-flash".to_string()
}

fn default_image_count() -> u32 {
    4
}

fn default_detail_interval() -> u64 {
    2000
}

fn default_list_interval() -> u64 {
    30
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_run_all_policy() -> RunAllPolicy {
    RunAllPolicy::Sequential
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            export_dir: default_export_dir(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            asset_prefix: default_asset_prefix(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            image_count: default_image_count(),
            persona: String::new(),
            session_credential: None,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            detail_interval_ms: default_detail_interval(),
            list_interval_secs: default_list_interval(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            run_all_policy: default_run_all_policy(),
            stream_steps: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    /// Load configuration from the default location (~/.designcore/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, ClientError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from `path`, or from the default location when
    /// no path is given. A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        match path {
            Some(path) if path.exists() => Self::load_from_path(path),
            Some(path) => Self::create_default(path),
            None => Self::load_or_create(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ClientError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ClientError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| ClientError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, ClientError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ClientError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let default = Self::default_config();

        let toml_string = toml::to_string_pretty(&default)
            .map_err(|e| ClientError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| ClientError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = default;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.designcore/config.toml)
    fn default_config_path() -> Result<PathBuf, ClientError> {
        let home = dirs::home_dir()
            .ok_or_else(|| ClientError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".designcore").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            backend: BackendConfig::default(),
            generation: GenerationConfig::default(),
            polling: PollingConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }

    /// Generation parameters as sent on the wire
    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            image_count: self.generation.image_count,
            persona: self.generation.persona.clone(),
            session_credential: self.generation.session_credential.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    pub fn detail_poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.detail_interval_ms)
    }

    pub fn list_poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.list_interval_secs)
    }

    /// Validate and process configuration
    ///
    /// Checks value ranges, trims a trailing slash from the base URL and
    /// expands ~ in the export directory.
    fn validate_and_process(&mut self) -> Result<(), ClientError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(ClientError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if !(self.backend.base_url.starts_with("http://")
            || self.backend.base_url.starts_with("https://"))
        {
            return Err(ClientError::Config(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.backend.base_url
            )));
        }
        while self.backend.base_url.ends_with('/') {
            self.backend.base_url.pop();
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(ClientError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !self.backend.asset_prefix.starts_with('/') {
            self.backend.asset_prefix.insert(0, '/');
        }

        if self.generation.model_name.trim().is_empty() {
            return Err(ClientError::Config("model_name must not be empty".to_string()));
        }

        if !(1..=8).contains(&self.generation.image_count) {
            return Err(ClientError::Config(
                "image_count must be between 1 and 8".to_string(),
            ));
        }

        if self.polling.detail_interval_ms == 0 || self.polling.list_interval_secs == 0 {
            return Err(ClientError::Config(
                "poll intervals must be greater than 0".to_string(),
            ));
        }

        self.core.export_dir = expand_path(&self.core.export_dir)?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, ClientError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| ClientError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| ClientError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| ClientError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert_eq!(config.polling.detail_interval_ms, 2000);
        assert_eq!(config.polling.list_interval_secs, 30);
        assert_eq!(config.workflow.run_all_policy, RunAllPolicy::Sequential);
        assert!(!config.workflow.stream_steps);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.generation.image_count, 4);
        assert_eq!(config.backend.asset_prefix, "/projects");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = Config::from_toml_str(
            r#"
[backend]
base_url = "http://example.test:8000//"
"#,
        )
        .unwrap();
        assert_eq!(config.backend.base_url, "http://example.test:8000");
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Config::from_toml_str("[core]\nlog_level = \"loud\"").is_err());
        assert!(Config::from_toml_str("[backend]\nbase_url = \"ftp://x\"").is_err());
        assert!(Config::from_toml_str("[backend]\nrequest_timeout_secs = 0").is_err());
        assert!(Config::from_toml_str("[generation]\nimage_count = 9").is_err());
        assert!(Config::from_toml_str("[polling]\ndetail_interval_ms = 0").is_err());
    }

    #[test]
    fn test_policy_parsing() {
        let config = Config::from_toml_str("[workflow]\nrun_all_policy = \"delegated\"").unwrap();
        assert_eq!(config.workflow.run_all_policy, RunAllPolicy::Delegated);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_generation_settings() {
        let mut config = Config::default_config();
        config.generation.session_credential = Some("sess".to_string());
        let settings = config.generation_settings();
        assert_eq!(settings.image_count, 4);
        assert_eq!(settings.session_credential.as_deref(), Some("sess"));
    }
}
