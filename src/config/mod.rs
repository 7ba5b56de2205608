//! Configuration management
//!
//! This module handles loading, validation, and management of the Phabulous
//! configuration. Configuration is stored in TOML format at
//! ~/.phabulous/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **conduit**: Phabricator Conduit API endpoint, credentials, retry policy
//! - **slack**: Slack bot token and message defaults
//! - **routing**: Commit-to-channel mapping rules and per-repository overrides
//!
//! # Secrets
//!
//! The Conduit API token and the Slack bot token may be omitted from the
//! file and supplied through the `PHABRICATOR_API_TOKEN` and `SLACK_TOKEN`
//! environment variables instead. The environment always wins over the file
//! so deployments can rotate credentials without touching disk.
//!
//! # Examples
//!
//! ```no_run
//! use phabulous::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Conduit: {}", config.conduit.base_url);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main configuration structure
///
/// This structure represents the complete Phabulous configuration loaded
/// from ~/.phabulous/config.toml. All sections fall back to defaults when
/// absent so a minimal file only needs the Conduit base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Conduit API configuration
    pub conduit: ConduitConfig,

    /// Slack configuration
    #[serde(default)]
    pub slack: SlackConfig,

    /// Commit routing configuration
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Conduit API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConduitConfig {
    /// Base URL of the Phabricator installation, without the /api suffix
    pub base_url: String,

    /// Conduit API token. Falls back to the PHABRICATOR_API_TOKEN env var.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum attempts for retryable failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

/// Slack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Slack bot token. Falls back to the SLACK_TOKEN env var.
    #[serde(default)]
    pub token: Option<String>,

    /// Username the bot posts as
    #[serde(default = "default_slack_username")]
    pub username: String,

    /// Channel used by the `slack test` command
    #[serde(default = "default_test_channel")]
    pub test_channel: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: None,
            username: default_slack_username(),
            test_channel: default_test_channel(),
        }
    }
}

/// Commit routing configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutingConfig {
    /// Ordered mapping rules; the first matching rule wins
    #[serde(default)]
    pub rules: Vec<ChannelRule>,

    /// Per-repository default channels, keyed by callsign
    #[serde(default)]
    pub channels: BTreeMap<String, String>,
}

/// A single commit routing rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelRule {
    /// Callsign pattern. Literal text with `*` matching any run of
    /// characters; matching is case-sensitive.
    pub pattern: String,

    /// Channel to notify when the pattern matches
    pub channel: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_slack_username() -> String {
    "Phabulous".to_string()
}

fn default_test_channel() -> String {
    "#bots".to_string()
}

impl Config {
    /// Load configuration from the default location (~/.phabulous/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default
    /// configuration pointing at a placeholder installation. Validates the
    /// configuration after loading and returns descriptive errors if
    /// validation fails.
    pub fn load_or_create() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails,
    /// or validation fails.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Returns the default configuration file path (~/.phabulous/config.toml)
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir()
            .ok_or_else(|| ConfigError::Invalid("Cannot determine home directory".to_string()))?;
        Ok(home.join(".phabulous").join("config.toml"))
    }

    /// Write a default configuration file and return the parsed result
    fn create_default(path: &Path) -> Result<Self, ConfigError> {
        let config = Config {
            core: CoreConfig::default(),
            conduit: ConduitConfig {
                base_url: "https://phabricator.example.com".to_string(),
                api_token: None,
                timeout_secs: default_timeout_secs(),
                max_retries: default_max_retries(),
                retry_base_delay_ms: default_retry_base_delay_ms(),
            },
            slack: SlackConfig::default(),
            routing: RoutingConfig::default(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(&config)
            .map_err(|e| ConfigError::Invalid(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, contents)?;

        tracing::info!("Created default configuration at {}", path.display());

        let mut config = config;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Let the environment supply or replace secrets
    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("PHABRICATOR_API_TOKEN") {
            if !token.is_empty() {
                self.conduit.api_token = Some(token);
            }
        }
        if let Ok(token) = std::env::var("SLACK_TOKEN") {
            if !token.is_empty() {
                self.slack.token = Some(token);
            }
        }
    }

    /// Validate the configuration
    ///
    /// Checks that the Conduit base URL is a usable http(s) URL and the
    /// retry policy is sane. Routing rule patterns are compiled (and thus
    /// validated) when the channel mapping is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.conduit.base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Invalid(
                "conduit.base_url must not be empty".to_string(),
            ));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "conduit.base_url must be an http(s) URL, got '{}'",
                url
            )));
        }

        if self.conduit.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "conduit.max_retries must be at least 1".to_string(),
            ));
        }

        if self.conduit.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "conduit.timeout_secs must be at least 1".to_string(),
            ));
        }

        for rule in &self.routing.rules {
            if rule.channel.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "routing rule '{}' maps to an empty channel",
                    rule.pattern
                )));
            }
        }

        Ok(())
    }
}
