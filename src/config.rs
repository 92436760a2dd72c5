//! Configuration loading and management.
//!
//! Loads configuration from `./straylight.toml` (or `$STRAYLIGHT_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Secrets are *not* configuration — they load separately through
//! [`crate::credentials`] and never appear in this struct.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::scanner::DEFAULT_MAX_SCAN_BYTES;
use crate::slack::auth::DEFAULT_REPLAY_WINDOW_SECS;
use crate::slack::client::DEFAULT_API_BASE;

/// Process configuration.
///
/// Precedence: env vars > TOML file > defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the webhook server binds in serve mode.
    pub port: u16,
    /// Directory of additional `.yar`/`.yara` rule files, compiled next to
    /// the builtin corpus at startup.
    pub rules_dir: Option<PathBuf>,
    /// Replay window for request timestamps, in seconds. `0` disables the
    /// staleness check.
    pub replay_window_secs: u64,
    /// Upper bound on scannable message size, in bytes.
    pub max_scan_bytes: usize,
    /// Slack Web API base URL. Only overridden when testing against a stub.
    pub slack_api_base: String,
    /// Directory for rotated JSON log files in serve mode.
    pub logs_dir: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            rules_dir: None,
            replay_window_secs: DEFAULT_REPLAY_WINDOW_SECS,
            max_scan_bytes: DEFAULT_MAX_SCAN_BYTES,
            slack_api_base: DEFAULT_API_BASE.to_owned(),
            logs_dir: PathBuf::from("logs"),
            log_level: "info".to_owned(),
        }
    }
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// `path` overrides the config file location; otherwise
    /// `$STRAYLIGHT_CONFIG_PATH` or `./straylight.toml` is used. A missing
    /// file is not an error — defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing config file cannot be read or
    /// parsed.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_file(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path_with(|key| std::env::var(key).ok()),
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config file path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("STRAYLIGHT_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("straylight.toml"))
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("STRAYLIGHT_PORT") {
            match v.parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!(
                    var = "STRAYLIGHT_PORT",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("STRAYLIGHT_RULES_DIR") {
            self.rules_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("STRAYLIGHT_REPLAY_WINDOW_SECS") {
            match v.parse() {
                Ok(secs) => self.replay_window_secs = secs,
                Err(_) => tracing::warn!(
                    var = "STRAYLIGHT_REPLAY_WINDOW_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("STRAYLIGHT_MAX_SCAN_BYTES") {
            match v.parse() {
                Ok(bytes) => self.max_scan_bytes = bytes,
                Err(_) => tracing::warn!(
                    var = "STRAYLIGHT_MAX_SCAN_BYTES",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("STRAYLIGHT_SLACK_API_BASE") {
            self.slack_api_base = v;
        }
        if let Some(v) = env("STRAYLIGHT_LOGS_DIR") {
            self.logs_dir = PathBuf::from(v);
        }
        if let Some(v) = env("STRAYLIGHT_LOG_LEVEL") {
            self.log_level = v;
        }
    }
}
