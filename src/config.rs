//! Configuration loading.
//!
//! Loads `./modelgate.toml` (or `$MODELGATE_CONFIG_PATH`). Environment
//! variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::records::DEFAULT_PAGE_SIZE;

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Database and catalog locations.
    pub storage: StorageConfig,
    /// Log level and optional file logging.
    pub logging: LoggingConfig,
}

impl GateConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// If the file does not exist, defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a specific TOML file, no env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config path using a custom env resolver.
    ///
    /// Checks `$MODELGATE_CONFIG_PATH` first, then `./modelgate.toml`.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("MODELGATE_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("modelgate.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Server.
        if let Some(v) = env("MODELGATE_BIND") {
            self.server.bind = v;
        } else if let Some(port) = env("PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.bind = format!("{}:{port}", self.server.host()),
                Err(_) => tracing::warn!(var = "PORT", value = %port, "ignoring invalid env override"),
            }
        }

        // Storage.
        if let Some(v) = env("MODELGATE_DATABASE") {
            self.storage.database = v;
        }
        if let Some(v) = env("MODELGATE_MODELS_DIR") {
            self.storage.models_dir = v;
        }
        if let Some(v) = env("MODELGATE_LIST_LIMIT") {
            match v.parse() {
                Ok(n) => self.storage.list_limit = n,
                Err(_) => tracing::warn!(
                    var = "MODELGATE_LIST_LIMIT",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Logging.
        if let Some(v) = env("MODELGATE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("MODELGATE_LOGS_DIR") {
            self.logging.logs_dir = Some(v);
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: GateConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

// ── Server config ───────────────────────────────────────────────

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_seconds: u64,
}

impl ServerConfig {
    /// Host part of `bind`.
    pub fn host(&self) -> &str {
        self.bind
            .rsplit_once(':')
            .map_or(self.bind.as_str(), |(host, _)| host)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4000".to_string(),
            shutdown_timeout_seconds: 10,
        }
    }
}

// ── Storage config ──────────────────────────────────────────────

/// Database and catalog locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub database: String,
    /// Directory of model definition JSON files.
    pub models_dir: String,
    /// Connection pool size.
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection.
    pub acquire_timeout_seconds: u64,
    /// Default page size for list.
    pub list_limit: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: "data/app.db".to_string(),
            models_dir: "models".to_string(),
            max_connections: 5,
            acquire_timeout_seconds: 5,
            list_limit: DEFAULT_PAGE_SIZE,
        }
    }
}

// ── Logging config ──────────────────────────────────────────────

/// Log level and optional file logging.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Tracing filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rotated JSON logs; console only when unset.
    pub logs_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            logs_dir: None,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
