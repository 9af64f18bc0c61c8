//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - The registered identity used for checkouts
//! - Sync timing (watcher debounce, self-write window, retry delays)
//! - Diagnostics log filter
//!
//! Configuration is stored at `~/.config/teamcollection/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

/// Who the user is, for lock ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Email address; empty means the user has not registered.
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub surname: String,
    /// Overrides the detected machine name.
    #[serde(default)]
    pub machine: Option<String>,
}

/// Timing of the change-notification pipeline, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
    #[serde(default = "default_own_write_window_ms")]
    pub own_write_window_ms: u64,
    #[serde(default = "default_create_suppress_ms")]
    pub create_suppress_ms: u64,
    #[serde(default = "default_delete_settle_ms")]
    pub delete_settle_ms: u64,
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
}

/// Diagnostics logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/teamcollection/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_watch_debounce_ms() -> u64 {
    100
}
fn default_own_write_window_ms() -> u64 {
    2000
}
fn default_create_suppress_ms() -> u64 {
    1000
}
fn default_delete_settle_ms() -> u64 {
    5000
}
fn default_retry_ms() -> u64 {
    2000
}
fn default_idle_interval_ms() -> u64 {
    250
}
fn default_log_filter() -> String {
    "warn".into()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            first_name: String::new(),
            surname: String::new(),
            machine: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watch_debounce_ms: default_watch_debounce_ms(),
            own_write_window_ms: default_own_write_window_ms(),
            create_suppress_ms: default_create_suppress_ms(),
            delete_settle_ms: default_delete_settle_ms(),
            retry_ms: default_retry_ms(),
            idle_interval_ms: default_idle_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl SyncConfig {
    pub fn watch_debounce(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.watch_debounce_ms as i64)
    }

    pub fn own_write_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.own_write_window_ms as i64)
    }

    pub fn create_suppress(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.create_suppress_ms as i64)
    }

    pub fn delete_settle(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.delete_settle_ms as i64)
    }

    /// Never zero, so a requeued change is not ready again at once.
    pub fn retry(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.retry_ms.max(1) as i64)
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err("config key is empty".into());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| format!("unknown config key: {key}"))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| format!("unknown config key: {key}"))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(value.parse::<bool>()?),
                    serde_json::Value::Number(_) => {
                        let n = value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                            key: key.to_string(),
                            message: format!("cannot parse '{value}' as number"),
                        })?;
                        serde_json::Value::Number(n.into())
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value)?
                    }
                    // Strings, and optional values currently unset.
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| format!("unknown config key: {key}"))?;
        }

        Err(format!("unknown config key: {key}").into())
    }

    fn path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from(&Self::path()?)
    }

    /// Load from a specific file, writing defaults there when it is absent.
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content)
                    .map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving. Returns error if key is unknown.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json)?;
        Ok(())
    }

    /// Set a config value by key and save. Returns error if key is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.apply(key, value)?;
        self.save()?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
