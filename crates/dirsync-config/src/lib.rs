//! # dirsync-config
//!
//! Configuration management for dirsync.
//!
//! Loads configuration from:
//! 1. `~/.dirsync/config.toml` (global)
//! 2. An explicit `--config` file (overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

pub use logging::LogLevel;

/// Default copy buffer: 64 KiB
pub const DEFAULT_COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load config from the global location, then `explicit` if given.
    ///
    /// A missing global file is fine; a missing explicit file is an error.
    /// Files are layered key by key: any key present in a later file wins,
    /// even when it spells out the default.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();

        // 1. Load global config (~/.dirsync/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                layers.push(read_table(&global_path)?);
            }
        }

        // 2. Explicit config file overrides global
        if let Some(path) = explicit {
            debug!("Loading config from {:?}", path);
            layers.push(read_table(path)?);
        }

        let mut config = Self::from_layers(layers)?;

        // 3. Apply environment variable overrides
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Overlay parsed TOML tables in order, then deserialize the result.
    fn from_layers(layers: impl IntoIterator<Item = toml::Table>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        for layer in layers {
            overlay(&mut merged, layer);
        }
        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Global config path: ~/.dirsync/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".dirsync/config.toml"))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(mode) = lookup("DIRSYNC_COMPARE") {
            self.sync.compare = mode.parse()?;
        }
        if let Some(max) = lookup("DIRSYNC_MAX_WATCHES") {
            let n = max.parse().map_err(|_| ConfigError::Invalid {
                key: "DIRSYNC_MAX_WATCHES",
                value: max.clone(),
            })?;
            self.watch.max_watches = Some(n);
        }
        if let Some(size) = lookup("DIRSYNC_COPY_BUFFER") {
            self.sync.copy_buffer_size = size.parse().map_err(|_| ConfigError::Invalid {
                key: "DIRSYNC_COPY_BUFFER",
                value: size.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.copy_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                key: "sync.copy_buffer_size",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    Ok(std::fs::read_to_string(path)?.parse::<toml::Table>()?)
}

/// Merge `top` into `base`; nested tables merge, everything else replaces.
fn overlay(base: &mut toml::Table, top: toml::Table) {
    for (key, value) in top {
        if let (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) =
            (base.get_mut(&key), &value)
        {
            overlay(existing, incoming.clone());
            continue;
        }
        base.insert(key, value);
    }
}

/// How two regular files are compared before deciding to copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMode {
    /// Size and whole-second modification time
    #[default]
    SizeMtime,
    /// BLAKE3 digest of the contents when sizes match
    ContentHash,
}

impl FromStr for CompareMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "size-mtime" => Ok(CompareMode::SizeMtime),
            "content-hash" => Ok(CompareMode::ContentHash),
            other => Err(ConfigError::Invalid {
                key: "compare",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareMode::SizeMtime => f.write_str("size-mtime"),
            CompareMode::ContentHash => f.write_str("content-hash"),
        }
    }
}

/// Tree synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub compare: CompareMode,
    /// Read buffer used when streaming a file copy
    pub copy_buffer_size: usize,
    /// Entries matching these are neither mirrored nor watched
    pub ignore_patterns: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            compare: CompareMode::default(),
            copy_buffer_size: DEFAULT_COPY_BUFFER,
            ignore_patterns: Vec::new(),
        }
    }
}

/// Change-notification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Upper bound on directory subscriptions (None = unbounded)
    pub max_watches: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sync.compare, CompareMode::SizeMtime);
        assert_eq!(config.sync.copy_buffer_size, DEFAULT_COPY_BUFFER);
        assert!(config.watch.max_watches.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[sync]"));
        assert!(toml_str.contains("compare = \"size-mtime\""));
        assert!(toml_str.contains("[log]"));
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::from_toml_str(
            r#"
[sync]
compare = "content-hash"
ignore_patterns = [".git", "*.swp"]

[watch]
max_watches = 8

[log]
level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.sync.compare, CompareMode::ContentHash);
        assert_eq!(config.sync.ignore_patterns, vec![".git", "*.swp"]);
        assert_eq!(config.watch.max_watches, Some(8));
        assert_eq!(config.log.level, LogLevel::Debug);
        // Unset keys keep their defaults
        assert_eq!(config.sync.copy_buffer_size, DEFAULT_COPY_BUFFER);
    }

    fn table(text: &str) -> toml::Table {
        text.parse().unwrap()
    }

    #[test]
    fn test_layers_keep_unset_values() {
        let config = Config::from_layers([
            table("[watch]\nmax_watches = 4\n"),
            table("[sync]\ncompare = \"content-hash\"\n"),
        ])
        .unwrap();
        assert_eq!(config.watch.max_watches, Some(4));
        assert_eq!(config.sync.compare, CompareMode::ContentHash);
    }

    #[test]
    fn test_later_layer_can_restore_default() {
        let config = Config::from_layers([
            table("[sync]\ncompare = \"content-hash\"\nignore_patterns = [\".git\"]\n[log]\nlevel = \"debug\"\n"),
            table("[sync]\ncompare = \"size-mtime\"\nignore_patterns = []\n[log]\nlevel = \"info\"\n"),
        ])
        .unwrap();
        assert_eq!(config.sync.compare, CompareMode::SizeMtime);
        assert!(config.sync.ignore_patterns.is_empty());
        assert_eq!(config.log.level, LogLevel::Info);
    }

    #[test]
    fn test_no_layers_is_default() {
        let config = Config::from_layers(Vec::new()).unwrap();
        assert_eq!(config.sync.copy_buffer_size, DEFAULT_COPY_BUFFER);
        assert_eq!(config.watch.max_watches, None);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DIRSYNC_COMPARE", "content-hash"),
            ("DIRSYNC_MAX_WATCHES", "16"),
            ("DIRSYNC_COPY_BUFFER", "4096"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.sync.compare, CompareMode::ContentHash);
        assert_eq!(config.watch.max_watches, Some(16));
        assert_eq!(config.sync.copy_buffer_size, 4096);
    }

    #[test]
    fn test_bad_env_override_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|k| (k == "DIRSYNC_MAX_WATCHES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DIRSYNC_MAX_WATCHES", .. }));
    }

    #[test]
    fn test_zero_buffer_invalid() {
        let config = Config::from_toml_str("[sync]\ncopy_buffer_size = 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
