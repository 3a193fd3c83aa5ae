//! Integration tests for dirsync-config
//!
//! These tests verify the config loading pipeline with real file system operations.

use dirsync_config::{CompareMode, Config, LogLevel};
use tempfile::tempdir;

/// Explicit config file is read and parsed
#[test]
fn test_load_explicit_config_file() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("dirsync.toml");

    let config_content = r#"
[sync]
compare = "content-hash"
copy_buffer_size = 8192
ignore_patterns = [".git", "*.tmp"]

[watch]
max_watches = 128

[log]
level = "warn"
"#;
    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(Some(&config_path)).unwrap();

    assert_eq!(config.sync.compare, CompareMode::ContentHash);
    assert_eq!(config.sync.copy_buffer_size, 8192);
    assert_eq!(config.sync.ignore_patterns, vec![".git", "*.tmp"]);
    assert_eq!(config.watch.max_watches, Some(128));
    assert_eq!(config.log.level, LogLevel::Warn);
}

/// A missing explicit config is an error, not silently ignored
#[test]
fn test_missing_explicit_config_fails() {
    let temp = tempdir().unwrap();
    assert!(Config::load(Some(&temp.path().join("absent.toml"))).is_err());
}

/// Malformed TOML surfaces as a parse error
#[test]
fn test_malformed_config_fails() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("bad.toml");
    std::fs::write(&config_path, "[sync\ncompare = ").unwrap();

    let err = Config::load(Some(&config_path)).unwrap_err();
    assert!(matches!(err, dirsync_config::ConfigError::Toml(_)));
}

/// Unknown compare modes are rejected at parse time
#[test]
fn test_unknown_compare_mode_rejected() {
    let result = Config::from_toml_str("[sync]\ncompare = \"md5\"\n");
    assert!(result.is_err());
}

/// Default config written to disk loads back identically
#[test]
fn test_config_full_roundtrip_with_all_sections() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");
    std::fs::write(&config_path, Config::default_toml()).unwrap();

    let contents = std::fs::read_to_string(&config_path).unwrap();
    let loaded: Config = toml::from_str(&contents).unwrap();
    let original = Config::default();

    assert_eq!(original.sync.compare, loaded.sync.compare);
    assert_eq!(original.sync.copy_buffer_size, loaded.sync.copy_buffer_size);
    assert_eq!(original.watch.max_watches, loaded.watch.max_watches);
    assert_eq!(original.log.level, loaded.log.level);
}
