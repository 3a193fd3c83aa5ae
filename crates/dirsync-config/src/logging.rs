//! Structured logging utilities for dirsync components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use dirsync_config::log_sync_info;
//!
//! log_sync_info!(src = %src.display(), dst = %dst.display(), "Copied");
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const SYNC: &'static str = "SYNC";
    pub const WATCH: &'static str = "WATCH";
    pub const DISPATCH: &'static str = "DISPATCH";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

// === SYNC logging macros ===

#[macro_export]
macro_rules! log_sync_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = $crate::logging::Component::SYNC, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_sync_info {
    ($($arg:tt)+) => {
        tracing::info!(component = $crate::logging::Component::SYNC, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_sync_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::SYNC, $($arg)+)
    };
}

// === WATCH logging macros ===

#[macro_export]
macro_rules! log_watch_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = $crate::logging::Component::WATCH, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_watch_info {
    ($($arg:tt)+) => {
        tracing::info!(component = $crate::logging::Component::WATCH, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_watch_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::WATCH, $($arg)+)
    };
}

// === DISPATCH logging macros ===

#[macro_export]
macro_rules! log_dispatch_error {
    ($($arg:tt)+) => {
        tracing::error!(component = $crate::logging::Component::DISPATCH, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_dispatch_warn {
    ($($arg:tt)+) => {
        tracing::warn!(component = $crate::logging::Component::DISPATCH, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_dispatch_info {
    ($($arg:tt)+) => {
        tracing::info!(component = $crate::logging::Component::DISPATCH, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_dispatch_debug {
    ($($arg:tt)+) => {
        tracing::debug!(component = $crate::logging::Component::DISPATCH, $($arg)+)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($($arg:tt)+) => {
        tracing::info!(component = $crate::logging::Component::CLI, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_cli_error {
    ($($arg:tt)+) => {
        tracing::error!(component = $crate::logging::Component::CLI, $($arg)+)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `DIRSYNC_LOG` wins over `RUST_LOG`, which wins over `level`.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("DIRSYNC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
