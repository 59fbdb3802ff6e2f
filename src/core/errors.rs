//! LWD-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, WdError>;

/// Top-level error type for the liveness watchdog.
#[derive(Debug, Error)]
pub enum WdError {
    #[error("[LWD-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[LWD-1002] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[LWD-2001] netlink transport failure in {context}: {details}")]
    Transport {
        context: &'static str,
        details: String,
    },

    #[error("[LWD-2002] netlink {query} query failed: {details}")]
    NetworkQuery {
        query: &'static str,
        details: String,
    },

    #[error("[LWD-3001] health check {check} failed: {details}")]
    HealthCheck {
        check: &'static str,
        details: String,
    },

    #[error("[LWD-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LWD-4001] failure log IO at {path}: {source}")]
    LogIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LWD-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl WdError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "LWD-1001",
            Self::ConfigParse { .. } => "LWD-1002",
            Self::Transport { .. } => "LWD-2001",
            Self::NetworkQuery { .. } => "LWD-2002",
            Self::HealthCheck { .. } => "LWD-3001",
            Self::Io { .. } => "LWD-3002",
            Self::LogIo { .. } => "LWD-4001",
            Self::Runtime { .. } => "LWD-3900",
        }
    }

    /// Whether the error can surface from a health-check cycle and should
    /// therefore be treated as a liveness failure.
    #[must_use]
    pub const fn is_health_failure(&self) -> bool {
        matches!(
            self,
            Self::HealthCheck { .. }
                | Self::NetworkQuery { .. }
                | Self::Transport { .. }
                | Self::Io { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for failure-log IO errors.
    #[must_use]
    pub fn log_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::LogIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn health(check: &'static str, details: impl Into<String>) -> Self {
        Self::HealthCheck {
            check,
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for WdError {
    fn from(value: serde_json::Error) -> Self {
        Self::Runtime {
            details: format!("serde_json: {value}"),
        }
    }
}

impl From<toml::de::Error> for WdError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
