//! TOML configuration with defaults for every field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WdError};
use crate::netlink::route::Destination;

/// Full daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Health-check battery settings.
    pub check: CheckConfig,
    /// Failure-log settings.
    pub failure_log: FailureLogConfig,
}

/// Settings for the health-check battery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Seconds between health-check cycles.
    pub interval_secs: u64,
    /// Trivial command proving fork/exec works.
    pub exec_command: Vec<String>,
    /// Directory-listing program.
    pub list_command: String,
    /// Paths handed to `list_command`.
    pub list_paths: Vec<PathBuf>,
    /// Directory holding the scoped scratch file.
    pub scratch_dir: PathBuf,
    /// Size of each scratch write.
    pub chunk_bytes: usize,
    /// Number of scratch writes per cycle.
    pub chunk_count: usize,
    /// Pause between scratch writes, in milliseconds.
    pub chunk_pause_ms: u64,
    /// Whether the gateway reachability check runs.
    pub gateway: bool,
    /// Route lookup target; empty means "dump and take the first gateway".
    pub gateway_destination: String,
    /// Reachability command; the gateway address is appended as last argument.
    pub ping_command: Vec<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            exec_command: vec!["true".to_string()],
            list_command: "ls".to_string(),
            list_paths: ["/", "/bin", "/etc", "/usr", "/var", "/tmp"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            scratch_dir: std::env::temp_dir(),
            // Ten 200 KiB (204,800-byte) chunks: 2,048,000 bytes per cycle.
            chunk_bytes: 200 * 1024,
            chunk_count: 10,
            chunk_pause_ms: 100,
            gateway: false,
            gateway_destination: String::new(),
            ping_command: ["ping", "-c", "1", "-W", "5"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl CheckConfig {
    /// Check interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Pause between scratch writes as a [`Duration`].
    #[must_use]
    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    /// Parsed gateway lookup target; `None` selects the dump fallback.
    pub fn destination(&self) -> Result<Option<Destination>> {
        let trimmed = self.gateway_destination.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed.parse().map(Some)
    }
}

/// Settings for the boot-scoped failure log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureLogConfig {
    /// Log location; `None` disables the failure log.
    pub path: Option<PathBuf>,
    /// Diagnostic commands captured into each entry.
    pub commands: Vec<String>,
}

impl Default for FailureLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            commands: ["ps auxww", "free -m", "df -h", "dmesg"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl Config {
    /// Load from `path`, or return defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| WdError::io(path, source))?;
        Self::from_toml(&raw)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        let check = &self.check;
        if check.interval_secs == 0 {
            return Err(WdError::InvalidConfig {
                details: "check.interval_secs must be positive".to_string(),
            });
        }
        if check.chunk_bytes == 0 || check.chunk_count == 0 {
            return Err(WdError::InvalidConfig {
                details: "check.chunk_bytes and check.chunk_count must be positive".to_string(),
            });
        }
        if check.exec_command.is_empty() {
            return Err(WdError::InvalidConfig {
                details: "check.exec_command must name a program".to_string(),
            });
        }
        if check.gateway && check.ping_command.is_empty() {
            return Err(WdError::InvalidConfig {
                details: "check.ping_command must name a program when gateway is enabled"
                    .to_string(),
            });
        }
        check.destination()?;
        Ok(())
    }
}
