//! Boot-scoped failure log.
//!
//! The log holds diagnostics for a single boot. Opening it under a different
//! boot id moves the previous contents to the `.old` sibling first, so the
//! last crash of the previous boot survives one reboot.

use std::fs::{File, OpenOptions};
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::core::errors::{Result, WdError};

/// Kernel-exposed identity of the running boot.
pub const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";
/// Kernel-exposed uptime counters.
pub const UPTIME_PATH: &str = "/proc/uptime";

const BOOT_MARKER: &str = "=== lwd boot_id ";
const BOOT_MARKER_END: &str = " ===";

/// Read the current boot id.
pub fn current_boot_id() -> std::io::Result<String> {
    Ok(std::fs::read_to_string(BOOT_ID_PATH)?.trim().to_string())
}

/// `path` with its extension replaced by `old`, or with `.old` appended
/// when that would name `path` itself.
#[must_use]
pub fn rotated_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "old") {
        let mut name = path.as_os_str().to_owned();
        name.push(".old");
        return PathBuf::from(name);
    }
    path.with_extension("old")
}

/// Boot id recorded in a log's contents, if any.
#[must_use]
pub fn recorded_boot_id(contents: &str) -> Option<&str> {
    contents.lines().find_map(|line| {
        line.strip_prefix(BOOT_MARKER)
            .and_then(|rest| rest.strip_suffix(BOOT_MARKER_END))
    })
}

fn boot_marker(boot_id: &str) -> String {
    format!("{BOOT_MARKER}{boot_id}{BOOT_MARKER_END}\n")
}

/// Append-only failure log owned by the daemon for its whole lifetime.
#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    file: File,
    boot_id: String,
    uptime_path: PathBuf,
}

impl FailureLog {
    /// Open `path` for the current boot.
    pub fn open(path: &Path) -> Result<Self> {
        let boot_id = current_boot_id().map_err(|err| WdError::log_io(BOOT_ID_PATH, err))?;
        Self::open_for_boot(path, &boot_id)
    }

    /// Open `path` as the log of boot `boot_id`, rotating a log left by
    /// any other boot.
    pub fn open_for_boot(path: &Path, boot_id: &str) -> Result<Self> {
        let mut file = open_append(path)?;
        // Captured diagnostics are arbitrary bytes; only the marker lines matter.
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .map_err(|err| WdError::log_io(path, err))?;
        let contents = String::from_utf8_lossy(&raw);

        let fresh = if contents.is_empty() {
            true
        } else if recorded_boot_id(&contents) == Some(boot_id) {
            false
        } else {
            drop(file);
            let old = rotated_path(path);
            std::fs::rename(path, &old).map_err(|err| WdError::log_io(&old, err))?;
            tracing::info!(
                log = %path.display(),
                rotated = %old.display(),
                previous_boot = recorded_boot_id(&contents).unwrap_or("unknown"),
                "failure log rotated for new boot"
            );
            file = open_append(path)?;
            true
        };
        if fresh {
            file.write_all(boot_marker(boot_id).as_bytes())
                .map_err(|err| WdError::log_io(path, err))?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            boot_id: boot_id.to_string(),
            uptime_path: PathBuf::from(UPTIME_PATH),
        })
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Boot id the log was opened for.
    #[must_use]
    pub fn boot_id(&self) -> &str {
        &self.boot_id
    }

    #[cfg(test)]
    fn with_uptime_path(mut self, path: &Path) -> Self {
        self.uptime_path = path.to_path_buf();
        self
    }

    /// Swap the handle for a read-only one so every later write fails.
    #[cfg(test)]
    pub(crate) fn with_read_only_handle(mut self) -> Self {
        self.file = File::open(&self.path).expect("reopen read-only");
        self
    }

    fn line(&mut self, text: &str) -> Result<()> {
        self.file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.write_all(b"\n"))
            .map_err(|err| WdError::log_io(&self.path, err))
    }

    /// Append one entry: ctime, uptime, then the combined output of every
    /// diagnostic command. Consumes the log; the file is closed afterwards.
    pub fn write_entry(mut self, commands: &[String]) -> Result<()> {
        let ctime = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
        self.line(&format!("--- ctime {ctime}"))?;
        let uptime = std::fs::read_to_string(&self.uptime_path)
            .map_or_else(|err| format!("unavailable ({err})"), |raw| raw.trim().to_string());
        self.line(&format!("--- uptime {uptime}"))?;

        for command in commands {
            self.capture(command)?;
        }
        self.file
            .sync_all()
            .map_err(|err| WdError::log_io(&self.path, err))
    }

    fn capture(&mut self, command: &str) -> Result<()> {
        let mut argv = command.split_whitespace();
        let Some(program) = argv.next() else {
            return Ok(());
        };
        let stdout = self
            .file
            .try_clone()
            .map_err(|err| WdError::log_io(&self.path, err))?;
        let stderr = self
            .file
            .try_clone()
            .map_err(|err| WdError::log_io(&self.path, err))?;

        self.line(&format!("--- begin {command}"))?;
        let status = Command::new(program)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status();
        match status {
            Ok(status) => self.line(&format!("--- end {command} ({status})")),
            Err(err) => self.line(&format!("--- failed {command}: {err}")),
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .map_err(|err| WdError::log_io(path, err))
}
