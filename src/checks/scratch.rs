//! Scoped scratch-file write/flush/truncate cycle.
//!
//! The scratch file is a [`tempfile::NamedTempFile`], so it is unlinked when
//! the cycle returns, whether it succeeded, failed an assertion, or hit an
//! I/O error part way through.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rand::RngCore as _;
use serde::Serialize;

use crate::core::errors::{Result, WdError};

const CHECK: &str = "scratch";

/// Shape of one write cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchSpec {
    /// Directory the scratch file is created in.
    pub dir: PathBuf,
    /// Bytes per write.
    pub chunk_bytes: usize,
    /// Number of writes.
    pub chunk_count: usize,
    /// Pause between writes.
    pub pause: Duration,
}

/// Sizes observed during one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScratchReport {
    /// Total bytes handed to `write`.
    pub bytes_written: u64,
    /// File size after the first fsync.
    pub size_after_write: u64,
    /// File size after truncation; always 0 on success.
    pub size_after_truncate: u64,
}

fn io_failure(step: &str, path: &Path, err: &std::io::Error) -> WdError {
    WdError::health(CHECK, format!("{step} on {}: {err}", path.display()))
}

/// Write `chunk_count` chunks with pauses, fsync, truncate to zero, fsync.
pub fn run_write_cycle(spec: &ScratchSpec) -> Result<ScratchReport> {
    let mut scratch = tempfile::Builder::new()
        .prefix(".lwd-scratch-")
        .tempfile_in(&spec.dir)
        .map_err(|err| io_failure("create", &spec.dir, &err))?;
    let path = scratch.path().to_path_buf();

    let mut chunk = vec![0u8; spec.chunk_bytes];
    rand::rng().fill_bytes(&mut chunk);

    let mut bytes_written = 0u64;
    let file = scratch.as_file_mut();
    for index in 0..spec.chunk_count {
        if index > 0 && !spec.pause.is_zero() {
            thread::sleep(spec.pause);
        }
        file.write_all(&chunk)
            .map_err(|err| io_failure("write", &path, &err))?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().map_err(|err| io_failure("flush", &path, &err))?;
    file.sync_all()
        .map_err(|err| io_failure("fsync", &path, &err))?;
    let size_after_write = file
        .metadata()
        .map_err(|err| io_failure("stat", &path, &err))?
        .len();
    if size_after_write == 0 {
        return Err(WdError::health(
            CHECK,
            format!("{} is empty after writing {bytes_written} bytes", path.display()),
        ));
    }

    file.set_len(0)
        .map_err(|err| io_failure("truncate", &path, &err))?;
    file.sync_all()
        .map_err(|err| io_failure("fsync", &path, &err))?;
    let size_after_truncate = file
        .metadata()
        .map_err(|err| io_failure("stat", &path, &err))?
        .len();
    if size_after_truncate != 0 {
        return Err(WdError::health(
            CHECK,
            format!(
                "{} still holds {size_after_truncate} bytes after truncation",
                path.display()
            ),
        ));
    }

    Ok(ScratchReport {
        bytes_written,
        size_after_write,
        size_after_truncate,
    })
}
