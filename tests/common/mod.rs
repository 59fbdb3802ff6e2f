//! Shared helpers for spawning the `lwd` binary in integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Command, ExitStatus};

/// Captured outcome of one CLI invocation.
pub struct CliResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Transcript of the run, kept for assertion messages.
    pub log_path: PathBuf,
}

/// Run `lwd` with `args` and record a transcript under the target tmpdir.
pub fn run_cli_case(case: &str, args: &[&str]) -> CliResult {
    run_cli_case_with_env(case, args, &[])
}

/// Like [`run_cli_case`], with extra environment variables.
pub fn run_cli_case_with_env(case: &str, args: &[&str], env: &[(&str, &str)]) -> CliResult {
    let mut command = Command::new(env!("CARGO_BIN_EXE_lwd"));
    command
        .args(args)
        .env_remove("NOTIFY_SOCKET")
        .env_remove("WATCHDOG_PID")
        .env_remove("WATCHDOG_USEC")
        .env("RUST_LOG", "debug");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("spawn lwd");
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let log_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("cli-cases");
    std::fs::create_dir_all(&log_dir).expect("log dir");
    let log_path = log_dir.join(format!("{case}.log"));
    let transcript = format!(
        "args: {args:?}\nstatus: {}\n--- stdout\n{stdout}\n--- stderr\n{stderr}\n",
        output.status
    );
    std::fs::write(&log_path, transcript).expect("write transcript");

    CliResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
