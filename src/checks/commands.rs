//! Subprocess checks: spawn, wait, and judge by exit status.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::core::errors::{Result, WdError};

/// Run `argv` with all standard streams detached; any spawn failure or
/// non-zero exit fails `check`.
pub fn run_quiet<S: AsRef<str>>(check: &'static str, argv: &[S]) -> Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Err(WdError::health(check, "empty command"));
    };
    let rendered = argv
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ");
    let status = Command::new(program.as_ref())
        .args(args.iter().map(AsRef::as_ref))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|err| WdError::health(check, format!("cannot spawn `{rendered}`: {err}")))?;
    if !status.success() {
        return Err(WdError::health(
            check,
            format!("`{rendered}` exited with {status}"),
        ));
    }
    tracing::trace!(check, command = %rendered, "command succeeded");
    Ok(())
}

/// List `paths` with `program`, discarding the output.
pub fn list_paths(program: &str, paths: &[impl AsRef<Path>]) -> Result<()> {
    let mut argv = vec![program.to_string()];
    argv.extend(
        paths
            .iter()
            .map(|path| path.as_ref().display().to_string()),
    );
    run_quiet("listing", &argv)
}
