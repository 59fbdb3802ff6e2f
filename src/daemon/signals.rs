//! Termination signals: SIGINT and SIGTERM end the process at once with
//! status 0, skipping destructors and buffered-output flushing.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

use crate::core::errors::{Result, WdError};

const TERMINATION_SIGNALS: [libc::c_int; 2] = [SIGINT, SIGTERM];

/// Register the exit-on-signal handlers.
pub fn install() -> Result<()> {
    let armed = Arc::new(AtomicBool::new(true));
    for signal in TERMINATION_SIGNALS {
        flag::register_conditional_shutdown(signal, 0, Arc::clone(&armed)).map_err(|err| {
            WdError::Runtime {
                details: format!("register shutdown on signal {signal}: {err}"),
            }
        })?;
    }
    tracing::debug!("termination signal handlers installed");
    Ok(())
}
