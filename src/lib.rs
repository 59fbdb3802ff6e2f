//! Liveness watchdog: periodically proves that the host can still create
//! processes, write to its filesystem, and reach its gateway, and feeds a
//! supervisor watchdog while it can.

pub mod checks;
#[cfg(feature = "cli")]
pub mod cli_app;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod netlink;
