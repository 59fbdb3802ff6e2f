//! Daemon subsystem: main loop, supervisor notifications, signal handling,
//! and process wiring.

pub mod loop_main;
pub mod notify;
pub mod service;
#[cfg(feature = "daemon")]
pub mod signals;
