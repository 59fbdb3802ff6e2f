//! Process wiring for `lwd run`: failure log, watchdog cadence, notifier,
//! health-check runner, and the main loop.

use std::sync::atomic::AtomicBool;

use super::loop_main::{Cadence, Scheduler, SystemClock};
use super::notify::{SocketNotifier, watchdog_interval_from_env};
use crate::checks::HealthCheckRunner;
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::logger::faillog::FailureLog;

/// Open the failure log, reporting but tolerating failure.
#[must_use]
pub fn open_failure_log(config: &Config) -> Option<FailureLog> {
    let path = config.failure_log.path.as_deref()?;
    match FailureLog::open(path) {
        Ok(log) => {
            tracing::info!(log = %path.display(), boot_id = log.boot_id(), "failure log ready");
            Some(log)
        }
        Err(err) => {
            tracing::warn!(error = %err, "failure log unavailable; continuing without it");
            None
        }
    }
}

/// Run the daemon until a health check fails or `stop` is raised.
pub fn run_daemon(config: &Config, stop: &AtomicBool) -> Result<()> {
    config.validate()?;

    let heartbeat = match watchdog_interval_from_env() {
        Ok(interval) => Some(interval),
        Err(reason) => {
            tracing::warn!(%reason, "watchdog heartbeat disabled");
            None
        }
    };
    let notifier = SocketNotifier::from_env().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "supervisor socket unusable; notifications disabled");
        SocketNotifier::disabled()
    });
    let runner = HealthCheckRunner::from_config(config.check.clone())?;
    let cadence = Cadence {
        check_interval: config.check.interval(),
        heartbeat,
    };

    let mut scheduler = Scheduler::new(SystemClock, notifier, runner, cadence)
        .with_failure_log(open_failure_log(config), config.failure_log.commands.clone());
    tracing::info!(
        gateway = config.check.gateway,
        cadence = %cadence.describe(),
        "liveness watchdog starting"
    );
    scheduler.announce();
    scheduler.run(stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritable_failure_log_is_tolerated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.failure_log.path = Some(dir.path().join("missing/dir/fail.log"));
        assert!(open_failure_log(&config).is_none());
    }

    #[test]
    fn no_failure_log_configured() {
        assert!(open_failure_log(&Config::default()).is_none());
    }

    #[test]
    fn invalid_config_is_rejected_before_start() {
        let mut config = Config::default();
        config.check.interval_secs = 0;
        let stop = AtomicBool::new(true);
        let err = run_daemon(&config, &stop).expect_err("invalid");
        assert_eq!(err.code(), "LWD-1001");
    }

    #[test]
    fn stopped_daemon_exits_cleanly() {
        let stop = AtomicBool::new(true);
        run_daemon(&Config::default(), &stop).expect("returns immediately");
    }
}
