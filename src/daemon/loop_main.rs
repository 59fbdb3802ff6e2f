//! Main loop: interleaves health-check cycles with watchdog heartbeats.
//!
//! Two deadlines are tracked on a monotonic clock. Each iteration fires
//! whichever is due, recomputes it from a fresh clock reading, and sleeps
//! until the earlier of the two. The first check and the first heartbeat
//! fire immediately. A failing check is recorded in the failure log (best
//! effort) and returned, which ends the daemon.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::notify::{Notification, SupervisorNotifier};
use crate::checks::HealthCheck;
use crate::core::errors::{Result, WdError};
use crate::logger::faillog::FailureLog;

/// Monotonic time source.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;
    /// Block for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// Real clock backed by [`Instant`] and [`thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Next-fire deadlines, mutated only by [`Scheduler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    /// When the next health-check cycle is due.
    pub next_check: Instant,
    /// When the next heartbeat is due; `None` when heartbeats are off.
    pub next_watchdog: Option<Instant>,
}

impl ScheduleState {
    /// Earliest pending deadline.
    #[must_use]
    pub fn wake_at(&self) -> Instant {
        self.next_watchdog
            .map_or(self.next_check, |watchdog| watchdog.min(self.next_check))
    }
}

/// Intervals driving the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    /// Gap between the end of one cycle and the start of the next.
    pub check_interval: Duration,
    /// Heartbeat interval; `None` disables heartbeats.
    pub heartbeat: Option<Duration>,
}

impl Cadence {
    /// One-line summary suitable for `STATUS=`.
    #[must_use]
    pub fn describe(&self) -> String {
        let heartbeat = self.heartbeat.map_or_else(
            || "watchdog heartbeat disabled".to_string(),
            |hb| format!("watchdog heartbeat every {}ms", hb.as_millis()),
        );
        format!(
            "health checks every {}s, {heartbeat}",
            self.check_interval.as_secs()
        )
    }
}

/// The dual-deadline loop.
pub struct Scheduler<C, N, H> {
    clock: C,
    notifier: N,
    checks: H,
    cadence: Cadence,
    state: ScheduleState,
    fail_log: Option<FailureLog>,
    diagnostics: Vec<String>,
    cycles: u64,
}

impl<C: Clock, N: SupervisorNotifier, H: HealthCheck> Scheduler<C, N, H> {
    /// Scheduler with both deadlines set to now.
    #[must_use]
    pub fn new(clock: C, notifier: N, checks: H, cadence: Cadence) -> Self {
        let now = clock.now();
        Self {
            clock,
            notifier,
            checks,
            cadence,
            state: ScheduleState {
                next_check: now,
                next_watchdog: cadence.heartbeat.map(|_| now),
            },
            fail_log: None,
            diagnostics: Vec::new(),
            cycles: 0,
        }
    }

    /// Attach the failure log written when a check fails.
    #[must_use]
    pub fn with_failure_log(mut self, log: Option<FailureLog>, diagnostics: Vec<String>) -> Self {
        self.fail_log = log;
        self.diagnostics = diagnostics;
        self
    }

    /// Current deadlines.
    #[must_use]
    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Completed health-check cycles.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Send `READY=1` and a `STATUS=` line describing the cadence.
    pub fn announce(&mut self) {
        self.send(&Notification::Ready);
        self.send(&Notification::Status(self.cadence.describe()));
    }

    fn send(&mut self, notification: &Notification) {
        if let Err(err) = self.notifier.notify(notification) {
            tracing::warn!(error = %err, "supervisor notification failed");
        }
    }

    /// One loop iteration. Returns how long it slept.
    pub fn tick(&mut self) -> Result<Duration> {
        if self.clock.now() >= self.state.next_check {
            if let Err(err) = self.checks.run_checks() {
                self.record_failure(&err);
                return Err(err);
            }
            self.cycles += 1;
            self.state.next_check = self.clock.now() + self.cadence.check_interval;
            tracing::debug!(cycle = self.cycles, "health check cycle passed");
        }

        if let (Some(heartbeat), Some(due)) = (self.cadence.heartbeat, self.state.next_watchdog) {
            let now = self.clock.now();
            if now >= due {
                self.send(&Notification::Watchdog);
                self.state.next_watchdog = Some(now + heartbeat);
            }
        }

        let delay = self
            .state
            .wake_at()
            .saturating_duration_since(self.clock.now());
        if !delay.is_zero() {
            self.clock.sleep(delay);
        }
        Ok(delay)
    }

    /// Loop until `stop` is raised or a check fails.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::Relaxed) {
            self.tick()?;
        }
        tracing::info!(cycles = self.cycles, "scheduler stopped");
        Ok(())
    }

    fn record_failure(&mut self, err: &WdError) {
        tracing::error!(error = %err, code = err.code(), "health check failed");
        let Some(log) = self.fail_log.take() else {
            return;
        };
        let path = log.path().to_path_buf();
        match log.write_entry(&self.diagnostics) {
            Ok(()) => tracing::info!(log = %path.display(), "failure recorded"),
            Err(log_err) => {
                tracing::warn!(error = %log_err, "could not write failure log");
            }
        }
    }
}
