//! Health-check battery: fork/exec, directory listing, scratch-file write
//! cycle, and optional gateway reachability.
//!
//! Checks run in that fixed order and the first failure aborts the cycle;
//! the error is returned to the caller untouched.

pub mod commands;
pub mod gateway;
pub mod scratch;

use std::time::Instant;

use serde::Serialize;

use crate::core::config::CheckConfig;
use crate::core::errors::Result;
use gateway::{GatewayReport, NetlinkRouteSource, RouteSource};
use scratch::{ScratchReport, ScratchSpec};

/// One full cycle of self-tests.
pub trait HealthCheck {
    /// Run every check once, stopping at the first failure.
    fn run_checks(&mut self) -> Result<CheckReport>;
}

/// Summary of a passing cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Scratch-file write cycle.
    pub scratch: ScratchReport,
    /// Gateway check, when enabled.
    pub gateway: Option<GatewayReport>,
    /// Wall time of the whole cycle.
    pub elapsed_ms: u64,
}

/// Runs the configured battery; `R` supplies routing data for the gateway step.
#[derive(Debug)]
pub struct HealthCheckRunner<R = NetlinkRouteSource> {
    config: CheckConfig,
    routes: Option<R>,
}

impl HealthCheckRunner<NetlinkRouteSource> {
    /// Runner using netlink for the gateway step when it is enabled.
    pub fn from_config(config: CheckConfig) -> Result<Self> {
        let routes = if config.gateway {
            Some(NetlinkRouteSource::new(config.destination()?))
        } else {
            None
        };
        Ok(Self { config, routes })
    }
}

impl<R: RouteSource> HealthCheckRunner<R> {
    /// Runner with an explicit route source; `None` skips the gateway step.
    #[must_use]
    pub fn with_routes(config: CheckConfig, routes: Option<R>) -> Self {
        Self { config, routes }
    }

    fn scratch_spec(&self) -> ScratchSpec {
        ScratchSpec {
            dir: self.config.scratch_dir.clone(),
            chunk_bytes: self.config.chunk_bytes,
            chunk_count: self.config.chunk_count,
            pause: self.config.chunk_pause(),
        }
    }
}

impl<R: RouteSource> HealthCheck for HealthCheckRunner<R> {
    fn run_checks(&mut self) -> Result<CheckReport> {
        let started = Instant::now();

        commands::run_quiet("exec", &self.config.exec_command)?;
        commands::list_paths(&self.config.list_command, &self.config.list_paths)?;
        let scratch = scratch::run_write_cycle(&self.scratch_spec())?;
        let gateway = match self.routes.as_mut() {
            Some(routes) => Some(gateway::check_gateway(routes, &self.config.ping_command)?),
            None => None,
        };

        let report = CheckReport {
            scratch,
            gateway,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::debug!(
            elapsed_ms = report.elapsed_ms,
            gateway = ?report.gateway.as_ref().map(|g| g.gateway),
            "health checks passed"
        );
        Ok(report)
    }
}
