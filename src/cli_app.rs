//! Top-level CLI definition and dispatch.

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::{ArgAction, Args, CommandFactory as _, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::json;

use crate::checks::{HealthCheck as _, HealthCheckRunner};
use crate::core::config::Config;
use crate::core::errors::{Result, WdError};
use crate::daemon::{service, signals};
use crate::netlink::{Destination, NetlinkTransport, RouteClient};

/// Liveness watchdog: proves the host can still fork, write, and route.
#[derive(Debug, Parser)]
#[command(name = "lwd", version, about)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    /// Subcommand to run.
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the watchdog daemon in the foreground (used by the supervisor).
    Run(RunArgs),
    /// Run one health-check cycle and report the result.
    Check {
        #[command(flatten)]
        overrides: CheckOverrides,
        /// Emit a JSON report.
        #[arg(long)]
        json: bool,
    },
    /// Show the gateway and local interface addresses seen through netlink.
    Routes {
        /// Route lookup target (a.b.c.d[/len]); default route when omitted.
        #[arg(long)]
        destination: Option<String>,
        /// Emit JSON.
        #[arg(long)]
        json: bool,
    },
    /// Generate a shell completion script.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Overrides shared by `run` and `check`.
#[derive(Debug, Clone, Default, Args)]
pub struct CheckOverrides {
    /// Seconds between health-check cycles.
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,
    /// Enable the gateway reachability check.
    #[arg(long)]
    pub gateway: bool,
}

/// Options for `lwd run`.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    #[command(flatten)]
    /// Check overrides shared with `check`.
    pub overrides: CheckOverrides,
    /// Failure log location.
    #[arg(long, value_name = "PATH")]
    pub faillog: Option<PathBuf>,
    /// Diagnostic command captured into the failure log (repeatable).
    #[arg(long = "faillog-cmd", value_name = "CMD")]
    pub faillog_cmd: Vec<String>,
}

impl CheckOverrides {
    fn apply(&self, config: &mut Config) {
        if let Some(interval) = self.interval {
            config.check.interval_secs = interval;
        }
        if self.gateway {
            config.check.gateway = true;
        }
    }
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        self.overrides.apply(config);
        if let Some(path) = &self.faillog {
            config.failure_log.path = Some(path.clone());
        }
        if !self.faillog_cmd.is_empty() {
            config.failure_log.commands.clone_from(&self.faillog_cmd);
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Run(args) => {
            let mut config = Config::load(cli.config.as_deref())?;
            args.apply(&mut config);
            signals::install()?;
            service::run_daemon(&config, &AtomicBool::new(false))
        }
        Command::Check { overrides, json } => {
            let mut config = Config::load(cli.config.as_deref())?;
            overrides.apply(&mut config);
            config.validate()?;
            let report = HealthCheckRunner::from_config(config.check)?.run_checks()?;
            if *json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "ok: wrote {} bytes in {} ms",
                    report.scratch.bytes_written, report.elapsed_ms
                );
                if let Some(gateway) = report.gateway {
                    println!("gateway {} reachable", gateway.gateway);
                }
            }
            Ok(())
        }
        Command::Routes { destination, json } => {
            let destination = destination
                .as_deref()
                .map(str::parse::<Destination>)
                .transpose()?;
            show_routes(destination, *json)
        }
        Command::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(*shell, &mut command, "lwd", &mut io::stdout());
            Ok(())
        }
    }
}

fn show_routes(destination: Option<Destination>, as_json: bool) -> Result<()> {
    let client = RouteClient::new();
    let mut transport = NetlinkTransport::open()?;
    let gateway = client.get_route_gateway(&mut transport, destination)?;
    let interfaces = client.get_interface_addresses(&mut transport)?;
    transport.close();

    let mut out = io::stdout().lock();
    let write_err = |err: io::Error| WdError::Runtime {
        details: format!("stdout: {err}"),
    };
    if as_json {
        let payload = json!({
            "gateway": gateway.map(|g| g.to_string()),
            "interfaces": interfaces
                .iter()
                .map(|(name, addrs)| {
                    (name.clone(), addrs.iter().map(ToString::to_string).collect::<Vec<_>>())
                })
                .collect::<std::collections::BTreeMap<_, _>>(),
        });
        writeln!(out, "{payload}").map_err(write_err)?;
        return Ok(());
    }
    let header = match gateway {
        Some(gateway) => writeln!(out, "gateway: {gateway}"),
        None => writeln!(out, "gateway: none"),
    };
    header.map_err(write_err)?;
    for (name, addrs) in &interfaces {
        let rendered: Vec<String> = addrs.iter().map(ToString::to_string).collect();
        writeln!(out, "{name}: {}", rendered.join(", ")).map_err(write_err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_override_config() {
        let cli = Cli::try_parse_from([
            "lwd",
            "run",
            "--interval",
            "15",
            "--gateway",
            "--faillog",
            "/tmp/lwd.log",
            "--faillog-cmd",
            "uptime",
            "--faillog-cmd",
            "ps aux",
        ])
        .expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.check.interval_secs, 15);
        assert!(config.check.gateway);
        assert_eq!(config.failure_log.path, Some(PathBuf::from("/tmp/lwd.log")));
        assert_eq!(config.failure_log.commands, vec!["uptime", "ps aux"]);
    }

    #[test]
    fn absent_flags_keep_config() {
        let mut config = Config::default();
        RunArgs::default().apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["lwd", "check", "--json", "-vv", "--config", "/etc/lwd.toml"])
            .expect("parse");
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/lwd.toml")));
    }
}
