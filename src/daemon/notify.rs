//! Supervisor notifications (`READY=1`, `WATCHDOG=1`, `STATUS=...`) and
//! watchdog environment parsing.

use std::ffi::OsStr;
use std::os::linux::net::SocketAddrExt as _;
use std::os::unix::ffi::OsStrExt as _;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::time::Duration;

use thiserror::Error;

use crate::core::errors::{Result, WdError};

/// Environment variable naming the supervisor's notification socket.
pub const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";
/// Environment variable carrying the pid the watchdog applies to.
pub const WATCHDOG_PID_ENV: &str = "WATCHDOG_PID";
/// Environment variable carrying the watchdog timeout in microseconds.
pub const WATCHDOG_USEC_ENV: &str = "WATCHDOG_USEC";

/// Messages understood by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Startup finished.
    Ready,
    /// Liveness heartbeat.
    Watchdog,
    /// Free-text status line.
    Status(String),
}

impl Notification {
    /// Wire form sent to the supervisor.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Ready => "READY=1".to_string(),
            Self::Watchdog => "WATCHDOG=1".to_string(),
            Self::Status(text) => format!("STATUS={text}"),
        }
    }
}

/// Sink for supervisor notifications.
pub trait SupervisorNotifier {
    /// Deliver one notification.
    fn notify(&mut self, notification: &Notification) -> Result<()>;
}

/// Sends each notification as one datagram to `NOTIFY_SOCKET`.
#[derive(Debug)]
pub struct SocketNotifier {
    target: Option<(UnixDatagram, SocketAddr)>,
}

impl SocketNotifier {
    /// Notifier for the socket named in the environment; inert when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(NOTIFY_SOCKET_ENV) {
            Some(path) if !path.is_empty() => Self::connect(&path),
            _ => {
                tracing::debug!("{NOTIFY_SOCKET_ENV} unset; supervisor notifications disabled");
                Ok(Self::disabled())
            }
        }
    }

    /// Notifier that drops everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// Notifier for `path`; a leading `@` selects the abstract namespace.
    pub fn connect(path: &OsStr) -> Result<Self> {
        let bytes = path.as_bytes();
        let addr = match bytes.strip_prefix(b"@") {
            Some(name) => SocketAddr::from_abstract_name(name),
            None => SocketAddr::from_pathname(path),
        }
        .map_err(|err| WdError::io(path, err))?;
        let socket = UnixDatagram::unbound().map_err(|err| WdError::io(path, err))?;
        Ok(Self {
            target: Some((socket, addr)),
        })
    }

    /// Whether a socket is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }
}

impl SupervisorNotifier for SocketNotifier {
    fn notify(&mut self, notification: &Notification) -> Result<()> {
        let message = notification.message();
        let Some((socket, addr)) = &self.target else {
            tracing::debug!(%message, "supervisor notification dropped");
            return Ok(());
        };
        socket
            .send_to_addr(message.as_bytes(), addr)
            .map_err(|err| WdError::Runtime {
                details: format!("notify {message:?}: {err}"),
            })?;
        tracing::trace!(%message, "supervisor notified");
        Ok(())
    }
}

/// Why watchdog heartbeats stay off.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchdogDisabled {
    /// The supervisor did not ask for heartbeats.
    #[error("WATCHDOG_USEC is not set")]
    NotRequested,
    /// Timeout given without the pid it applies to.
    #[error("WATCHDOG_PID is not set")]
    MissingPid,
    /// The watchdog belongs to another process.
    #[error("WATCHDOG_PID={found} does not match our pid {own}")]
    OtherProcess {
        /// Raw `WATCHDOG_PID` value.
        found: String,
        /// Our pid.
        own: u32,
    },
    /// Timeout is not a positive integer.
    #[error("WATCHDOG_USEC={0:?} is not a positive number")]
    BadTimeout(String),
}

/// Heartbeat cadence for the supervisor's watchdog: half its timeout.
pub fn watchdog_interval(
    pid: Option<&str>,
    usec: Option<&str>,
    own_pid: u32,
) -> std::result::Result<Duration, WatchdogDisabled> {
    let usec = usec.ok_or(WatchdogDisabled::NotRequested)?;
    let pid = pid.ok_or(WatchdogDisabled::MissingPid)?;
    if pid.trim().parse::<u32>().ok() != Some(own_pid) {
        return Err(WatchdogDisabled::OtherProcess {
            found: pid.to_string(),
            own: own_pid,
        });
    }
    let timeout = usec
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|&usec| usec > 0)
        .ok_or_else(|| WatchdogDisabled::BadTimeout(usec.to_string()))?;
    Ok(Duration::from_micros(timeout) / 2)
}

/// [`watchdog_interval`] read from the process environment.
pub fn watchdog_interval_from_env() -> std::result::Result<Duration, WatchdogDisabled> {
    let pid = std::env::var(WATCHDOG_PID_ENV).ok();
    let usec = std::env::var(WATCHDOG_USEC_ENV).ok();
    watchdog_interval(pid.as_deref(), usec.as_deref(), std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_strings() {
        assert_eq!(Notification::Ready.message(), "READY=1");
        assert_eq!(Notification::Watchdog.message(), "WATCHDOG=1");
        assert_eq!(
            Notification::Status("checking every 60s".to_string()).message(),
            "STATUS=checking every 60s"
        );
    }

    #[test]
    fn interval_is_half_the_timeout() {
        let interval = watchdog_interval(Some("42"), Some("30000000"), 42).expect("enabled");
        assert_eq!(interval, Duration::from_secs(15));
    }

    #[test]
    fn disabled_reasons() {
        assert_eq!(
            watchdog_interval(Some("42"), None, 42),
            Err(WatchdogDisabled::NotRequested)
        );
        assert_eq!(
            watchdog_interval(None, Some("1000"), 42),
            Err(WatchdogDisabled::MissingPid)
        );
        assert!(matches!(
            watchdog_interval(Some("7"), Some("1000"), 42),
            Err(WatchdogDisabled::OtherProcess { own: 42, .. })
        ));
        assert_eq!(
            watchdog_interval(Some("42"), Some("0"), 42),
            Err(WatchdogDisabled::BadTimeout("0".to_string()))
        );
        assert_eq!(
            watchdog_interval(Some("42"), Some("-5"), 42),
            Err(WatchdogDisabled::BadTimeout("-5".to_string()))
        );
    }

    #[test]
    fn datagrams_reach_the_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notify.sock");
        let receiver = UnixDatagram::bind(&path).expect("bind");
        let mut notifier = SocketNotifier::connect(path.as_os_str()).expect("connect");
        assert!(notifier.is_enabled());

        notifier.notify(&Notification::Ready).expect("ready");
        notifier.notify(&Notification::Watchdog).expect("watchdog");

        let mut buf = [0u8; 64];
        let len = receiver.recv(&mut buf).expect("recv");
        assert_eq!(&buf[..len], b"READY=1");
        let len = receiver.recv(&mut buf).expect("recv");
        assert_eq!(&buf[..len], b"WATCHDOG=1");
    }

    #[test]
    fn disabled_notifier_accepts_everything() {
        let mut notifier = SocketNotifier::disabled();
        assert!(!notifier.is_enabled());
        notifier.notify(&Notification::Watchdog).expect("dropped quietly");
    }

    #[test]
    fn missing_socket_fails_send() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.sock");
        let mut notifier = SocketNotifier::connect(path.as_os_str()).expect("addr only");
        assert!(notifier.notify(&Notification::Ready).is_err());
    }
}
