//! Netlink route-family socket and response demultiplexing.
//!
//! [`NetlinkTransport`] owns one `NETLINK_ROUTE` socket bound to a
//! kernel-assigned port id. Requests go out as a single datagram; responses
//! are split into messages by [`dispatch`], which filters on sequence number
//! and port id and hands each remaining message to a caller closure.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::socket::{
    AddressFamily, MsgFlags, NetlinkAddr, SockFlag, SockProtocol, SockType, bind, getsockname,
    recv, sendto, socket,
};
use nix::unistd::{SysconfVar, sysconf};

use super::wire::{
    Messages, NLMSG_DONE, NLMSG_ERROR, NLMSG_NOOP, NLMSG_OVERRUN, NetlinkMessage, NetlinkRequest,
};
use crate::core::errors::{Result, WdError};

/// Upper bound for the outgoing request buffer.
pub const MAX_SEND_BUFFER: usize = 8 * 1024;
/// Receive buffer; large enough for any single dump datagram.
pub const RECV_BUFFER: usize = 32 * 1024;

/// Whether the caller wants more messages from the current exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep delivering messages.
    Continue,
    /// End the exchange after this message.
    Stop,
}

/// Per-message callback used by [`Transport::receive`].
pub type MessageHandler<'h> = dyn FnMut(&NetlinkMessage<'_>) -> Result<Flow> + 'h;

/// Request/response exchange with the kernel routing subsystem.
pub trait Transport {
    /// Port id responses must be addressed to.
    fn port_id(&self) -> u32;

    /// Fresh sequence number for the next request.
    fn next_sequence(&mut self) -> u32;

    /// Serialize and send one request.
    fn send(&mut self, request: &NetlinkRequest) -> Result<()>;

    /// Read responses for `seq`, calling `handler` per message until the
    /// exchange terminates, the handler stops it, or (with `oneshot`) one
    /// datagram belonging to the exchange was processed.
    fn receive(&mut self, seq: u32, oneshot: bool, handler: &mut MessageHandler<'_>)
    -> Result<()>;
}

/// Outcome of dispatching one datagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Batch {
    /// Messages that belonged to the exchange (control messages included).
    pub matched: usize,
    /// A terminator, acknowledgement, or handler stop was seen.
    pub finished: bool,
}

/// Demultiplex one datagram.
pub fn dispatch(
    datagram: &[u8],
    seq: u32,
    port_id: u32,
    handler: &mut MessageHandler<'_>,
) -> Result<Batch> {
    let mut batch = Batch::default();
    for message in Messages::new(datagram) {
        let message = message?;
        let header = message.header;
        if header.seq != seq || header.port_id != port_id {
            tracing::trace!(
                seq = header.seq,
                port_id = header.port_id,
                "skipping netlink message from another exchange"
            );
            continue;
        }
        batch.matched += 1;
        match header.msg_type {
            NLMSG_NOOP => {}
            NLMSG_DONE => {
                batch.finished = true;
                break;
            }
            NLMSG_ERROR => {
                let code = message.error_code()?;
                if code == 0 {
                    batch.finished = true;
                    break;
                }
                return Err(WdError::Transport {
                    context: "receive",
                    details: format!(
                        "kernel returned error: {}",
                        std::io::Error::from_raw_os_error(code)
                    ),
                });
            }
            NLMSG_OVERRUN => {
                return Err(WdError::Transport {
                    context: "receive",
                    details: "kernel reported receive buffer overrun".to_string(),
                });
            }
            _ => {
                if handler(&message)? == Flow::Stop {
                    batch.finished = true;
                    break;
                }
            }
        }
    }
    Ok(batch)
}

fn initial_sequence() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u32::try_from(elapsed.as_secs() % (u64::from(u32::MAX) + 1)).unwrap_or(0)
        })
}

fn send_capacity() -> usize {
    sysconf(SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .and_then(|page| usize::try_from(page).ok())
        .unwrap_or(4096)
        .min(MAX_SEND_BUFFER)
}

fn transport_error(context: &'static str, errno: Errno) -> WdError {
    WdError::Transport {
        context,
        details: errno.desc().to_string(),
    }
}

/// Route-family netlink socket. The socket is closed on [`Self::close`] or drop.
#[derive(Debug)]
pub struct NetlinkTransport {
    fd: Option<OwnedFd>,
    port_id: u32,
    seq: u32,
    send_capacity: usize,
    recv_buf: Vec<u8>,
}

impl NetlinkTransport {
    /// Create the socket and bind it to a kernel-assigned port id.
    pub fn open() -> Result<Self> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC,
            SockProtocol::NetlinkRoute,
        )
        .map_err(|errno| transport_error("socket", errno))?;
        bind(fd.as_raw_fd(), &NetlinkAddr::new(0, 0))
            .map_err(|errno| transport_error("bind", errno))?;
        let local: NetlinkAddr = getsockname(fd.as_raw_fd())
            .map_err(|errno| transport_error("getsockname", errno))?;

        tracing::debug!(port_id = local.pid(), "netlink route socket open");
        Ok(Self {
            fd: Some(fd),
            port_id: local.pid(),
            seq: initial_sequence(),
            send_capacity: send_capacity(),
            recv_buf: vec![0; RECV_BUFFER],
        })
    }

    /// Release the socket. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.fd.take().is_some() {
            tracing::debug!(port_id = self.port_id, "netlink route socket closed");
        }
    }

    /// Whether the socket is still held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    fn raw_fd(&self) -> Result<RawFd> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| WdError::Transport {
                context: "socket",
                details: "transport is closed".to_string(),
            })
    }

    fn recv_datagram(&mut self) -> Result<usize> {
        let fd = self.raw_fd()?;
        loop {
            match recv(fd, &mut self.recv_buf, MsgFlags::empty()) {
                Ok(0) => {
                    return Err(WdError::Transport {
                        context: "recv",
                        details: "socket returned no data".to_string(),
                    });
                }
                Ok(len) => return Ok(len),
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(transport_error("recv", errno)),
            }
        }
    }
}

impl Transport for NetlinkTransport {
    fn port_id(&self) -> u32 {
        self.port_id
    }

    fn next_sequence(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn send(&mut self, request: &NetlinkRequest) -> Result<()> {
        let fd = self.raw_fd()?;
        let bytes = request.encode(self.port_id, self.send_capacity);
        let sent = sendto(fd, &bytes, &NetlinkAddr::new(0, 0), MsgFlags::empty())
            .map_err(|errno| transport_error("sendto", errno))?;
        if sent != bytes.len() {
            return Err(WdError::Transport {
                context: "sendto",
                details: format!("short send: {sent} of {} bytes", bytes.len()),
            });
        }
        Ok(())
    }

    fn receive(
        &mut self,
        seq: u32,
        oneshot: bool,
        handler: &mut MessageHandler<'_>,
    ) -> Result<()> {
        loop {
            let len = self.recv_datagram()?;
            let batch = dispatch(&self.recv_buf[..len], seq, self.port_id, handler)?;
            if batch.finished || (oneshot && batch.matched > 0) {
                return Ok(());
            }
        }
    }
}

impl Drop for NetlinkTransport {
    fn drop(&mut self) {
        self.close();
    }
}
