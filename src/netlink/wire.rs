//! Netlink framing: message headers, family headers, and attribute streams.
//!
//! Everything here works on plain byte slices in native byte order, which is
//! what the kernel uses for header fields. Address payloads are in network
//! byte order and are decoded as such. Nothing in this module touches a
//! socket, so responses can be replayed from captured bytes.
//!
//! ```text
//! ┌──────────────┬──────────────────────┬──────────────────────────────┐
//! │ nlmsghdr 16B │ family header (rtmsg │ rtattr stream, each entry    │
//! │              │ 12B / ifaddrmsg 8B)  │ 4-byte aligned               │
//! └──────────────┴──────────────────────┴──────────────────────────────┘
//! ```

#![allow(missing_docs)]

use std::net::Ipv4Addr;

use crate::core::errors::{Result, WdError};

pub const NLMSG_HDRLEN: usize = 16;
pub const RTA_HDRLEN: usize = 4;
pub const RTMSG_LEN: usize = 12;
pub const IFADDRMSG_LEN: usize = 8;
/// Largest payload a single `rtattr` can describe.
pub const MAX_ATTR_PAYLOAD: usize = u16::MAX as usize - RTA_HDRLEN;

pub const NLMSG_NOOP: u16 = libc::NLMSG_NOOP as u16;
pub const NLMSG_ERROR: u16 = libc::NLMSG_ERROR as u16;
pub const NLMSG_DONE: u16 = libc::NLMSG_DONE as u16;
pub const NLMSG_OVERRUN: u16 = libc::NLMSG_OVERRUN as u16;

pub const NLM_F_REQUEST: u16 = libc::NLM_F_REQUEST as u16;
pub const NLM_F_MULTI: u16 = libc::NLM_F_MULTI as u16;
pub const NLM_F_DUMP: u16 = libc::NLM_F_DUMP as u16;

pub const RTM_NEWADDR: u16 = libc::RTM_NEWADDR as u16;
pub const RTM_GETADDR: u16 = libc::RTM_GETADDR as u16;
pub const RTM_NEWROUTE: u16 = libc::RTM_NEWROUTE as u16;
pub const RTM_GETROUTE: u16 = libc::RTM_GETROUTE as u16;

pub const AF_INET: u8 = libc::AF_INET as u8;
pub const RTN_UNICAST: u8 = libc::RTN_UNICAST as u8;

pub const RTA_DST: u16 = libc::RTA_DST as u16;
pub const RTA_GATEWAY: u16 = libc::RTA_GATEWAY as u16;
pub const IFA_ADDRESS: u16 = libc::IFA_ADDRESS as u16;
pub const IFA_LABEL: u16 = libc::IFA_LABEL as u16;

#[must_use]
pub const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

fn malformed(details: impl Into<String>) -> WdError {
    WdError::NetworkQuery {
        query: "frame",
        details: details.into(),
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

// ──────────────────── headers ────────────────────

/// `struct nlmsghdr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlMsgHdr {
    pub len: u32,
    pub msg_type: u16,
    pub flags: u16,
    pub seq: u32,
    pub port_id: u32,
}

impl NlMsgHdr {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < NLMSG_HDRLEN {
            return Err(malformed(format!(
                "truncated header: {} bytes, need {NLMSG_HDRLEN}",
                buf.len()
            )));
        }
        Ok(Self {
            len: read_u32(buf, 0),
            msg_type: read_u16(buf, 4),
            flags: read_u16(buf, 6),
            seq: read_u32(buf, 8),
            port_id: read_u32(buf, 12),
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.len.to_ne_bytes());
        out.extend_from_slice(&self.msg_type.to_ne_bytes());
        out.extend_from_slice(&self.flags.to_ne_bytes());
        out.extend_from_slice(&self.seq.to_ne_bytes());
        out.extend_from_slice(&self.port_id.to_ne_bytes());
    }
}

/// `struct rtmsg`, the family header of route messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtMsg {
    pub family: u8,
    pub dst_len: u8,
    pub src_len: u8,
    pub tos: u8,
    pub table: u8,
    pub protocol: u8,
    pub scope: u8,
    pub route_type: u8,
    pub flags: u32,
}

impl RtMsg {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < RTMSG_LEN {
            return Err(malformed(format!(
                "route message payload of {} bytes is shorter than rtmsg",
                payload.len()
            )));
        }
        Ok(Self {
            family: payload[0],
            dst_len: payload[1],
            src_len: payload[2],
            tos: payload[3],
            table: payload[4],
            protocol: payload[5],
            scope: payload[6],
            route_type: payload[7],
            flags: read_u32(payload, 8),
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; RTMSG_LEN] {
        let mut out = [0u8; RTMSG_LEN];
        out[..8].copy_from_slice(&[
            self.family,
            self.dst_len,
            self.src_len,
            self.tos,
            self.table,
            self.protocol,
            self.scope,
            self.route_type,
        ]);
        out[8..].copy_from_slice(&self.flags.to_ne_bytes());
        out
    }
}

/// `struct ifaddrmsg`, the family header of address messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfAddrMsg {
    pub family: u8,
    pub prefix_len: u8,
    pub flags: u8,
    pub scope: u8,
    pub index: u32,
}

impl IfAddrMsg {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < IFADDRMSG_LEN {
            return Err(malformed(format!(
                "address message payload of {} bytes is shorter than ifaddrmsg",
                payload.len()
            )));
        }
        Ok(Self {
            family: payload[0],
            prefix_len: payload[1],
            flags: payload[2],
            scope: payload[3],
            index: read_u32(payload, 4),
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; IFADDRMSG_LEN] {
        let mut out = [0u8; IFADDRMSG_LEN];
        out[..4].copy_from_slice(&[self.family, self.prefix_len, self.flags, self.scope]);
        out[4..].copy_from_slice(&self.index.to_ne_bytes());
        out
    }
}

// ──────────────────── attributes ────────────────────

/// One `rtattr` entry borrowed from a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'a> {
    pub kind: u16,
    pub payload: &'a [u8],
}

impl Attribute<'_> {
    /// Decode a fixed-length 32-bit address.
    pub fn ipv4(&self) -> Result<Ipv4Addr> {
        let octets: [u8; 4] = self.payload.try_into().map_err(|_| {
            malformed(format!(
                "attribute {} carries {} bytes, expected a 4-byte address",
                self.kind,
                self.payload.len()
            ))
        })?;
        Ok(Ipv4Addr::from(octets))
    }

    /// Decode a NUL-terminated string payload.
    #[must_use]
    pub fn string(&self) -> Option<String> {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.payload.len());
        std::str::from_utf8(&self.payload[..end])
            .ok()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Iterator over an attribute stream. Stops after the first error.
#[derive(Debug, Clone)]
pub struct Attributes<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Attributes<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for Attributes<'a> {
    type Item = Result<Attribute<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset + RTA_HDRLEN > self.buf.len() {
            return None;
        }
        let len = usize::from(read_u16(self.buf, self.offset));
        let kind = read_u16(self.buf, self.offset + 2);
        if len < RTA_HDRLEN || self.offset + len > self.buf.len() {
            self.failed = true;
            return Some(Err(malformed(format!(
                "attribute {kind} length {len} exceeds remaining {} bytes",
                self.buf.len() - self.offset
            ))));
        }
        let attr = Attribute {
            kind,
            payload: &self.buf[self.offset + RTA_HDRLEN..self.offset + len],
        };
        self.offset += align4(len);
        Some(Ok(attr))
    }
}

// ──────────────────── messages ────────────────────

/// One message borrowed from a received datagram.
#[derive(Debug, Clone, Copy)]
pub struct NetlinkMessage<'a> {
    pub header: NlMsgHdr,
    pub payload: &'a [u8],
}

impl<'a> NetlinkMessage<'a> {
    /// Attribute stream following a family header of `family_len` bytes.
    pub fn attributes(&self, family_len: usize) -> Result<Attributes<'a>> {
        let start = align4(family_len);
        if self.payload.len() < family_len {
            return Err(malformed(format!(
                "message type {} payload shorter than its {family_len}-byte family header",
                self.header.msg_type
            )));
        }
        Ok(Attributes::new(self.payload.get(start..).unwrap_or(&[])))
    }

    /// Negated errno carried by an `NLMSG_ERROR` message (0 = ack).
    pub fn error_code(&self) -> Result<i32> {
        if self.payload.len() < 4 {
            return Err(malformed("error message too short"));
        }
        Ok(-i32::from_ne_bytes([
            self.payload[0],
            self.payload[1],
            self.payload[2],
            self.payload[3],
        ]))
    }
}

/// Iterator splitting a datagram into messages. Stops after the first error.
#[derive(Debug, Clone)]
pub struct Messages<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Messages<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<NetlinkMessage<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        let rest = &self.buf[self.offset..];
        let header = match NlMsgHdr::parse(rest) {
            Ok(header) => header,
            Err(err) => {
                self.failed = true;
                return Some(Err(err));
            }
        };
        let len = header.len as usize;
        if len < NLMSG_HDRLEN || len > rest.len() {
            self.failed = true;
            return Some(Err(malformed(format!(
                "message length {len} invalid for {} remaining bytes",
                rest.len()
            ))));
        }
        self.offset += align4(len);
        Some(Ok(NetlinkMessage {
            header,
            payload: &rest[NLMSG_HDRLEN..len],
        }))
    }
}

// ──────────────────── construction ────────────────────

/// Incrementally builds one message; the length field is patched on finish.
#[derive(Debug)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    #[must_use]
    pub fn new(msg_type: u16, flags: u16, seq: u32, port_id: u32) -> Self {
        Self::with_capacity(msg_type, flags, seq, port_id, NLMSG_HDRLEN)
    }

    #[must_use]
    pub fn with_capacity(
        msg_type: u16,
        flags: u16,
        seq: u32,
        port_id: u32,
        capacity: usize,
    ) -> Self {
        let mut buf = Vec::with_capacity(capacity.max(NLMSG_HDRLEN));
        NlMsgHdr {
            len: 0,
            msg_type,
            flags,
            seq,
            port_id,
        }
        .write_to(&mut buf);
        Self { buf }
    }

    /// Append a fixed header or raw payload, padded to 4 bytes.
    #[must_use]
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.buf.extend_from_slice(data);
        self.pad();
        self
    }

    /// Append one attribute. Payloads must fit the 16-bit `rta_len`.
    #[must_use]
    pub fn attr(mut self, kind: u16, payload: &[u8]) -> Self {
        debug_assert!(
            payload.len() <= MAX_ATTR_PAYLOAD,
            "attribute {kind} payload of {} bytes exceeds {MAX_ATTR_PAYLOAD}",
            payload.len()
        );
        let len = u16::try_from(RTA_HDRLEN + payload.len()).unwrap_or(u16::MAX);
        self.buf.extend_from_slice(&len.to_ne_bytes());
        self.buf.extend_from_slice(&kind.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.pad();
        self
    }

    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        let len = u32::try_from(self.buf.len()).unwrap_or(u32::MAX);
        self.buf[..4].copy_from_slice(&len.to_ne_bytes());
        self.buf
    }

    fn pad(&mut self) {
        let aligned = align4(self.buf.len());
        self.buf.resize(aligned, 0);
    }
}

/// What a request asks the kernel for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Route lookup; a dump when no destination is attached.
    RouteGet,
    /// Dump of every interface address.
    AddressDump,
}

/// A route or address query, built fresh for each exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetlinkRequest {
    pub kind: RequestKind,
    pub flags: u16,
    pub seq: u32,
    pub family: u8,
    pub destination: Option<(Ipv4Addr, u8)>,
}

impl NetlinkRequest {
    #[must_use]
    pub fn route_get(seq: u32, destination: Option<(Ipv4Addr, u8)>) -> Self {
        let flags = if destination.is_some() {
            NLM_F_REQUEST
        } else {
            NLM_F_REQUEST | NLM_F_DUMP
        };
        Self {
            kind: RequestKind::RouteGet,
            flags,
            seq,
            family: AF_INET,
            destination,
        }
    }

    #[must_use]
    pub fn address_dump(seq: u32) -> Self {
        Self {
            kind: RequestKind::AddressDump,
            flags: NLM_F_REQUEST | NLM_F_DUMP,
            seq,
            family: AF_INET,
            destination: None,
        }
    }

    #[must_use]
    pub const fn msg_type(&self) -> u16 {
        match self.kind {
            RequestKind::RouteGet => RTM_GETROUTE,
            RequestKind::AddressDump => RTM_GETADDR,
        }
    }

    #[must_use]
    pub const fn is_dump(&self) -> bool {
        self.flags & NLM_F_DUMP == NLM_F_DUMP
    }

    /// Serialize into a buffer of at least `capacity` bytes.
    #[must_use]
    pub fn encode(&self, port_id: u32, capacity: usize) -> Vec<u8> {
        let writer =
            MessageWriter::with_capacity(self.msg_type(), self.flags, self.seq, port_id, capacity);
        match self.kind {
            RequestKind::RouteGet => {
                let rtm = RtMsg {
                    family: self.family,
                    dst_len: self.destination.map_or(0, |(_, len)| len),
                    ..RtMsg::default()
                };
                let writer = writer.bytes(&rtm.to_bytes());
                match self.destination {
                    Some((addr, _)) => writer.attr(RTA_DST, &addr.octets()).finish(),
                    None => writer.finish(),
                }
            }
            RequestKind::AddressDump => {
                let ifa = IfAddrMsg {
                    family: self.family,
                    ..IfAddrMsg::default()
                };
                writer.bytes(&ifa.to_bytes()).finish()
            }
        }
    }
}
