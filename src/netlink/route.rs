//! Route and interface-address queries on top of a [`Transport`].
//!
//! The client keeps no netlink state between calls: each query takes a fresh
//! sequence number, sends one request, and decodes whatever the kernel
//! streams back for it.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

use super::transport::{Flow, Transport};
use super::wire::{
    AF_INET, IFA_ADDRESS, IFA_LABEL, IFADDRMSG_LEN, IfAddrMsg, NetlinkMessage, NetlinkRequest,
    RTA_GATEWAY, RTM_NEWADDR, RTM_NEWROUTE, RTMSG_LEN, RTN_UNICAST, RtMsg,
};
use crate::core::errors::{Result, WdError};

/// Interface name to IPv4 addresses, in kernel arrival order per interface.
pub type InterfaceAddressMap = BTreeMap<String, Vec<Ipv4Addr>>;

/// Maps a numeric interface index to its name.
pub type IndexResolver = fn(u32) -> Option<String>;

/// Route lookup target: an IPv4 address with an optional prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    /// Network or host address.
    pub addr: Ipv4Addr,
    /// Prefix length, 0..=32.
    pub prefix_len: u8,
}

impl Destination {
    /// Single-host destination (`/32`).
    #[must_use]
    pub const fn host(addr: Ipv4Addr) -> Self {
        Self {
            addr,
            prefix_len: 32,
        }
    }
}

impl FromStr for Destination {
    type Err = WdError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || WdError::InvalidConfig {
            details: format!("invalid route destination {raw:?}, expected a.b.c.d[/len]"),
        };
        let (addr, prefix) = raw.split_once('/').map_or((raw, None), |(a, p)| (a, Some(p)));
        let addr: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
        let prefix_len = match prefix {
            Some(p) => p.trim().parse::<u8>().map_err(|_| invalid())?,
            None => 32,
        };
        if prefix_len > 32 {
            return Err(invalid());
        }
        Ok(Self { addr, prefix_len })
    }
}

/// Resolve an interface index through the system interface table.
#[must_use]
pub fn system_index_resolver(index: u32) -> Option<String> {
    let interfaces = nix::net::if_::if_nameindex().ok()?;
    interfaces
        .iter()
        .find(|iface| iface.index() == index)
        .map(|iface| iface.name().to_string_lossy().into_owned())
}

fn query_error(query: &'static str, err: WdError) -> WdError {
    match err {
        WdError::NetworkQuery { .. } => err,
        other => WdError::NetworkQuery {
            query,
            details: other.to_string(),
        },
    }
}

/// Stateless query client; borrows a transport for each call.
#[derive(Debug, Clone, Copy)]
pub struct RouteClient {
    resolver: IndexResolver,
}

impl Default for RouteClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteClient {
    /// Client resolving interface names through the system table.
    #[must_use]
    pub fn new() -> Self {
        Self::with_resolver(system_index_resolver)
    }

    /// Client with a custom index-to-name resolver.
    #[must_use]
    pub fn with_resolver(resolver: IndexResolver) -> Self {
        Self { resolver }
    }

    /// Gateway of the route towards `destination`, or of the first unicast
    /// route in the kernel's dump order when no destination is given.
    pub fn get_route_gateway(
        &self,
        transport: &mut dyn Transport,
        destination: Option<Destination>,
    ) -> Result<Option<Ipv4Addr>> {
        let seq = transport.next_sequence();
        let request =
            NetlinkRequest::route_get(seq, destination.map(|d| (d.addr, d.prefix_len)));
        transport
            .send(&request)
            .map_err(|err| query_error("route", err))?;

        let mut gateway = None;
        transport
            .receive(seq, true, &mut |message| {
                if gateway.is_some() {
                    return Ok(Flow::Stop);
                }
                gateway = unicast_gateway(message)?;
                Ok(if gateway.is_some() {
                    Flow::Stop
                } else {
                    Flow::Continue
                })
            })
            .map_err(|err| query_error("route", err))?;

        tracing::debug!(?destination, ?gateway, "route query complete");
        Ok(gateway)
    }

    /// Every IPv4 address on every interface, grouped by interface name.
    pub fn get_interface_addresses(
        &self,
        transport: &mut dyn Transport,
    ) -> Result<InterfaceAddressMap> {
        let seq = transport.next_sequence();
        transport
            .send(&NetlinkRequest::address_dump(seq))
            .map_err(|err| query_error("address", err))?;

        let mut map = InterfaceAddressMap::new();
        let resolver = self.resolver;
        transport
            .receive(seq, false, &mut |message| {
                if let Some((name, addr)) = interface_address(message, resolver)? {
                    map.entry(name).or_default().push(addr);
                }
                Ok(Flow::Continue)
            })
            .map_err(|err| query_error("address", err))?;

        tracing::debug!(interfaces = map.len(), "address dump complete");
        Ok(map)
    }
}

fn unicast_gateway(message: &NetlinkMessage<'_>) -> Result<Option<Ipv4Addr>> {
    if message.header.msg_type != RTM_NEWROUTE {
        return Ok(None);
    }
    let rtm = RtMsg::parse(message.payload)?;
    if rtm.family != AF_INET || rtm.route_type != RTN_UNICAST {
        return Ok(None);
    }
    for attr in message.attributes(RTMSG_LEN)? {
        let attr = attr?;
        if attr.kind == RTA_GATEWAY {
            return attr.ipv4().map(Some);
        }
    }
    Ok(None)
}

fn interface_address(
    message: &NetlinkMessage<'_>,
    resolver: IndexResolver,
) -> Result<Option<(String, Ipv4Addr)>> {
    if message.header.msg_type != RTM_NEWADDR {
        return Ok(None);
    }
    let ifa = IfAddrMsg::parse(message.payload)?;
    if ifa.family != AF_INET {
        return Ok(None);
    }
    let mut address = None;
    let mut label = None;
    for attr in message.attributes(IFADDRMSG_LEN)? {
        let attr = attr?;
        match attr.kind {
            IFA_ADDRESS => address = Some(attr.ipv4()?),
            IFA_LABEL => label = attr.string(),
            _ => {}
        }
    }
    let Some(address) = address else {
        return Ok(None);
    };
    let name = resolver(ifa.index)
        .or(label)
        .unwrap_or_else(|| format!("if{}", ifa.index));
    Ok(Some((name, address)))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use proptest::prelude::*;

    use super::*;
    use crate::netlink::transport::{MessageHandler, dispatch};
    use crate::netlink::wire::{
        MessageWriter, NLM_F_MULTI, NLMSG_DONE, NLMSG_ERROR, RTA_DST, RequestKind,
    };

    const PORT: u32 = 4242;

    /// Transport that answers every request with canned datagrams.
    struct ReplayTransport {
        seq: u32,
        sent: Vec<NetlinkRequest>,
        responses: VecDeque<Vec<Vec<u8>>>,
    }

    impl ReplayTransport {
        fn new(responses: Vec<Vec<Vec<u8>>>) -> Self {
            Self {
                seq: 100,
                sent: Vec::new(),
                responses: responses.into(),
            }
        }
    }

    impl Transport for ReplayTransport {
        fn port_id(&self) -> u32 {
            PORT
        }

        fn next_sequence(&mut self) -> u32 {
            self.seq += 1;
            self.seq
        }

        fn send(&mut self, request: &NetlinkRequest) -> Result<()> {
            self.sent.push(request.clone());
            Ok(())
        }

        fn receive(
            &mut self,
            seq: u32,
            oneshot: bool,
            handler: &mut MessageHandler<'_>,
        ) -> Result<()> {
            let datagrams = self.responses.pop_front().unwrap_or_default();
            for datagram in datagrams {
                let batch = dispatch(&datagram, seq, PORT, handler)?;
                if batch.finished || (oneshot && batch.matched > 0) {
                    return Ok(());
                }
            }
            Err(WdError::Transport {
                context: "recv",
                details: "replay exhausted".to_string(),
            })
        }
    }

    fn route(seq: u32, family: u8, route_type: u8, gateway: Option<[u8; 4]>) -> Vec<u8> {
        let rtm = RtMsg {
            family,
            route_type,
            table: 254,
            ..RtMsg::default()
        };
        let writer = MessageWriter::new(RTM_NEWROUTE, NLM_F_MULTI, seq, PORT)
            .bytes(&rtm.to_bytes())
            .attr(RTA_DST, &[0, 0, 0, 0])
            .attr(99, &[1, 2, 3]);
        match gateway {
            Some(gw) => writer.attr(RTA_GATEWAY, &gw).finish(),
            None => writer.finish(),
        }
    }

    fn address(seq: u32, index: u32, addr: [u8; 4], label: &str) -> Vec<u8> {
        let ifa = IfAddrMsg {
            family: AF_INET,
            prefix_len: 24,
            index,
            ..IfAddrMsg::default()
        };
        let mut label = label.as_bytes().to_vec();
        label.push(0);
        MessageWriter::new(RTM_NEWADDR, NLM_F_MULTI, seq, PORT)
            .bytes(&ifa.to_bytes())
            .attr(IFA_ADDRESS, &addr)
            .attr(IFA_LABEL, &label)
            .finish()
    }

    fn done(seq: u32) -> Vec<u8> {
        MessageWriter::new(NLMSG_DONE, NLM_F_MULTI, seq, PORT)
            .bytes(&0i32.to_ne_bytes())
            .finish()
    }

    fn concat(parts: &[Vec<u8>]) -> Vec<u8> {
        parts.concat()
    }

    fn test_resolver(index: u32) -> Option<String> {
        match index {
            1 => Some("lo".to_string()),
            2 => Some("eth0".to_string()),
            _ => None,
        }
    }

    fn client() -> RouteClient {
        RouteClient::with_resolver(test_resolver)
    }

    #[test]
    fn destination_parsing() {
        let d: Destination = "10.1.2.3/8".parse().expect("valid");
        assert_eq!(d.addr, Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(d.prefix_len, 8);
        assert_eq!(
            "1.1.1.1".parse::<Destination>().expect("valid"),
            Destination::host(Ipv4Addr::new(1, 1, 1, 1))
        );
        assert!("1.1.1.1/33".parse::<Destination>().is_err());
        assert!("fe80::1".parse::<Destination>().is_err());
    }

    #[test]
    fn gateway_from_single_unicast_route() {
        let seq = 101;
        let mut transport = ReplayTransport::new(vec![vec![concat(&[
            route(seq, AF_INET, RTN_UNICAST, Some([10, 0, 0, 1])),
            done(seq),
        ])]]);
        let gw = client()
            .get_route_gateway(&mut transport, None)
            .expect("query");
        assert_eq!(gw, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(transport.sent[0].kind, RequestKind::RouteGet);
        assert!(transport.sent[0].is_dump());
    }

    #[test]
    fn destination_request_is_not_a_dump() {
        let seq = 101;
        let mut transport = ReplayTransport::new(vec![vec![route(
            seq,
            AF_INET,
            RTN_UNICAST,
            Some([192, 168, 1, 254]),
        )]]);
        let dest = Destination::host(Ipv4Addr::new(8, 8, 8, 8));
        let gw = client()
            .get_route_gateway(&mut transport, Some(dest))
            .expect("query");
        assert_eq!(gw, Some(Ipv4Addr::new(192, 168, 1, 254)));
        assert!(!transport.sent[0].is_dump());
        assert_eq!(
            transport.sent[0].destination,
            Some((Ipv4Addr::new(8, 8, 8, 8), 32))
        );
    }

    #[test]
    fn no_gateway_attribute_is_absent() {
        let seq = 101;
        let mut transport = ReplayTransport::new(vec![vec![concat(&[
            route(seq, AF_INET, RTN_UNICAST, None),
            done(seq),
        ])]]);
        let gw = client()
            .get_route_gateway(&mut transport, None)
            .expect("query");
        assert_eq!(gw, None);
    }

    #[test]
    fn non_unicast_and_foreign_family_routes_are_skipped() {
        let seq = 101;
        let mut transport = ReplayTransport::new(vec![vec![concat(&[
            route(seq, AF_INET, 2, Some([127, 0, 0, 1])),
            route(seq, 10, RTN_UNICAST, Some([1, 1, 1, 1])),
            route(seq, AF_INET, RTN_UNICAST, Some([10, 0, 0, 1])),
            route(seq, AF_INET, RTN_UNICAST, Some([10, 9, 9, 9])),
            done(seq),
        ])]]);
        let gw = client()
            .get_route_gateway(&mut transport, None)
            .expect("query");
        assert_eq!(gw, Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn stale_datagram_does_not_end_oneshot() {
        let seq = 101;
        let mut transport = ReplayTransport::new(vec![vec![
            concat(&[address(57, 2, [10, 0, 0, 5], "eth0"), done(57)]),
            route(seq, AF_INET, RTN_UNICAST, Some([10, 0, 0, 1])),
        ]]);
        let gw = client()
            .get_route_gateway(&mut transport, None)
            .expect("query");
        assert_eq!(gw, Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn kernel_error_is_network_query_error() {
        let seq = 101;
        let error = MessageWriter::new(NLMSG_ERROR, 0, seq, PORT)
            .bytes(&(-libc::ENETUNREACH).to_ne_bytes())
            .finish();
        let mut transport = ReplayTransport::new(vec![vec![error]]);
        let err = client()
            .get_route_gateway(&mut transport, None)
            .expect_err("errno");
        assert_eq!(err.code(), "LWD-2002");
    }

    #[test]
    fn truncated_gateway_attribute_fails_query() {
        let seq = 101;
        let rtm = RtMsg {
            family: AF_INET,
            route_type: RTN_UNICAST,
            ..RtMsg::default()
        };
        let bad = MessageWriter::new(RTM_NEWROUTE, 0, seq, PORT)
            .bytes(&rtm.to_bytes())
            .attr(RTA_GATEWAY, &[10, 0])
            .finish();
        let mut transport = ReplayTransport::new(vec![vec![bad]]);
        let err = client()
            .get_route_gateway(&mut transport, None)
            .expect_err("bad attr");
        assert_eq!(err.code(), "LWD-2002");
    }

    #[test]
    fn addresses_aggregate_across_datagrams() {
        let seq = 101;
        let mut transport = ReplayTransport::new(vec![vec![
            concat(&[
                address(seq, 1, [127, 0, 0, 1], "lo"),
                address(seq, 2, [10, 0, 0, 5], "eth0"),
            ]),
            concat(&[
                address(seq, 2, [10, 0, 0, 6], "eth0:1"),
                address(seq, 7, [192, 168, 1, 2], "wlan0"),
                done(seq),
            ]),
        ]]);
        let map = client()
            .get_interface_addresses(&mut transport)
            .expect("dump");
        assert_eq!(map.len(), 3);
        assert_eq!(
            map["eth0"],
            vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6)]
        );
        assert_eq!(map["lo"], vec![Ipv4Addr::LOCALHOST]);
        // Index 7 is unknown to the resolver, so the kernel label is used.
        assert_eq!(map["wlan0"], vec![Ipv4Addr::new(192, 168, 1, 2)]);
        assert_eq!(transport.sent[0].kind, RequestKind::AddressDump);
    }

    #[test]
    fn unlabelled_unknown_index_gets_synthetic_name() {
        let seq = 101;
        let ifa = IfAddrMsg {
            family: AF_INET,
            index: 33,
            ..IfAddrMsg::default()
        };
        let msg = MessageWriter::new(RTM_NEWADDR, NLM_F_MULTI, seq, PORT)
            .bytes(&ifa.to_bytes())
            .attr(IFA_ADDRESS, &[172, 16, 0, 1])
            .finish();
        let mut transport = ReplayTransport::new(vec![vec![concat(&[msg, done(seq)])]]);
        let map = client()
            .get_interface_addresses(&mut transport)
            .expect("dump");
        assert_eq!(map["if33"], vec![Ipv4Addr::new(172, 16, 0, 1)]);
    }

    #[test]
    fn dump_without_terminator_is_an_error() {
        let seq = 101;
        let mut transport =
            ReplayTransport::new(vec![vec![address(seq, 2, [10, 0, 0, 5], "eth0")]]);
        let err = client()
            .get_interface_addresses(&mut transport)
            .expect_err("no done");
        assert_eq!(err.code(), "LWD-2002");
    }

    proptest! {
        #[test]
        fn address_dump_preserves_counts_and_order(
            rows in prop::collection::vec((1u32..6, any::<[u8; 4]>()), 0..40),
            per_datagram in 1usize..5,
        ) {
            let seq = 101;
            let mut messages: Vec<Vec<u8>> = rows
                .iter()
                .map(|(index, addr)| address(seq, *index + 10, *addr, &format!("eth{index}")))
                .collect();
            messages.push(done(seq));
            let datagrams: Vec<Vec<u8>> = messages.chunks(per_datagram).map(concat).collect();

            let mut transport = ReplayTransport::new(vec![datagrams]);
            let map = client().get_interface_addresses(&mut transport).expect("dump");

            let distinct: std::collections::BTreeSet<u32> =
                rows.iter().map(|(index, _)| *index).collect();
            prop_assert_eq!(map.len(), distinct.len());
            prop_assert_eq!(map.values().map(Vec::len).sum::<usize>(), rows.len());
            for index in distinct {
                let expected: Vec<Ipv4Addr> = rows
                    .iter()
                    .filter(|(i, _)| *i == index)
                    .map(|(_, addr)| Ipv4Addr::from(*addr))
                    .collect();
                prop_assert_eq!(&map[&format!("eth{index}")], &expected);
            }
        }

        #[test]
        fn single_unicast_gateway_is_returned(gw in any::<[u8; 4]>(), noise in 0usize..4) {
            let seq = 101;
            let mut parts: Vec<Vec<u8>> =
                (0..noise).map(|_| route(seq, AF_INET, 3, Some([9, 9, 9, 9]))).collect();
            parts.push(route(seq, AF_INET, RTN_UNICAST, Some(gw)));
            parts.push(done(seq));
            let mut transport = ReplayTransport::new(vec![vec![concat(&parts)]]);
            let found = client().get_route_gateway(&mut transport, None).expect("query");
            prop_assert_eq!(found, Some(Ipv4Addr::from(gw)));
        }
    }
}
