//! Gateway reachability: resolve, reject a route to ourselves, then ping it.

use std::net::Ipv4Addr;

use serde::Serialize;

use super::commands::run_quiet;
use crate::core::errors::{Result, WdError};
use crate::netlink::{Destination, InterfaceAddressMap, NetlinkTransport, RouteClient};

/// Where gateway and local-address information comes from.
pub trait RouteSource {
    /// Gateway of the route being checked, if the kernel has one.
    fn gateway(&mut self) -> Result<Option<Ipv4Addr>>;
    /// Every local IPv4 address, grouped by interface.
    fn local_addresses(&mut self) -> Result<InterfaceAddressMap>;
}

/// [`RouteSource`] backed by a netlink route socket, opened on first use.
#[derive(Debug)]
pub struct NetlinkRouteSource {
    client: RouteClient,
    destination: Option<Destination>,
    transport: Option<NetlinkTransport>,
}

impl NetlinkRouteSource {
    /// Source querying the route towards `destination` (default route when `None`).
    #[must_use]
    pub fn new(destination: Option<Destination>) -> Self {
        Self {
            client: RouteClient::new(),
            destination,
            transport: None,
        }
    }

    fn with_transport<T>(
        &mut self,
        query: impl FnOnce(&RouteClient, &mut NetlinkTransport) -> Result<T>,
    ) -> Result<T> {
        let mut transport = match self.transport.take() {
            Some(transport) => transport,
            None => NetlinkTransport::open()?,
        };
        let outcome = query(&self.client, &mut transport);
        // A failed exchange drops the socket; the next query opens a fresh one.
        if outcome.is_ok() {
            self.transport = Some(transport);
        }
        outcome
    }
}

impl RouteSource for NetlinkRouteSource {
    fn gateway(&mut self) -> Result<Option<Ipv4Addr>> {
        let destination = self.destination;
        self.with_transport(|client, transport| client.get_route_gateway(transport, destination))
    }

    fn local_addresses(&mut self) -> Result<InterfaceAddressMap> {
        self.with_transport(|client, transport| client.get_interface_addresses(transport))
    }
}

/// Outcome of a passing gateway check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayReport {
    /// Gateway that answered the ping.
    pub gateway: Ipv4Addr,
    /// Local IPv4 addresses compared against it.
    pub local_addresses: usize,
}

/// Resolve the gateway, make sure it is not one of our own addresses, and
/// run `ping_command` with the gateway appended.
pub fn check_gateway(
    routes: &mut dyn RouteSource,
    ping_command: &[String],
) -> Result<GatewayReport> {
    let gateway = routes
        .gateway()?
        .ok_or_else(|| WdError::health("gateway", "no unicast route with a gateway"))?;
    let locals = routes.local_addresses()?;
    if let Some((iface, _)) = locals
        .iter()
        .find(|(_, addrs)| addrs.contains(&gateway))
    {
        return Err(WdError::health(
            "gateway-self-route",
            format!("gateway {gateway} is a local address on {iface}"),
        ));
    }

    let mut argv = ping_command.to_vec();
    argv.push(gateway.to_string());
    run_quiet("gateway-ping", &argv)?;

    Ok(GatewayReport {
        gateway,
        local_addresses: locals.values().map(Vec::len).sum(),
    })
}
