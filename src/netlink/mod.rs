//! Minimal rtnetlink client: route lookups and IPv4 address dumps.

pub mod route;
pub mod transport;
pub mod wire;

pub use route::{Destination, InterfaceAddressMap, RouteClient};
pub use transport::{NetlinkTransport, Transport};
