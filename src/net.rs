//! Endpoints and address classification.
//!
//! The non-unicast policy follows the usual special-purpose registries:
//! anything loopback, private, link-local, multicast, carrier-grade NAT,
//! documentation or otherwise reserved is *not* unicast. IPv4-mapped IPv6
//! addresses are classified as the IPv4 address they carry, so a mapped
//! form cannot be used to reach a restricted IPv4 endpoint.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// A network endpoint: host (literal IP or name) and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Parse the address as a literal IP, if it is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.address.parse().ok()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Addresses of an established outbound TCP connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Local address the socket is bound to
    pub bound: Endpoint,
    /// Address the socket is connected to
    pub remote: Endpoint,
}

/// (network, prefix length) pairs that are never unicast.
const NON_UNICAST_V4: &[(u32, u32)] = &[
    (0x0000_0000, 8),  // 0.0.0.0/8 unspecified
    (0x0A00_0000, 8),  // 10.0.0.0/8 private
    (0x6440_0000, 10), // 100.64.0.0/10 carrier-grade NAT
    (0x7F00_0000, 8),  // 127.0.0.0/8 loopback
    (0xA9FE_0000, 16), // 169.254.0.0/16 link-local
    (0xAC10_0000, 12), // 172.16.0.0/12 private
    (0xC000_0000, 24), // 192.0.0.0/24 IETF protocol assignments
    (0xC000_0200, 24), // 192.0.2.0/24 TEST-NET-1
    (0xC058_6300, 24), // 192.88.99.0/24 6to4 relay anycast
    (0xC0A8_0000, 16), // 192.168.0.0/16 private
    (0xC612_0000, 15), // 198.18.0.0/15 benchmarking
    (0xC633_6400, 24), // 198.51.100.0/24 TEST-NET-2
    (0xCB00_7100, 24), // 203.0.113.0/24 TEST-NET-3
    (0xE000_0000, 4),  // 224.0.0.0/4 multicast
    (0xF000_0000, 4),  // 240.0.0.0/4 reserved, includes broadcast
];

const NON_UNICAST_V6: &[(u128, u32)] = &[
    (0, 128),                                      // :: unspecified
    (1, 128),                                      // ::1 loopback
    (0x0064_ff9b_0000_0000_0000_0000_0000_0000, 96), // 64:ff9b::/96 NAT64
    (0x0000_0000_0000_0000_ffff_0000_0000_0000, 96), // ::ffff:0:0:0/96 SIIT
    (0x2001_0000_0000_0000_0000_0000_0000_0000, 32), // 2001::/32 teredo
    (0x2001_0db8_0000_0000_0000_0000_0000_0000, 32), // 2001:db8::/32 documentation
    (0x2002_0000_0000_0000_0000_0000_0000_0000, 16), // 2002::/16 6to4
    (0xfc00_0000_0000_0000_0000_0000_0000_0000, 7),  // fc00::/7 unique local
    (0xfe80_0000_0000_0000_0000_0000_0000_0000, 10), // fe80::/10 link-local
    (0xff00_0000_0000_0000_0000_0000_0000_0000, 8),  // ff00::/8 multicast
];

fn in_v4(addr: Ipv4Addr, network: u32, prefix: u32) -> bool {
    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    u32::from(addr) & mask == network & mask
}

fn in_v6(addr: Ipv6Addr, network: u128, prefix: u32) -> bool {
    let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
    u128::from(addr) & mask == network & mask
}

/// True if `addr` is a globally routable unicast address.
pub fn is_unicast(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !NON_UNICAST_V4
            .iter()
            .any(|&(network, prefix)| in_v4(*v4, network, prefix)),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_unicast(&IpAddr::V4(v4));
            }
            !NON_UNICAST_V6
                .iter()
                .any(|&(network, prefix)| in_v6(*v6, network, prefix))
        }
    }
}
