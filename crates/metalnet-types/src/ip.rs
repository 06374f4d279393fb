//! Address family and CIDR helpers on top of `ipnetwork`.

use crate::ParseError;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// IP address family of an address, network or subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of_addr(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn of_network(network: &IpNetwork) -> Self {
        match network {
            IpNetwork::V4(_) => AddressFamily::V4,
            IpNetwork::V6(_) => AddressFamily::V6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "ipv4"),
            AddressFamily::V6 => write!(f, "ipv6"),
        }
    }
}

/// A host address together with the network it was observed on, as
/// reported by a machine (`192.168.1.10/24`).
///
/// `network` always has its host bits cleared, so it can be compared
/// directly against subnet CIDRs.
///
/// # Examples
///
/// ```
/// use metalnet_types::HostCidr;
///
/// let observed: HostCidr = "192.168.1.10/24".parse().unwrap();
/// assert_eq!(observed.address.to_string(), "192.168.1.10");
/// assert_eq!(observed.network.to_string(), "192.168.1.0/24");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostCidr {
    pub address: IpAddr,
    pub network: IpNetwork,
}

impl HostCidr {
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of_addr(&self.address)
    }
}

impl FromStr for HostCidr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !trimmed.contains('/') {
            return Err(ParseError::InvalidCidr(s.to_string()));
        }
        let raw: IpNetwork = trimmed
            .parse()
            .map_err(|_| ParseError::InvalidCidr(s.to_string()))?;
        let network = IpNetwork::new(raw.network(), raw.prefix())
            .map_err(|_| ParseError::InvalidCidr(s.to_string()))?;
        Ok(HostCidr {
            address: raw.ip(),
            network,
        })
    }
}

impl fmt::Display for HostCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.network.prefix())
    }
}
