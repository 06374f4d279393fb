//! Value types shared by the machine networking crates.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`Vid`]: IEEE 802.1Q VLAN tags, including the untagged VLAN (0)
//! - [`AddressFamily`] and [`HostCidr`]: IP family and host-within-network parsing
//! - [`validate_interface_name`]: the interface name charset check

mod ip;
mod mac;
mod name;
mod vid;

pub use ip::{AddressFamily, HostCidr};
pub use mac::MacAddress;
pub use name::{validate_interface_name, INTERFACE_NAME_MAX_LEN};
pub use vid::Vid;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("invalid VLAN tag: {0} (must be 0-4094)")]
    InvalidVid(String),

    #[error("invalid interface name: {0}")]
    InvalidInterfaceName(String),
}
