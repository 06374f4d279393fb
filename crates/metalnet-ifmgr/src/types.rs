//! Records held by the network store

use ipnetwork::IpNetwork;
use metalnet_common::NetError;
use metalnet_types::{AddressFamily, Vid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

typed_id!(
    /// Interface identifier
    InterfaceId
);
typed_id!(
    /// Address link identifier, stable across in-place mode changes
    LinkId
);
typed_id!(SubnetId);
typed_id!(VlanId);
typed_id!(FabricId);
typed_id!(SpaceId);
typed_id!(NodeId);
typed_id!(UserId);
typed_id!(RelationshipId);

/// Lifecycle state of a machine, as far as the network core cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    New,
    Ready,
    Allocated,
    Deployed,
    Retired,
}

/// A managed machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub hostname: String,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fabric {
    pub id: FabricId,
    pub name: String,
    pub class_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: SpaceId,
    pub name: String,
}

/// A layer-2 segment on a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    pub id: VlanId,
    pub vid: Vid,
    pub name: Option<String>,
    pub fabric: FabricId,
    pub mtu: u32,
    /// DHCP on this VLAN is served by the controller itself.
    pub dhcp_on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpRangeKind {
    /// Handed out by DHCP.
    Dynamic,
    /// Kept out of allocation entirely.
    Reserved,
}

/// Inclusive address range inside a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub start: IpAddr,
    pub end: IpAddr,
    pub kind: IpRangeKind,
}

impl IpRange {
    pub fn dynamic(start: IpAddr, end: IpAddr) -> Self {
        Self {
            start,
            end,
            kind: IpRangeKind::Dynamic,
        }
    }

    pub fn reserved(start: IpAddr, end: IpAddr) -> Self {
        Self {
            start,
            end,
            kind: IpRangeKind::Reserved,
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        AddressFamily::of_addr(ip) == AddressFamily::of_addr(&self.start)
            && self.start <= *ip
            && *ip <= self.end
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// An IP network attached to a VLAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: SubnetId,
    pub name: String,
    pub cidr: IpNetwork,
    pub vlan: VlanId,
    pub space: Option<SpaceId>,
    pub gateway_ip: Option<IpAddr>,
    pub ranges: Vec<IpRange>,
}

impl Subnet {
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of_network(&self.cidr)
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.cidr.contains(*ip)
    }

    /// Returns the dynamic range covering `ip`, if any.
    pub fn dynamic_range_for(&self, ip: &IpAddr) -> Option<&IpRange> {
        self.ranges
            .iter()
            .find(|range| range.kind == IpRangeKind::Dynamic && range.contains(ip))
    }

    pub fn is_in_dynamic_range(&self, ip: &IpAddr) -> bool {
        self.dynamic_range_for(ip).is_some()
    }
}

/// Attributes for adding a subnet to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetSpec {
    pub cidr: IpNetwork,
    pub name: Option<String>,
    /// Defaults to the untagged VLAN of the default fabric.
    pub vlan: Option<VlanId>,
    pub space: Option<SpaceId>,
    pub gateway_ip: Option<IpAddr>,
    pub ranges: Vec<IpRange>,
}

impl SubnetSpec {
    pub fn new(cidr: IpNetwork) -> Self {
        Self {
            cidr,
            name: None,
            vlan: None,
            space: None,
            gateway_ip: None,
            ranges: Vec::new(),
        }
    }

    pub fn on_vlan(mut self, vlan: VlanId) -> Self {
        self.vlan = Some(vlan);
        self
    }

    pub fn in_space(mut self, space: SpaceId) -> Self {
        self.space = Some(space);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway_ip = Some(gateway);
        self
    }

    pub fn with_range(mut self, range: IpRange) -> Self {
        self.ranges.push(range);
        self
    }
}

/// How an address link came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocType {
    /// Operator-chosen static address, or a LINK_UP marker when no ip is set.
    Sticky,
    /// Static address held on behalf of a user.
    UserReserved,
    Dhcp,
    /// Address drawn from the pool when the machine is deployed.
    Auto,
    /// Observed on the machine; never configured.
    Discovered,
}

impl AllocType {
    /// Human readable name used in log lines.
    pub fn log_name(&self) -> &'static str {
        match self {
            AllocType::Sticky => "Static",
            AllocType::UserReserved => "User reserved",
            AllocType::Dhcp => "DHCP",
            AllocType::Auto => "Automatic",
            AllocType::Discovered => "Discovered",
        }
    }
}

/// Interface link mode, derived from an address link's allocation type and ip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    Auto,
    Dhcp,
    Static,
    LinkUp,
    Discovered,
}

impl LinkMode {
    /// Allocation type a link takes on when switched to this mode.
    pub fn alloc_type(&self) -> AllocType {
        match self {
            LinkMode::Auto => AllocType::Auto,
            LinkMode::Dhcp => AllocType::Dhcp,
            LinkMode::Static | LinkMode::LinkUp => AllocType::Sticky,
            LinkMode::Discovered => AllocType::Discovered,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkMode::Auto => "auto",
            LinkMode::Dhcp => "dhcp",
            LinkMode::Static => "static",
            LinkMode::LinkUp => "link_up",
            LinkMode::Discovered => "discovered",
        }
    }
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkMode {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(LinkMode::Auto),
            "dhcp" => Ok(LinkMode::Dhcp),
            "static" => Ok(LinkMode::Static),
            "link_up" => Ok(LinkMode::LinkUp),
            "discovered" => Ok(LinkMode::Discovered),
            _ => Err(NetError::validation("mode", format!("Unknown link mode: {}", s))),
        }
    }
}

/// An interface-to-address assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLink {
    pub id: LinkId,
    pub alloc_type: AllocType,
    /// `None` until an address is claimed.
    pub ip: Option<IpAddr>,
    pub subnet: Option<SubnetId>,
    /// Only meaningful for [`AllocType::UserReserved`].
    pub user: Option<UserId>,
}

impl AddressLink {
    pub fn link_type(&self) -> LinkMode {
        match self.alloc_type {
            AllocType::Sticky if self.ip.is_some() => LinkMode::Static,
            AllocType::Sticky => LinkMode::LinkUp,
            AllocType::UserReserved => LinkMode::Static,
            AllocType::Dhcp => LinkMode::Dhcp,
            AllocType::Auto => LinkMode::Auto,
            AllocType::Discovered => LinkMode::Discovered,
        }
    }

    pub fn is_discovered(&self) -> bool {
        self.alloc_type == AllocType::Discovered
    }
}

/// Parent/child edge between two interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRelationship {
    pub id: RelationshipId,
    pub child: InterfaceId,
    pub parent: InterfaceId,
}

/// A configured link as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkView {
    pub id: LinkId,
    pub mode: LinkMode,
    pub ip: Option<IpAddr>,
    pub subnet: Option<SubnetId>,
}

/// An address observed on an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredView {
    pub ip: IpAddr,
    pub subnet: Option<SubnetId>,
}

/// Optional arguments of a STATIC link request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkOptions {
    /// Exact address to claim; one is allocated when unset.
    pub ip: Option<IpAddr>,
    /// `Sticky` (default) or `UserReserved`.
    pub alloc_type: Option<AllocType>,
    pub user: Option<UserId>,
}

impl LinkOptions {
    pub fn with_ip(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            ..Self::default()
        }
    }

    pub fn reserved_for(user: UserId) -> Self {
        Self {
            alloc_type: Some(AllocType::UserReserved),
            user: Some(user),
            ..Self::default()
        }
    }
}
