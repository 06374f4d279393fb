//! Interface Manager - machine network interfaces and address links
//!
//! metalnet-ifmgr models the network side of managed machines:
//! - Interface graph (physical, bond, bridge, VLAN, unknown) with derived
//!   fields propagated from parents to children
//! - Address pool allocation per subnet, honouring reserved and dynamic ranges
//! - Link state machine (AUTO, DHCP, STATIC, LINK_UP, DISCOVERED)
//! - Specifier queries such as `name:eth0` or `vid:untagged`

pub mod events;
pub mod fields;
pub mod graph;
pub mod if_mgr;
pub mod interface;
pub mod link;
pub mod pool;
pub mod specifier;
pub mod store;
pub mod types;

pub use events::{EventSink, EvictionReason, MemorySink, NetEvent, TracingSink};
pub use if_mgr::IfMgr;
pub use interface::{Interface, InterfaceChange, InterfaceRecord, InterfaceSpec, InterfaceType};
pub use specifier::{InterfaceFilter, SpecifierQuery};
pub use store::NetworkStore;
pub use types::{
    AddressLink, AllocType, InterfaceId, LinkId, LinkMode, LinkOptions, NodeId, SubnetId,
    SubnetSpec, VlanId,
};
