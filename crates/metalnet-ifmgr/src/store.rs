//! In-memory network store.
//!
//! Holds every record the core reads or writes, keyed by typed ids that
//! are never reused. Iteration is in id order, so creation order decides
//! "first parent" and "first subnet" lookups.

use ipnetwork::IpNetwork;
use metalnet_common::{NetError, NetResult, Table};
use metalnet_types::{AddressFamily, MacAddress, Vid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::fields::{DEFAULT_FABRIC_NAME, DEFAULT_VLAN_NAME};
use crate::interface::{Interface, InterfaceType};
use crate::types::*;

const DEFAULT_VLAN_MTU: u32 = 1500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct IdCounters {
    node: u64,
    fabric: u64,
    space: u64,
    vlan: u64,
    subnet: u64,
    interface: u64,
    link: u64,
    relationship: u64,
}

fn bump(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

/// Tables for nodes, fabrics, VLANs, subnets, interfaces and address links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStore {
    nodes: Table<NodeId, Node>,
    fabrics: Table<FabricId, Fabric>,
    spaces: Table<SpaceId, Space>,
    vlans: Table<VlanId, Vlan>,
    subnets: Table<SubnetId, Subnet>,
    interfaces: Table<InterfaceId, Interface>,
    links: Table<LinkId, AddressLink>,
    relationships: Table<RelationshipId, InterfaceRelationship>,
    /// Interface to address link assignments.
    interface_links: BTreeSet<(InterfaceId, LinkId)>,
    default_vlan: VlanId,
    counters: IdCounters,
}

impl Default for NetworkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStore {
    /// Creates a store holding only the default fabric and its untagged VLAN.
    pub fn new() -> Self {
        let mut store = Self {
            nodes: Table::new(),
            fabrics: Table::new(),
            spaces: Table::new(),
            vlans: Table::new(),
            subnets: Table::new(),
            interfaces: Table::new(),
            links: Table::new(),
            relationships: Table::new(),
            interface_links: BTreeSet::new(),
            default_vlan: VlanId(0),
            counters: IdCounters::default(),
        };
        let fabric = store.add_fabric(DEFAULT_FABRIC_NAME, None);
        store.default_vlan = store.add_vlan(
            fabric,
            Vid::UNTAGGED,
            Some(DEFAULT_VLAN_NAME),
            DEFAULT_VLAN_MTU,
            false,
        );
        store
    }

    /// Untagged VLAN of the default fabric; auto-created subnets land here.
    pub fn default_vlan(&self) -> VlanId {
        self.default_vlan
    }

    // Nodes, fabrics, spaces and VLANs

    pub fn add_node(&mut self, hostname: impl Into<String>, status: NodeStatus) -> NodeId {
        let id = NodeId(bump(&mut self.counters.node));
        self.nodes.insert(
            id,
            Node {
                id,
                hostname: hostname.into(),
                status,
            },
        );
        id
    }

    pub fn set_node_status(&mut self, id: NodeId, status: NodeStatus) -> NetResult<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| NetError::not_found("node", id))?;
        node.status = status;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn add_fabric(&mut self, name: impl Into<String>, class_type: Option<&str>) -> FabricId {
        let id = FabricId(bump(&mut self.counters.fabric));
        self.fabrics.insert(
            id,
            Fabric {
                id,
                name: name.into(),
                class_type: class_type.map(str::to_string),
            },
        );
        id
    }

    pub fn fabric(&self, id: FabricId) -> Option<&Fabric> {
        self.fabrics.get(&id)
    }

    pub fn fabrics(&self) -> impl Iterator<Item = &Fabric> {
        self.fabrics.values()
    }

    pub fn add_space(&mut self, name: impl Into<String>) -> SpaceId {
        let id = SpaceId(bump(&mut self.counters.space));
        self.spaces.insert(
            id,
            Space {
                id,
                name: name.into(),
            },
        );
        id
    }

    pub fn space(&self, id: SpaceId) -> Option<&Space> {
        self.spaces.get(&id)
    }

    pub fn spaces(&self) -> impl Iterator<Item = &Space> {
        self.spaces.values()
    }

    pub fn add_vlan(
        &mut self,
        fabric: FabricId,
        vid: Vid,
        name: Option<&str>,
        mtu: u32,
        dhcp_on: bool,
    ) -> VlanId {
        let id = VlanId(bump(&mut self.counters.vlan));
        self.vlans.insert(
            id,
            Vlan {
                id,
                vid,
                name: name.map(str::to_string),
                fabric,
                mtu,
                dhcp_on,
            },
        );
        id
    }

    pub fn vlan(&self, id: VlanId) -> Option<&Vlan> {
        self.vlans.get(&id)
    }

    pub fn vlans(&self) -> impl Iterator<Item = &Vlan> {
        self.vlans.values()
    }

    pub fn set_vlan_dhcp(&mut self, id: VlanId, dhcp_on: bool) -> NetResult<()> {
        let vlan = self
            .vlans
            .get_mut(&id)
            .ok_or_else(|| NetError::not_found("vlan", id))?;
        vlan.dhcp_on = dhcp_on;
        Ok(())
    }

    // Subnets

    /// Adds a subnet; the CIDR must be unique and the VLAN must exist.
    pub fn add_subnet(&mut self, spec: SubnetSpec) -> NetResult<SubnetId> {
        let cidr = IpNetwork::new(spec.cidr.network(), spec.cidr.prefix())
            .map_err(|e| NetError::validation("cidr", e.to_string()))?;
        if self.subnet_by_cidr(&cidr).is_some() {
            return Err(NetError::validation(
                "cidr",
                format!("Subnet with CIDR {} already exists.", cidr),
            ));
        }
        let vlan = spec.vlan.unwrap_or(self.default_vlan);
        if !self.vlans.contains_key(&vlan) {
            return Err(NetError::not_found("vlan", vlan));
        }
        if let Some(space) = spec.space {
            if !self.spaces.contains_key(&space) {
                return Err(NetError::not_found("space", space));
            }
        }
        for range in &spec.ranges {
            if !cidr.contains(range.start) || !cidr.contains(range.end) || range.start > range.end {
                return Err(NetError::out_of_range(
                    range,
                    format!("Range is not inside subnet {}.", cidr),
                ));
            }
        }

        let id = SubnetId(bump(&mut self.counters.subnet));
        self.subnets.insert(
            id,
            Subnet {
                id,
                name: spec.name.unwrap_or_else(|| cidr.to_string()),
                cidr,
                vlan,
                space: spec.space,
                gateway_ip: spec.gateway_ip,
                ranges: spec.ranges,
            },
        );
        Ok(id)
    }

    pub fn subnet(&self, id: SubnetId) -> Option<&Subnet> {
        self.subnets.get(&id)
    }

    pub fn try_subnet(&self, id: SubnetId) -> NetResult<&Subnet> {
        self.subnet(id).ok_or_else(|| NetError::not_found("subnet", id))
    }

    pub fn subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.subnets.values()
    }

    /// Exact CIDR lookup.
    pub fn subnet_by_cidr(&self, cidr: &IpNetwork) -> Option<&Subnet> {
        self.subnets.values().find(|s| s.cidr == *cidr)
    }

    pub fn subnets_on_vlan(&self, vlan: VlanId) -> impl Iterator<Item = &Subnet> {
        self.subnets.values().filter(move |s| s.vlan == vlan)
    }

    // Interfaces

    pub(crate) fn next_interface_id(&mut self) -> InterfaceId {
        InterfaceId(bump(&mut self.counters.interface))
    }

    pub fn interface(&self, id: InterfaceId) -> Option<&Interface> {
        self.interfaces.get(&id)
    }

    pub fn try_interface(&self, id: InterfaceId) -> NetResult<&Interface> {
        self.interface(id)
            .ok_or_else(|| NetError::not_found("interface", id))
    }

    pub(crate) fn interface_mut(&mut self, id: InterfaceId) -> NetResult<&mut Interface> {
        self.interfaces
            .get_mut(&id)
            .ok_or_else(|| NetError::not_found("interface", id))
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    pub(crate) fn insert_interface(&mut self, interface: Interface) {
        self.interfaces.insert(interface.id(), interface);
    }

    /// Removes the interface with its edges and link assignments. Links
    /// themselves are left to the caller.
    pub(crate) fn remove_interface(&mut self, id: InterfaceId) -> Option<Interface> {
        self.relationships
            .retain(|_, rel| rel.child != id && rel.parent != id);
        self.interface_links.retain(|(iface, _)| *iface != id);
        self.interfaces.remove(&id)
    }

    pub fn interfaces_on_node(&self, node: NodeId) -> impl Iterator<Item = &Interface> {
        self.interfaces
            .values()
            .filter(move |i| i.node() == Some(node))
    }

    pub fn interfaces_with_mac(&self, mac: MacAddress) -> impl Iterator<Item = &Interface> {
        self.interfaces
            .values()
            .filter(move |i| i.mac_address() == Some(mac))
    }

    // Relationships

    pub(crate) fn add_relationship(&mut self, child: InterfaceId, parent: InterfaceId) {
        if self.has_relationship(child, parent) {
            return;
        }
        let id = RelationshipId(bump(&mut self.counters.relationship));
        self.relationships.insert(id, InterfaceRelationship { id, child, parent });
    }

    pub(crate) fn remove_relationship(&mut self, child: InterfaceId, parent: InterfaceId) -> bool {
        let before = self.relationships.len();
        self.relationships
            .retain(|_, rel| !(rel.child == child && rel.parent == parent));
        before != self.relationships.len()
    }

    pub(crate) fn clear_parents(&mut self, child: InterfaceId) {
        self.relationships.retain(|_, rel| rel.child != child);
    }

    pub fn has_relationship(&self, child: InterfaceId, parent: InterfaceId) -> bool {
        self.relationships
            .values()
            .any(|rel| rel.child == child && rel.parent == parent)
    }

    /// Parents of `child` in the order the edges were created.
    pub fn parents_of(&self, child: InterfaceId) -> Vec<InterfaceId> {
        self.relationships
            .values()
            .filter(|rel| rel.child == child)
            .map(|rel| rel.parent)
            .collect()
    }

    /// Children of `parent` in the order the edges were created.
    pub fn children_of(&self, parent: InterfaceId) -> Vec<InterfaceId> {
        self.relationships
            .values()
            .filter(|rel| rel.parent == parent)
            .map(|rel| rel.child)
            .collect()
    }

    // Address links

    pub(crate) fn create_link(
        &mut self,
        alloc_type: AllocType,
        ip: Option<IpAddr>,
        subnet: Option<SubnetId>,
        user: Option<UserId>,
    ) -> LinkId {
        let id = LinkId(bump(&mut self.counters.link));
        self.links.insert(
            id,
            AddressLink {
                id,
                alloc_type,
                ip,
                subnet,
                user,
            },
        );
        id
    }

    pub fn link(&self, id: LinkId) -> Option<&AddressLink> {
        self.links.get(&id)
    }

    pub fn try_link(&self, id: LinkId) -> NetResult<&AddressLink> {
        self.link(id).ok_or_else(|| NetError::not_found("link", id))
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> NetResult<&mut AddressLink> {
        self.links
            .get_mut(&id)
            .ok_or_else(|| NetError::not_found("link", id))
    }

    pub fn links(&self) -> impl Iterator<Item = &AddressLink> {
        self.links.values()
    }

    /// Deletes the link and every assignment of it.
    pub(crate) fn remove_link(&mut self, id: LinkId) -> Option<AddressLink> {
        self.interface_links.retain(|(_, link)| *link != id);
        self.links.remove(&id)
    }

    /// Assigns `link` to `interface`; both must exist.
    pub(crate) fn attach_link(&mut self, interface: InterfaceId, link: LinkId) -> NetResult<()> {
        self.try_interface(interface)?;
        self.try_link(link)?;
        self.interface_links.insert((interface, link));
        Ok(())
    }

    pub(crate) fn detach_link(&mut self, interface: InterfaceId, link: LinkId) {
        self.interface_links.remove(&(interface, link));
    }

    /// Links assigned to `interface`, in id order.
    pub fn links_of(&self, interface: InterfaceId) -> Vec<LinkId> {
        self.interface_links
            .range((interface, LinkId(0))..=(interface, LinkId(u64::MAX)))
            .map(|(_, link)| *link)
            .collect()
    }

    /// Interfaces that hold `link`.
    pub fn interfaces_of_link(&self, link: LinkId) -> Vec<InterfaceId> {
        self.interface_links
            .iter()
            .filter(|(_, l)| *l == link)
            .map(|(iface, _)| *iface)
            .collect()
    }

    /// Links carrying exactly `ip`, of any allocation type.
    pub fn links_with_ip(&self, ip: IpAddr) -> Vec<LinkId> {
        self.links
            .values()
            .filter(|l| l.ip == Some(ip))
            .map(|l| l.id)
            .collect()
    }

    /// Family of a link: its address if set, else its subnet's.
    pub fn link_family(&self, link: &AddressLink) -> Option<AddressFamily> {
        match (link.ip, link.subnet) {
            (Some(ip), _) => Some(AddressFamily::of_addr(&ip)),
            (None, Some(subnet)) => self.subnet(subnet).map(Subnet::family),
            (None, None) => None,
        }
    }

    /// Exchanges the contents of two links so that `keep` carries what
    /// `other` held, and vice versa. Assignments follow the contents.
    pub(crate) fn swap_link_ids(&mut self, keep: LinkId, other: LinkId) -> NetResult<()> {
        let mut a = self
            .links
            .remove(&keep)
            .ok_or_else(|| NetError::not_found("link", keep))?;
        let mut b = match self.links.remove(&other) {
            Some(b) => b,
            None => {
                self.links.insert(keep, a);
                return Err(NetError::not_found("link", other));
            }
        };
        std::mem::swap(&mut a.id, &mut b.id);
        self.links.insert(a.id, a);
        self.links.insert(b.id, b);

        self.interface_links = self
            .interface_links
            .iter()
            .map(|&(iface, link)| {
                if link == keep {
                    (iface, other)
                } else if link == other {
                    (iface, keep)
                } else {
                    (iface, link)
                }
            })
            .collect();
        Ok(())
    }

    /// Node that owns `link` through its first holding interface.
    pub fn node_of_link(&self, link: LinkId) -> Option<&Node> {
        self.interfaces_of_link(link)
            .into_iter()
            .filter_map(|iface| self.interface(iface))
            .find_map(|iface| iface.node())
            .and_then(|node| self.node(node))
    }

    /// True if `link` is held by exactly one interface and it is Unknown.
    pub fn is_linked_to_one_unknown_interface(&self, link: LinkId) -> bool {
        match self.interfaces_of_link(link).as_slice() {
            [only] => self
                .interface(*only)
                .is_some_and(|i| i.kind() == InterfaceType::Unknown),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::InterfaceRecord;
    use pretty_assertions::assert_eq;

    fn physical(store: &mut NetworkStore, name: &str) -> InterfaceId {
        let id = store.next_interface_id();
        store.insert_interface(Interface::Physical(InterfaceRecord {
            id,
            name: name.to_string(),
            node: None,
            mac_address: None,
            vlan: None,
            enabled: true,
            tags: Default::default(),
            params: Default::default(),
            ipv4_params: Default::default(),
            ipv6_params: Default::default(),
            acquired: false,
        }));
        id
    }

    #[test]
    fn test_new_store_has_default_vlan() {
        let store = NetworkStore::new();
        let vlan = store.vlan(store.default_vlan()).unwrap();
        assert!(vlan.vid.is_untagged());
        assert_eq!(store.fabric(vlan.fabric).unwrap().name, "fabric-0");
    }

    #[test]
    fn test_add_subnet_normalizes_and_rejects_duplicates() {
        let mut store = NetworkStore::new();
        let id = store
            .add_subnet(SubnetSpec::new("10.0.0.7/24".parse().unwrap()))
            .unwrap();
        let subnet = store.subnet(id).unwrap();
        assert_eq!(subnet.cidr.to_string(), "10.0.0.0/24");
        assert_eq!(subnet.vlan, store.default_vlan());

        let err = store
            .add_subnet(SubnetSpec::new("10.0.0.0/24".parse().unwrap()))
            .unwrap_err();
        assert_eq!(err.kind(), metalnet_common::ErrorKind::ValidationFailure);
    }

    #[test]
    fn test_relationship_order() {
        let mut store = NetworkStore::new();
        let a = physical(&mut store, "eth0");
        let b = physical(&mut store, "eth1");
        let bond = physical(&mut store, "bond0");
        store.add_relationship(bond, b);
        store.add_relationship(bond, a);
        store.add_relationship(bond, a);
        assert_eq!(store.parents_of(bond), vec![b, a]);
        assert_eq!(store.children_of(a), vec![bond]);

        assert!(store.remove_relationship(bond, b));
        assert_eq!(store.parents_of(bond), vec![a]);
    }

    #[test]
    fn test_swap_link_ids_moves_contents_and_assignments() {
        let mut store = NetworkStore::new();
        let eth0 = physical(&mut store, "eth0");
        let eth1 = physical(&mut store, "eth1");
        let old = store.create_link(AllocType::Dhcp, None, None, None);
        let new = store.create_link(AllocType::Sticky, Some("10.0.0.5".parse().unwrap()), None, None);
        store.attach_link(eth0, old).unwrap();
        store.attach_link(eth1, new).unwrap();

        store.swap_link_ids(old, new).unwrap();

        assert_eq!(store.link(old).unwrap().alloc_type, AllocType::Sticky);
        assert_eq!(store.link(new).unwrap().alloc_type, AllocType::Dhcp);
        assert_eq!(store.links_of(eth1), vec![old]);
        assert_eq!(store.links_of(eth0), vec![new]);
    }

    #[test]
    fn test_remove_interface_drops_edges_and_assignments() {
        let mut store = NetworkStore::new();
        let eth0 = physical(&mut store, "eth0");
        let br = physical(&mut store, "br0");
        store.add_relationship(br, eth0);
        let link = store.create_link(AllocType::Sticky, None, None, None);
        store.attach_link(eth0, link).unwrap();

        store.remove_interface(eth0);
        assert!(store.parents_of(br).is_empty());
        assert!(store.interfaces_of_link(link).is_empty());
        assert!(store.link(link).is_some());
    }

    #[test]
    fn test_attach_link_requires_both_ends() {
        let mut store = NetworkStore::new();
        let eth0 = physical(&mut store, "eth0");
        let link = store.create_link(AllocType::Sticky, None, None, None);
        store.remove_interface(eth0);

        assert!(store.attach_link(eth0, link).is_err());
        assert!(store.attach_link(InterfaceId(999), LinkId(999)).is_err());
        assert!(store.interfaces_of_link(link).is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut store = NetworkStore::new();
        let eth0 = physical(&mut store, "eth0");
        let link = store.create_link(AllocType::Auto, None, None, None);
        store.attach_link(eth0, link).unwrap();

        let json = serde_json::to_string(&store).unwrap();
        let back: NetworkStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
