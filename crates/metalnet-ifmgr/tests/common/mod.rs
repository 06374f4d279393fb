//! Shared fixture for the interface manager integration tests.

#![allow(dead_code)]

use ipnetwork::IpNetwork;
use metalnet_common::MetalnetConfig;
use metalnet_ifmgr::types::{LinkView, NodeStatus};
use metalnet_ifmgr::{
    IfMgr, InterfaceId, InterfaceSpec, InterfaceType, LinkMode, MemorySink, NetworkStore, NodeId,
    SubnetId, SubnetSpec,
};
use metalnet_types::MacAddress;
use std::net::IpAddr;
use std::sync::Arc;

pub const ETH0_MAC: &str = "aa:bb:cc:dd:ee:01";

pub fn mac(s: &str) -> MacAddress {
    s.parse().expect("valid MAC")
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid IP")
}

pub fn net(s: &str) -> IpNetwork {
    s.parse().expect("valid CIDR")
}

/// A node with one enabled physical interface `eth0` on the untagged VLAN,
/// and two subnets on that VLAN.
pub struct Fixture {
    pub mgr: IfMgr,
    pub events: Arc<MemorySink>,
    pub node: NodeId,
    pub eth0: InterfaceId,
    /// 10.0.0.0/24, gateway 10.0.0.1
    pub subnet1: SubnetId,
    /// 10.0.1.0/24
    pub subnet2: SubnetId,
}

impl Fixture {
    pub fn new() -> Self {
        let events = Arc::new(MemorySink::new());
        let mut store = NetworkStore::new();
        let node = store.add_node("node-1", NodeStatus::Deployed);
        let subnet1 = store
            .add_subnet(SubnetSpec::new(net("10.0.0.0/24")).with_gateway(ip("10.0.0.1")))
            .expect("subnet1");
        let subnet2 = store
            .add_subnet(SubnetSpec::new(net("10.0.1.0/24")))
            .expect("subnet2");
        let default_vlan = store.default_vlan();

        let mut mgr = IfMgr::new(store, MetalnetConfig::default(), events.clone());
        let eth0 = mgr
            .create(
                InterfaceType::Physical,
                InterfaceSpec::named("eth0")
                    .on_node(node)
                    .with_mac(mac(ETH0_MAC))
                    .with_vlan(default_vlan),
                &[],
            )
            .expect("eth0");
        events.clear();

        Self {
            mgr,
            events,
            node,
            eth0,
            subnet1,
            subnet2,
        }
    }

    pub fn physical(&mut self, name: &str, mac_address: &str) -> InterfaceId {
        self.physical_on(self.node, name, mac_address)
    }

    pub fn physical_on(&mut self, node: NodeId, name: &str, mac_address: &str) -> InterfaceId {
        let vlan = self.mgr.store().default_vlan();
        self.mgr
            .create(
                InterfaceType::Physical,
                InterfaceSpec::named(name)
                    .on_node(node)
                    .with_mac(mac(mac_address))
                    .with_vlan(vlan),
                &[],
            )
            .expect("physical interface")
    }

    pub fn links(&self, iface: InterfaceId) -> Vec<LinkView> {
        self.mgr.links(iface).expect("interface exists")
    }

    pub fn modes(&self, iface: InterfaceId) -> Vec<LinkMode> {
        self.links(iface).iter().map(|l| l.mode).collect()
    }

    pub fn enabled(&self, iface: InterfaceId) -> bool {
        self.mgr
            .store()
            .interface(iface)
            .expect("interface exists")
            .is_enabled()
    }
}
