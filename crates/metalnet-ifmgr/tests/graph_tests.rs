//! Integration tests for the interface graph
//!
//! Covers:
//! - Derived fields after parent edits
//! - Composition rules
//! - Reconciliation of observed interfaces on a node
//! - Delete cascades and acquired bridges

mod common;

use common::{ip, mac, Fixture, ETH0_MAC};
use metalnet_common::ErrorKind;
use metalnet_ifmgr::types::NodeStatus;
use metalnet_ifmgr::{
    InterfaceChange, InterfaceSpec, InterfaceType, LinkMode, LinkOptions, NetEvent,
};
use metalnet_types::Vid;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_bond_enabled_follows_parents() {
    let mut fx = Fixture::new();
    let eth1 = fx
        .mgr
        .create(
            InterfaceType::Physical,
            InterfaceSpec::named("eth1")
                .on_node(fx.node)
                .with_mac(mac("aa:bb:cc:dd:ee:02"))
                .disabled(),
            &[],
        )
        .unwrap();
    let bond = fx
        .mgr
        .create(
            InterfaceType::Bond,
            InterfaceSpec::named("bond0").with_mac(mac("aa:bb:cc:dd:ee:10")),
            &[fx.eth0],
        )
        .unwrap();
    assert!(fx.enabled(bond));
    assert_eq!(fx.mgr.store().interface(bond).unwrap().node(), Some(fx.node));

    fx.mgr.attach_parent(bond, eth1).unwrap();
    assert!(fx.enabled(bond));

    fx.mgr.detach_parent(bond, fx.eth0).unwrap();
    assert!(!fx.enabled(bond));

    fx.mgr.attach_parent(bond, fx.eth0).unwrap();
    assert!(fx.enabled(bond));

    let disable = InterfaceChange {
        enabled: Some(false),
        ..InterfaceChange::default()
    };
    fx.mgr.update(fx.eth0, disable).unwrap();
    assert!(!fx.enabled(bond));

    let enable = InterfaceChange {
        enabled: Some(true),
        ..InterfaceChange::default()
    };
    fx.mgr.update(eth1, enable).unwrap();
    assert!(fx.enabled(bond));
}

#[test]
fn test_vlan_mirrors_parent() {
    let mut fx = Fixture::new();
    let default_vlan = fx.mgr.store().default_vlan();
    let fabric = fx.mgr.store().vlan(default_vlan).unwrap().fabric;
    let vlan100 = fx
        .mgr
        .store_mut()
        .add_vlan(fabric, Vid::new(100).unwrap(), None, 1500, false);

    let vlan_iface = fx
        .mgr
        .create(
            InterfaceType::Vlan,
            InterfaceSpec::default().with_vlan(vlan100),
            &[fx.eth0],
        )
        .unwrap();
    let iface = fx.mgr.store().interface(vlan_iface).unwrap();
    assert_eq!(iface.name(), "eth0.100");
    assert_eq!(iface.mac_address(), Some(mac(ETH0_MAC)));
    assert_eq!(iface.node(), Some(fx.node));

    let change = InterfaceChange {
        name: Some("eno1".to_string()),
        enabled: Some(false),
        ..InterfaceChange::default()
    };
    fx.mgr.update(fx.eth0, change).unwrap();
    let iface = fx.mgr.store().interface(vlan_iface).unwrap();
    assert_eq!(iface.name(), "eno1.100");
    assert!(!iface.is_enabled());
}

#[test]
fn test_bond_rejects_bridge_parent() {
    let mut fx = Fixture::new();
    let eth1 = fx.physical("eth1", "aa:bb:cc:dd:ee:02");
    let bridge = fx
        .mgr
        .create(
            InterfaceType::Bridge,
            InterfaceSpec::named("br0").with_mac(mac("aa:bb:cc:dd:ee:20")),
            &[eth1],
        )
        .unwrap();
    let before = fx.mgr.store().interfaces().count();

    let err = fx
        .mgr
        .create(
            InterfaceType::Bond,
            InterfaceSpec::named("bond0").with_mac(mac("aa:bb:cc:dd:ee:10")),
            &[fx.eth0, bridge],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidComposition);
    assert_eq!(fx.mgr.store().interfaces().count(), before);
}

#[test]
fn test_vlan_rejects_two_parents() {
    let mut fx = Fixture::new();
    let eth1 = fx.physical("eth1", "aa:bb:cc:dd:ee:02");
    let default_vlan = fx.mgr.store().default_vlan();
    let fabric = fx.mgr.store().vlan(default_vlan).unwrap().fabric;
    let vlan100 = fx
        .mgr
        .store_mut()
        .add_vlan(fabric, Vid::new(100).unwrap(), None, 1500, false);

    let err = fx
        .mgr
        .create(
            InterfaceType::Vlan,
            InterfaceSpec::default().with_vlan(vlan100),
            &[fx.eth0, eth1],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidComposition);
}

#[test]
fn test_structural_rules() {
    let mut fx = Fixture::new();
    let node2 = fx.mgr.store_mut().add_node("node-2", NodeStatus::Ready);
    let other = fx.physical_on(node2, "eth0", "aa:bb:cc:dd:ee:03");

    let err = fx
        .mgr
        .create(
            InterfaceType::Bond,
            InterfaceSpec::named("bond0").with_mac(mac("aa:bb:cc:dd:ee:10")),
            &[fx.eth0, other],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidComposition);

    let err = fx
        .mgr
        .create(
            InterfaceType::Physical,
            InterfaceSpec::named("eth9")
                .on_node(fx.node)
                .with_mac(mac("aa:bb:cc:dd:ee:09")),
            &[fx.eth0],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidComposition);

    let bridge = fx
        .mgr
        .create(
            InterfaceType::Bridge,
            InterfaceSpec::named("br0").with_mac(mac("aa:bb:cc:dd:ee:20")),
            &[fx.eth0],
        )
        .unwrap();
    let err = fx.mgr.attach_parent(bridge, bridge).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidComposition);
    assert!(!fx.mgr.store().has_relationship(bridge, bridge));
}

#[test]
fn test_physical_mac_must_be_unique() {
    let mut fx = Fixture::new();
    let err = fx
        .mgr
        .create(
            InterfaceType::Physical,
            InterfaceSpec::named("eth1")
                .on_node(fx.node)
                .with_mac(mac(ETH0_MAC)),
            &[],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert!(fx.mgr.is_mac_registered(mac(ETH0_MAC)));
    assert!(!fx.mgr.is_mac_registered(mac("aa:bb:cc:dd:ee:99")));
}

#[test]
fn test_get_or_create_reuses_child() {
    let mut fx = Fixture::new();
    let spec = InterfaceSpec::named("bond0").with_mac(mac("aa:bb:cc:dd:ee:10"));
    let (bond, created) = fx
        .mgr
        .get_or_create(InterfaceType::Bond, spec.clone(), &[fx.eth0])
        .unwrap();
    assert!(created);

    let (again, created) = fx
        .mgr
        .get_or_create(InterfaceType::Bond, spec, &[fx.eth0])
        .unwrap();
    assert!(!created);
    assert_eq!(again, bond);
}

#[test]
fn test_get_or_create_on_node_renames_in_place() {
    let mut fx = Fixture::new();
    let found = fx
        .mgr
        .get_or_create_on_node(InterfaceType::Physical, fx.node, "eno1", Some(mac(ETH0_MAC)), &[])
        .unwrap();
    assert_eq!(found, fx.eth0);
    assert_eq!(fx.mgr.store().interface(fx.eth0).unwrap().name(), "eno1");
}

#[test]
fn test_get_or_create_on_node_replaces_stale_type() {
    let mut fx = Fixture::new();
    let bond_mac = "aa:bb:cc:dd:ee:10";
    let bond = fx
        .mgr
        .create(
            InterfaceType::Bond,
            InterfaceSpec::named("bond0").with_mac(mac(bond_mac)),
            &[fx.eth0],
        )
        .unwrap();

    let physical = fx
        .mgr
        .get_or_create_on_node(InterfaceType::Physical, fx.node, "bond0", Some(mac(bond_mac)), &[])
        .unwrap();
    assert_ne!(physical, bond);
    assert!(fx.mgr.store().interface(bond).is_none());
    assert_eq!(
        fx.mgr.store().interface(physical).unwrap().kind(),
        InterfaceType::Physical
    );
    assert!(fx.events.events().iter().any(|e| matches!(
        e,
        NetEvent::StaleInterfaceDeleted { expected, .. } if expected == "physical"
    )));
}

#[test]
fn test_get_or_create_on_node_moves_between_nodes() {
    let mut fx = Fixture::new();
    fx.mgr
        .link_subnet(
            fx.eth0,
            LinkMode::Static,
            Some(fx.subnet1),
            LinkOptions::with_ip(ip("10.0.0.5")),
        )
        .unwrap();
    let node2 = fx.mgr.store_mut().add_node("node-2", NodeStatus::New);

    let moved = fx
        .mgr
        .get_or_create_on_node(InterfaceType::Physical, node2, "eth0", Some(mac(ETH0_MAC)), &[])
        .unwrap();
    assert_eq!(moved, fx.eth0);
    assert_eq!(fx.mgr.store().interface(moved).unwrap().node(), Some(node2));
    assert!(fx.links(moved).is_empty());
    assert_eq!(fx.mgr.store().links().count(), 0);
}

#[test]
fn test_get_or_create_on_node_keeps_other_node_bond_with_same_mac() {
    let mut fx = Fixture::new();
    let node2 = fx.mgr.store_mut().add_node("node-2", NodeStatus::Deployed);
    let eth_n2 = fx.physical_on(node2, "eth0", "aa:bb:cc:dd:ee:20");
    let bond_mac = "aa:bb:cc:dd:ee:10";
    let bond = fx
        .mgr
        .create(
            InterfaceType::Bond,
            InterfaceSpec::named("bond0").with_mac(mac(bond_mac)),
            &[eth_n2],
        )
        .unwrap();
    fx.mgr
        .link_subnet(
            bond,
            LinkMode::Static,
            Some(fx.subnet1),
            LinkOptions::with_ip(ip("10.0.0.9")),
        )
        .unwrap();

    let physical = fx
        .mgr
        .get_or_create_on_node(InterfaceType::Physical, fx.node, "eth5", Some(mac(bond_mac)), &[])
        .unwrap();
    assert_ne!(physical, bond);
    assert_eq!(fx.mgr.store().interface(physical).unwrap().node(), Some(fx.node));
    assert_eq!(fx.mgr.store().interface(bond).unwrap().node(), Some(node2));
    assert_eq!(fx.modes(bond), vec![LinkMode::Static]);
    assert!(!fx
        .events
        .events()
        .iter()
        .any(|e| matches!(e, NetEvent::StaleInterfaceDeleted { .. })));
}

#[test]
fn test_delete_cascades_to_orphaned_children() {
    let mut fx = Fixture::new();
    let eth1 = fx.physical("eth1", "aa:bb:cc:dd:ee:02");
    let bond = fx
        .mgr
        .create(
            InterfaceType::Bond,
            InterfaceSpec::named("bond0").with_mac(mac("aa:bb:cc:dd:ee:10")),
            &[fx.eth0, eth1],
        )
        .unwrap();
    fx.mgr
        .link_subnet(bond, LinkMode::Static, Some(fx.subnet1), LinkOptions::default())
        .unwrap();

    fx.mgr.delete(fx.eth0).unwrap();
    assert!(fx.mgr.store().interface(bond).is_some());
    assert_eq!(fx.mgr.store().parents_of(bond), vec![eth1]);

    fx.mgr.delete(eth1).unwrap();
    assert!(fx.mgr.store().interface(bond).is_none());
    assert_eq!(fx.mgr.store().links().count(), 0);
}

#[test]
fn test_acquired_bridge_takes_links() {
    let mut fx = Fixture::new();
    let link = fx
        .mgr
        .link_subnet(
            fx.eth0,
            LinkMode::Static,
            Some(fx.subnet1),
            LinkOptions::with_ip(ip("10.0.0.5")),
        )
        .unwrap();

    let bridge = fx.mgr.create_acquired_bridge(fx.eth0, None, Some(0)).unwrap();
    let views = fx.links(bridge);
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].id, link);
    assert_eq!(views[0].mode, LinkMode::Static);
    assert!(fx.links(fx.eth0).is_empty());

    let store = fx.mgr.store();
    let eth0 = store.interface(fx.eth0).unwrap();
    let br = store.interface(bridge).unwrap();
    assert_eq!(br.name(), "br-eth0");
    assert_eq!(br.node(), eth0.node());
    assert_eq!(br.mac_address(), eth0.mac_address());
    assert!(br.record().acquired);
    assert_eq!(br.record().params.get("bridge_fd"), Some(&json!(0)));
    assert_eq!(br.record().params.get("bridge_stp"), Some(&json!(false)));
    assert_eq!(store.parents_of(bridge), vec![fx.eth0]);

    let released = fx.mgr.release_acquired_bridges(fx.node).unwrap();
    assert_eq!(released, vec![bridge]);
    assert!(fx.mgr.store().interface(bridge).is_none());
    assert_eq!(fx.links(fx.eth0)[0].id, link);
}

#[test]
fn test_acquired_bridge_on_bridge_is_rejected() {
    let mut fx = Fixture::new();
    let bridge = fx.mgr.create_acquired_bridge(fx.eth0, None, None).unwrap();
    let err = fx.mgr.create_acquired_bridge(bridge, None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidComposition);
}

#[test]
fn test_effective_mtu() {
    let mut fx = Fixture::new();
    assert_eq!(fx.mgr.effective_mtu(fx.eth0).unwrap(), 1500);

    let mut params = fx.mgr.store().interface(fx.eth0).unwrap().record().params.clone();
    params.insert("mtu".to_string(), json!(9000));
    let change = InterfaceChange {
        params: Some(params),
        ..InterfaceChange::default()
    };
    fx.mgr.update(fx.eth0, change).unwrap();
    assert_eq!(fx.mgr.effective_mtu(fx.eth0).unwrap(), 9000);
}

#[test]
fn test_log_string() {
    let fx = Fixture::new();
    assert_eq!(fx.mgr.log_string(fx.eth0), "eth0 (physical) on node-1");
}
