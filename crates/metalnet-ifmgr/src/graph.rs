//! Interface graph operations.
//!
//! Every structural mutation goes through the same sequence: change the
//! record or its edges, re-derive the interface from its parents, validate
//! it, then re-derive everything below it. Public entry points run inside
//! [`IfMgr::atomic`], so a failed validation leaves no partial edit behind.

use metalnet_common::{NetError, NetResult};
use metalnet_types::{validate_interface_name, MacAddress};
use serde_json::json;
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::{debug, info, instrument, warn};

use crate::events::NetEvent;
use crate::fields::{param_fields, UNKNOWN_VLAN_PARENT};
use crate::if_mgr::IfMgr;
use crate::interface::{
    Interface, InterfaceChange, InterfaceRecord, InterfaceSpec, InterfaceType, Params,
};
use crate::types::{DiscoveredView, InterfaceId, LinkMode, LinkView, NodeId, NodeStatus};

impl IfMgr {
    // Traversal

    /// Breadth-first walk from `start`, following `next`, bounded by the
    /// configured traversal depth.
    fn walk<F>(&self, start: Vec<InterfaceId>, next: F) -> Vec<InterfaceId>
    where
        F: Fn(InterfaceId) -> Vec<InterfaceId>,
    {
        let max_depth = self.config.graph.max_traversal_depth;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut frontier = start;
        let mut depth = 0;

        while !frontier.is_empty() {
            if depth >= max_depth {
                warn!(max_depth, "Interface traversal depth exceeded, truncating");
                break;
            }
            let mut next_frontier = Vec::new();
            for id in frontier {
                if seen.insert(id) {
                    out.push(id);
                    next_frontier.extend(next(id));
                }
            }
            frontier = next_frontier;
            depth += 1;
        }
        out
    }

    /// All parents, their parents, and so on.
    pub fn ancestors(&self, id: InterfaceId) -> Vec<InterfaceId> {
        self.walk(self.store.parents_of(id), |i| self.store.parents_of(i))
    }

    /// All children, their children, and so on.
    pub fn descendants(&self, id: InterfaceId) -> Vec<InterfaceId> {
        self.walk(self.store.children_of(id), |i| self.store.children_of(i))
    }

    /// Ancestors, descendants, and every descendant of an ancestor.
    pub fn related_family(&self, id: InterfaceId) -> NetResult<BTreeSet<InterfaceId>> {
        self.store.try_interface(id)?;
        Ok(self.family_of(Some(id), &self.store.parents_of(id)))
    }

    fn family_of(&self, id: Option<InterfaceId>, parents: &[InterfaceId]) -> BTreeSet<InterfaceId> {
        let ancestors = self.walk(parents.to_vec(), |i| self.store.parents_of(i));
        let mut family: BTreeSet<InterfaceId> = ancestors.iter().copied().collect();
        for ancestor in &ancestors {
            family.extend(self.descendants(*ancestor));
        }
        if let Some(id) = id {
            family.extend(self.descendants(id));
            family.remove(&id);
        }
        family
    }

    // Derivation and validation

    /// Recomputes node, enabled state and, for VLANs, MAC and name from
    /// `parents`.
    fn derive(&self, kind: InterfaceType, record: &mut InterfaceRecord, parents: &[InterfaceId]) {
        let parent_ifaces: Vec<&Interface> = parents
            .iter()
            .filter_map(|p| self.store.interface(*p))
            .collect();

        match kind {
            InterfaceType::Bond | InterfaceType::Bridge => {
                if let Some(first) = parent_ifaces.first() {
                    record.node = first.node();
                    record.enabled = parent_ifaces.iter().any(|p| p.is_enabled());
                }
            }
            InterfaceType::Vlan => {
                let vid = record
                    .vlan
                    .and_then(|v| self.store.vlan(v))
                    .map(|v| v.vid);
                match parent_ifaces.first() {
                    Some(parent) => {
                        record.node = parent.node();
                        record.enabled = parent.is_enabled();
                        record.mac_address = parent.mac_address();
                        if let Some(vid) = vid {
                            record.name = format!("{}.{}", parent.name(), vid.as_u16());
                        }
                    }
                    None => {
                        record.node = None;
                        if let Some(vid) = vid {
                            record.name = format!("{}.{}", UNKNOWN_VLAN_PARENT, vid.as_u16());
                        }
                    }
                }
            }
            InterfaceType::Physical | InterfaceType::Unknown => {}
        }
    }

    fn validate(
        &self,
        kind: InterfaceType,
        record: &InterfaceRecord,
        parents: &[InterfaceId],
        existing: bool,
    ) -> NetResult<()> {
        validate_interface_name(&record.name)?;

        if record.acquired && kind != InterfaceType::Bridge {
            return Err(NetError::validation(
                "acquired",
                format!("acquired cannot be true on interface type '{}'", kind),
            ));
        }
        if let Some(node) = record.node {
            if self.store.node(node).is_none() {
                return Err(NetError::not_found("node", node));
            }
        }
        if let Some(vlan) = record.vlan {
            if self.store.vlan(vlan).is_none() {
                return Err(NetError::not_found("vlan", vlan));
            }
        }

        self.validate_parents(kind, record, parents, existing)?;

        match kind {
            InterfaceType::Physical => {
                if record.node.is_none() {
                    return Err(NetError::validation("node", "This field cannot be blank."));
                }
                let mac = required_mac(record)?;
                if let Some(other) = self
                    .store
                    .interfaces_with_mac(mac)
                    .find(|i| i.kind() == InterfaceType::Physical && i.id() != record.id)
                {
                    return Err(NetError::validation(
                        "mac_address",
                        format!(
                            "This MAC address is already in use by {}.",
                            self.log_string(other.id())
                        ),
                    ));
                }
            }
            InterfaceType::Bond | InterfaceType::Bridge => {
                let mac = required_mac(record)?;
                let family = self.family_of(existing.then_some(record.id), parents);
                if let Some(other) = self
                    .store
                    .interfaces_with_mac(mac)
                    .find(|i| i.id() != record.id && !family.contains(&i.id()))
                {
                    return Err(NetError::validation(
                        "mac_address",
                        format!(
                            "This MAC address is already in use by {}.",
                            self.log_string(other.id())
                        ),
                    ));
                }
            }
            InterfaceType::Vlan => {
                if record.vlan.is_none() {
                    return Err(NetError::validation(
                        "vlan",
                        "VLAN interface requires connection to a VLAN.",
                    ));
                }
            }
            InterfaceType::Unknown => {
                if record.node.is_some() {
                    return Err(NetError::validation("node", "This field must be blank."));
                }
                if let Some(mac) = record.mac_address {
                    if let Some(other) = self
                        .store
                        .interfaces_with_mac(mac)
                        .find(|i| i.id() != record.id)
                    {
                        self.emit(NetEvent::MacAddressConflict {
                            interface: format!("{} ({}) on <unknown-node>", record.name, kind),
                            other: self.log_string(other.id()),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_parents(
        &self,
        kind: InterfaceType,
        record: &InterfaceRecord,
        parents: &[InterfaceId],
        existing: bool,
    ) -> NetResult<()> {
        let parent_ifaces = parents
            .iter()
            .map(|p| self.store.try_interface(*p))
            .collect::<NetResult<Vec<_>>>()?;

        if parents.contains(&record.id) {
            return Err(NetError::invalid_composition(
                &record.name,
                "An interface cannot be its own parent.",
            ));
        }

        let parent_kinds: Vec<InterfaceType> = parent_ifaces.iter().map(|p| p.kind()).collect();
        kind.check_parents(&parent_kinds)
            .map_err(|message| NetError::invalid_composition(&record.name, message))?;

        if matches!(kind, InterfaceType::Bond | InterfaceType::Bridge) {
            let nodes: BTreeSet<Option<NodeId>> = parent_ifaces.iter().map(|p| p.node()).collect();
            if nodes.len() > 1 {
                return Err(NetError::invalid_composition(
                    &record.name,
                    "Parent interfaces do not belong to the same node.",
                ));
            }
        }

        if existing {
            let below = self.descendants(record.id);
            if parents.iter().any(|p| below.contains(p)) {
                return Err(NetError::invalid_composition(
                    &record.name,
                    "A descendant cannot also be a parent.",
                ));
            }
        }
        Ok(())
    }

    /// Re-derives `id` from its parents, validates it, then re-derives
    /// everything below it.
    pub(crate) fn save_interface(&mut self, id: InterfaceId) -> NetResult<()> {
        let parents = self.store.parents_of(id);
        let mut iface = self.store.try_interface(id)?.clone();
        let kind = iface.kind();
        self.derive(kind, iface.record_mut(), &parents);
        self.validate(kind, iface.record(), &parents, true)?;
        self.store.insert_interface(iface);
        for child in self.store.children_of(id) {
            self.rederive(child, 1)?;
        }
        Ok(())
    }

    /// Re-derives `id` and its descendants without validating them.
    ///
    /// An interface reachable through several parents is re-derived once
    /// per path, so it always ends up reflecting its last-updated parent.
    fn rederive(&mut self, id: InterfaceId, depth: usize) -> NetResult<()> {
        if depth > self.config.graph.max_traversal_depth {
            warn!(%id, "Interface traversal depth exceeded while re-deriving");
            return Ok(());
        }
        let parents = self.store.parents_of(id);
        let mut iface = self.store.try_interface(id)?.clone();
        let kind = iface.kind();
        self.derive(kind, iface.record_mut(), &parents);
        self.store.insert_interface(iface);
        for child in self.store.children_of(id) {
            self.rederive(child, depth + 1)?;
        }
        Ok(())
    }

    // Creation

    /// Creates an interface of type `kind` under `parents`.
    #[instrument(skip(self, spec), fields(name = ?spec.name))]
    pub fn create(
        &mut self,
        kind: InterfaceType,
        spec: InterfaceSpec,
        parents: &[InterfaceId],
    ) -> NetResult<InterfaceId> {
        self.atomic(|mgr| mgr.create_interface(kind, spec, parents))
    }

    pub(crate) fn create_interface(
        &mut self,
        kind: InterfaceType,
        spec: InterfaceSpec,
        parents: &[InterfaceId],
    ) -> NetResult<InterfaceId> {
        let mut unique_parents = Vec::with_capacity(parents.len());
        for parent in parents {
            self.store.try_interface(*parent)?;
            if !unique_parents.contains(parent) {
                unique_parents.push(*parent);
            }
        }

        let id = self.store.next_interface_id();
        let mut record = InterfaceRecord {
            id,
            name: spec.name.unwrap_or_default(),
            node: spec.node,
            mac_address: spec.mac_address,
            vlan: spec.vlan,
            enabled: spec.enabled,
            tags: spec.tags,
            params: spec.params,
            ipv4_params: Params::new(),
            ipv6_params: Params::new(),
            acquired: spec.acquired,
        };
        self.derive(kind, &mut record, &unique_parents);
        self.validate(kind, &record, &unique_parents, false)?;

        debug!(%id, name = %record.name, %kind, "Creating interface");
        self.store.insert_interface(Interface::new(kind, record));
        for parent in &unique_parents {
            self.store.add_relationship(id, *parent);
        }
        Ok(id)
    }

    /// Returns a child of the first parent matching `spec`, or creates a new
    /// interface under all `parents`. The flag is true when created.
    ///
    /// Without parents, any interface of `kind` matching `spec` is reused.
    pub fn get_or_create(
        &mut self,
        kind: InterfaceType,
        spec: InterfaceSpec,
        parents: &[InterfaceId],
    ) -> NetResult<(InterfaceId, bool)> {
        let existing = match parents.first() {
            Some(first) => {
                self.store.try_interface(*first)?;
                self.store
                    .children_of(*first)
                    .into_iter()
                    .filter_map(|c| self.store.interface(c))
                    .find(|c| c.kind() == kind && spec.matches(c))
                    .map(Interface::id)
            }
            None => self
                .store
                .interfaces()
                .find(|i| i.kind() == kind && spec.matches(i))
                .map(Interface::id),
        };
        match existing {
            Some(id) => Ok((id, false)),
            None => self.create(kind, spec, parents).map(|id| (id, true)),
        }
    }

    /// Reconciles an interface observed on `node` with the stored graph.
    ///
    /// Physical interfaces match a physical interface by MAC on any node,
    /// or any interface by name or MAC on the same node; other types match
    /// by name, node and type. A match of the wrong type on the same node
    /// is deleted as stale and the lookup retried. A match is migrated in
    /// place: MAC and name are updated and its parents replaced; if it moves
    /// between nodes its address links are dropped.
    #[instrument(skip(self, mac, parents))]
    pub fn get_or_create_on_node(
        &mut self,
        kind: InterfaceType,
        node: NodeId,
        name: &str,
        mac: Option<MacAddress>,
        parents: &[InterfaceId],
    ) -> NetResult<InterfaceId> {
        self.atomic(|mgr| mgr.reconcile_on_node(kind, node, name, mac, parents))
    }

    fn find_on_node(
        &self,
        kind: InterfaceType,
        node: NodeId,
        name: &str,
        mac: Option<MacAddress>,
    ) -> Option<InterfaceId> {
        let on_node = |i: &&Interface| i.node() == Some(node);
        let named = |i: &&Interface| i.name() == name && on_node(i);
        if kind == InterfaceType::Physical {
            // Only physical interfaces follow their MAC across nodes.
            let same_mac = |i: &&Interface| {
                mac.is_some()
                    && i.mac_address() == mac
                    && (i.kind() == InterfaceType::Physical || on_node(i))
            };
            self.store
                .interfaces()
                .find(|i| same_mac(i) || named(i))
                .map(Interface::id)
        } else {
            self.store
                .interfaces()
                .find(|i| named(i) && i.kind() == kind)
                .map(Interface::id)
        }
    }

    fn reconcile_on_node(
        &mut self,
        kind: InterfaceType,
        node: NodeId,
        name: &str,
        mac: Option<MacAddress>,
        parents: &[InterfaceId],
    ) -> NetResult<InterfaceId> {
        if self.store.node(node).is_none() {
            return Err(NetError::not_found("node", node));
        }
        for parent in parents {
            self.store.try_interface(*parent)?;
        }

        let found = loop {
            let Some(id) = self.find_on_node(kind, node, name, mac) else {
                break None;
            };
            let stale = self.store.try_interface(id)?;
            if stale.kind() == kind {
                break Some(id);
            }
            if stale.node() != Some(node) {
                return Err(NetError::invalid_composition(
                    name,
                    format!("{} is on another node", self.log_string(id)),
                ));
            }
            self.emit(NetEvent::StaleInterfaceDeleted {
                interface: self.log_string(id),
                expected: kind.to_string(),
            });
            self.delete_interface(id)?;
        };

        let Some(id) = found else {
            let mut spec = InterfaceSpec::named(name).on_node(node);
            spec.mac_address = mac;
            return self.create_interface(kind, spec, parents);
        };

        let moved = self.store.try_interface(id)?.node() != Some(node);
        {
            let record = self.store.interface_mut(id)?.record_mut();
            record.mac_address = mac;
            record.name = name.to_string();
            if moved {
                record.node = Some(node);
            }
        }
        self.store.clear_parents(id);
        for parent in parents {
            self.store.add_relationship(id, *parent);
        }
        if moved {
            info!(interface = %self.log_string(id), "Interface moved to a new node, dropping its links");
            for link in self.store.links_of(id) {
                self.store.remove_link(link);
            }
        }
        self.save_interface(id)?;
        Ok(id)
    }

    // Structural edits

    /// Adds `parent` to `child`'s parents.
    pub fn attach_parent(&mut self, child: InterfaceId, parent: InterfaceId) -> NetResult<()> {
        self.atomic(|mgr| {
            mgr.store.try_interface(child)?;
            mgr.store.try_interface(parent)?;
            mgr.store.add_relationship(child, parent);
            mgr.save_interface(child)
        })
    }

    /// Removes `parent` from `child`'s parents.
    pub fn detach_parent(&mut self, child: InterfaceId, parent: InterfaceId) -> NetResult<()> {
        self.atomic(|mgr| {
            if !mgr.store.remove_relationship(child, parent) {
                return Err(NetError::not_found(
                    "relationship",
                    format!("{} -> {}", child, parent),
                ));
            }
            mgr.save_interface(child)
        })
    }

    /// Applies `change` and propagates derived fields to descendants.
    pub fn update(&mut self, id: InterfaceId, change: InterfaceChange) -> NetResult<()> {
        self.atomic(|mgr| {
            change.apply(mgr.store.interface_mut(id)?.record_mut());
            mgr.save_interface(id)
        })
    }

    /// Deletes an interface with its exclusively held links. Children left
    /// without parents are deleted too; the others are re-derived.
    #[instrument(skip(self))]
    pub fn delete(&mut self, id: InterfaceId) -> NetResult<()> {
        self.atomic(|mgr| mgr.delete_interface(id))
    }

    pub(crate) fn delete_interface(&mut self, id: InterfaceId) -> NetResult<()> {
        self.store.try_interface(id)?;
        let children = self.store.children_of(id);

        for link in self.store.links_of(id) {
            if self.store.interfaces_of_link(link).len() == 1 {
                self.store.remove_link(link);
            }
        }
        debug!(interface = %self.log_string(id), "Deleting interface");
        self.store.remove_interface(id);

        for child in children {
            if self.store.interface(child).is_none() {
                continue;
            }
            if self.store.parents_of(child).is_empty() {
                self.delete_interface(child)?;
            } else {
                self.rederive(child, 0)?;
            }
        }
        Ok(())
    }

    // Acquired bridges

    /// Creates a bridge over `id` and moves its configured links onto it.
    #[instrument(skip(self))]
    pub fn create_acquired_bridge(
        &mut self,
        id: InterfaceId,
        bridge_stp: Option<bool>,
        bridge_fd: Option<u32>,
    ) -> NetResult<InterfaceId> {
        self.atomic(|mgr| mgr.build_acquired_bridge(id, bridge_stp, bridge_fd))
    }

    fn build_acquired_bridge(
        &mut self,
        id: InterfaceId,
        bridge_stp: Option<bool>,
        bridge_fd: Option<u32>,
    ) -> NetResult<InterfaceId> {
        let source = self.store.try_interface(id)?.clone();
        if source.kind() == InterfaceType::Bridge {
            return Err(NetError::invalid_composition(
                source.name(),
                "Cannot create an acquired bridge on a bridge interface.",
            ));
        }

        let graph = &self.config.graph;
        let mut params = Params::new();
        params.insert(
            param_fields::BRIDGE_STP.to_string(),
            json!(bridge_stp.unwrap_or(graph.default_bridge_stp)),
        );
        params.insert(
            param_fields::BRIDGE_FD.to_string(),
            json!(bridge_fd.unwrap_or(graph.default_bridge_fd)),
        );
        if let Some(mtu) = source.record().params.get(param_fields::MTU) {
            params.insert(param_fields::MTU.to_string(), mtu.clone());
        }

        let bridge = self.store.next_interface_id();
        self.store.insert_interface(Interface::Bridge(InterfaceRecord {
            id: bridge,
            name: format!("{}{}", graph.acquired_bridge_prefix, source.name()),
            node: source.node(),
            mac_address: source.mac_address(),
            vlan: source.vlan(),
            enabled: true,
            tags: BTreeSet::new(),
            params,
            ipv4_params: Params::new(),
            ipv6_params: Params::new(),
            acquired: true,
        }));

        // Links move before the edge exists.
        for link in self.store.links_of(id) {
            if self.store.link(link).is_some_and(|l| !l.is_discovered()) {
                self.store.attach_link(bridge, link)?;
                self.store.detach_link(id, link);
            }
        }
        self.store.add_relationship(bridge, id);
        self.save_interface(bridge)?;

        info!(bridge = %self.log_string(bridge), "Created acquired bridge");
        Ok(bridge)
    }

    /// Removes every acquired bridge on `node`, moving its configured links
    /// back to the interface it was built on.
    pub fn release_acquired_bridges(&mut self, node: NodeId) -> NetResult<Vec<InterfaceId>> {
        self.atomic(|mgr| {
            let bridges: Vec<InterfaceId> = mgr
                .store
                .interfaces_on_node(node)
                .filter(|i| i.kind() == InterfaceType::Bridge && i.record().acquired)
                .map(Interface::id)
                .collect();

            for bridge in &bridges {
                if let Some(parent) = mgr.store.parents_of(*bridge).first().copied() {
                    for link in mgr.store.links_of(*bridge) {
                        if mgr.store.link(link).is_some_and(|l| !l.is_discovered()) {
                            mgr.store.attach_link(parent, link)?;
                            mgr.store.detach_link(*bridge, link);
                        }
                    }
                }
                mgr.delete_interface(*bridge)?;
            }
            Ok(bridges)
        })
    }

    // Tags

    pub fn add_tag(&mut self, id: InterfaceId, tag: &str) -> NetResult<()> {
        self.store
            .interface_mut(id)?
            .record_mut()
            .tags
            .insert(tag.to_string());
        Ok(())
    }

    pub fn remove_tag(&mut self, id: InterfaceId, tag: &str) -> NetResult<()> {
        self.store.interface_mut(id)?.record_mut().tags.remove(tag);
        Ok(())
    }

    // Queries

    /// Interface MTU param, else its VLAN's MTU, else the configured default.
    pub fn effective_mtu(&self, id: InterfaceId) -> NetResult<u32> {
        let iface = self.store.try_interface(id)?;
        Ok(iface
            .param_mtu()
            .or_else(|| iface.vlan().and_then(|v| self.store.vlan(v)).map(|v| v.mtu))
            .unwrap_or(self.config.pool.default_mtu))
    }

    /// Configured (non-discovered) links of the interface.
    pub fn links(&self, id: InterfaceId) -> NetResult<Vec<LinkView>> {
        self.store.try_interface(id)?;
        Ok(self
            .store
            .links_of(id)
            .into_iter()
            .filter_map(|l| self.store.link(l))
            .filter(|l| !l.is_discovered())
            .map(|l| LinkView {
                id: l.id,
                mode: l.link_type(),
                ip: l.ip,
                subnet: l.subnet,
            })
            .collect())
    }

    /// Discovered addresses, or `None` if the interface has no discovered
    /// links at all.
    pub fn discovered(&self, id: InterfaceId) -> NetResult<Option<Vec<DiscoveredView>>> {
        self.store.try_interface(id)?;
        let discovered: Vec<_> = self
            .store
            .links_of(id)
            .into_iter()
            .filter_map(|l| self.store.link(l))
            .filter(|l| l.is_discovered())
            .collect();
        if discovered.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            discovered
                .into_iter()
                .filter_map(|l| {
                    l.ip.map(|ip| DiscoveredView {
                        ip,
                        subnet: l.subnet,
                    })
                })
                .collect(),
        ))
    }

    /// True if the only configured link mode is LINK_UP.
    pub fn only_has_link_up(&self, id: InterfaceId) -> NetResult<bool> {
        let links = self.links(id)?;
        Ok(!links.is_empty() && links.iter().all(|l| l.mode == LinkMode::LinkUp))
    }

    /// True if the interface is enabled and has a configured link other
    /// than LINK_UP.
    pub fn is_configured(&self, id: InterfaceId) -> NetResult<bool> {
        if !self.store.try_interface(id)?.is_enabled() {
            return Ok(false);
        }
        Ok(self.links(id)?.iter().any(|l| l.mode != LinkMode::LinkUp))
    }

    pub fn interfaces_on_node_by_name(&self, node: NodeId, names: &[&str]) -> Vec<InterfaceId> {
        self.store
            .interfaces_on_node(node)
            .filter(|i| names.contains(&i.name()))
            .map(Interface::id)
            .collect()
    }

    /// Interfaces holding a link with address `ip`.
    pub fn filter_by_ip(&self, ip: IpAddr) -> NetResult<Vec<InterfaceId>> {
        let links = self.store.links_with_ip(ip);
        if links.is_empty() {
            return Err(NetError::not_found("address", ip));
        }
        let found: BTreeSet<InterfaceId> = links
            .into_iter()
            .flat_map(|l| self.store.interfaces_of_link(l))
            .collect();
        Ok(found.into_iter().collect())
    }

    /// True if `mac` is on an interface that is unowned or belongs to a
    /// machine that is not retired.
    pub fn is_mac_registered(&self, mac: MacAddress) -> bool {
        self.store.interfaces_with_mac(mac).any(|i| {
            i.node()
                .and_then(|n| self.store.node(n))
                .map_or(true, |n| n.status != NodeStatus::Retired)
        })
    }
}

fn required_mac(record: &InterfaceRecord) -> NetResult<MacAddress> {
    record
        .mac_address
        .ok_or_else(|| NetError::validation("mac_address", "This field cannot be blank."))
}
