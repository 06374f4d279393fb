//! Link state machine.
//!
//! An interface's address links move between AUTO, DHCP, STATIC and
//! LINK_UP through explicit operations only. These rules hold after every
//! operation here:
//! - LINK_UP never coexists with another configured link
//! - at most one DHCP link per address family
//! - DHCP and STATIC do not share an address family
//!
//! DISCOVERED links are owned by [`IfMgr::observe_discovered_prefixes`] and
//! ignored by everything else.

use metalnet_common::{NetError, NetResult};
use metalnet_types::{AddressFamily, HostCidr};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::{debug, instrument};

use crate::events::{EvictionReason, NetEvent};
use crate::if_mgr::IfMgr;
use crate::types::{AddressLink, AllocType, InterfaceId, LinkId, LinkMode, LinkOptions, SubnetId, UserId};

impl IfMgr {
    // Helpers

    fn subnet_family(&self, subnet: Option<SubnetId>) -> NetResult<Option<AddressFamily>> {
        match subnet {
            Some(id) => Ok(Some(self.store.try_subnet(id)?.family())),
            None => Ok(None),
        }
    }

    /// Configured links of `iface`, cloned.
    fn configured_links(&self, iface: InterfaceId) -> Vec<AddressLink> {
        self.store
            .links_of(iface)
            .into_iter()
            .filter_map(|l| self.store.link(l))
            .filter(|l| !l.is_discovered())
            .cloned()
            .collect()
    }

    fn owned_link(&self, iface: InterfaceId, link: LinkId) -> NetResult<&AddressLink> {
        self.store.try_interface(iface)?;
        if !self.store.links_of(iface).contains(&link) {
            return Err(NetError::not_found("link", link));
        }
        self.store.try_link(link)
    }

    fn new_link(
        &mut self,
        iface: InterfaceId,
        alloc_type: AllocType,
        ip: Option<IpAddr>,
        subnet: Option<SubnetId>,
        user: Option<UserId>,
    ) -> NetResult<LinkId> {
        self.store.try_interface(iface)?;
        let link = self.store.create_link(alloc_type, ip, subnet, user);
        self.store.attach_link(iface, link)?;
        Ok(link)
    }

    /// Removes DHCP links without a subnet or, when `family` is set, on a
    /// subnet of that family. With no family every DHCP link goes.
    fn remove_link_dhcp(&mut self, iface: InterfaceId, family: Option<AddressFamily>) {
        for link in self.configured_links(iface) {
            if link.link_type() != LinkMode::Dhcp {
                continue;
            }
            let link_family = link
                .subnet
                .and_then(|s| self.store.subnet(s))
                .map(|s| s.family());
            if family.is_none() || link.subnet.is_none() || link_family == family {
                debug!(link = %link.id, "Removing DHCP link");
                self.store.remove_link(link.id);
            }
        }
    }

    /// Removes STATIC links on a subnet of `family`, or all of them when
    /// `family` is unset.
    fn remove_link_static(&mut self, iface: InterfaceId, family: Option<AddressFamily>) {
        for link in self.configured_links(iface) {
            if link.link_type() != LinkMode::Static {
                continue;
            }
            if family.is_none() || self.store.link_family(&link) == family {
                debug!(link = %link.id, "Removing STATIC link replaced by DHCP");
                self.store.remove_link(link.id);
            }
        }
    }

    fn remove_link_up(&mut self, iface: InterfaceId) {
        for link in self.configured_links(iface) {
            if link.link_type() == LinkMode::LinkUp {
                self.store.remove_link(link.id);
            }
        }
    }

    // Linking

    /// Links `iface` to `subnet` in `mode` and returns the new link.
    ///
    /// `options` only applies to STATIC. `subnet` may be unset for DHCP and
    /// LINK_UP, and for STATIC with an explicit address.
    #[instrument(skip(self, options))]
    pub fn link_subnet(
        &mut self,
        iface: InterfaceId,
        mode: LinkMode,
        subnet: Option<SubnetId>,
        options: LinkOptions,
    ) -> NetResult<LinkId> {
        self.atomic(|mgr| {
            mgr.store.try_interface(iface)?;
            if let Some(subnet) = subnet {
                mgr.store.try_subnet(subnet)?;
            }
            match mode {
                LinkMode::Auto => mgr.link_auto(iface, subnet),
                LinkMode::Dhcp => mgr.link_dhcp(iface, subnet),
                LinkMode::Static => mgr.link_static(iface, subnet, options, None),
                LinkMode::LinkUp => mgr.link_link_up(iface, subnet),
                LinkMode::Discovered => Err(NetError::validation(
                    "mode",
                    "Discovered links are only created by observation.",
                )),
            }
        })
    }

    fn link_auto(&mut self, iface: InterfaceId, subnet: Option<SubnetId>) -> NetResult<LinkId> {
        let family = self.subnet_family(subnet)?;
        let link = self.new_link(iface, AllocType::Auto, None, subnet, None)?;
        self.remove_link_dhcp(iface, family);
        self.remove_link_up(iface);
        Ok(link)
    }

    fn link_dhcp(&mut self, iface: InterfaceId, subnet: Option<SubnetId>) -> NetResult<LinkId> {
        let family = self.subnet_family(subnet)?;
        self.remove_link_dhcp(iface, family);
        self.remove_link_static(iface, family);
        let link = self.new_link(iface, AllocType::Dhcp, None, subnet, None)?;
        self.remove_link_up(iface);
        Ok(link)
    }

    fn link_link_up(&mut self, iface: InterfaceId, subnet: Option<SubnetId>) -> NetResult<LinkId> {
        let family = self.subnet_family(subnet)?;
        self.remove_link_up(iface);
        let link = self.new_link(iface, AllocType::Sticky, None, subnet, None)?;
        self.remove_link_dhcp(iface, family);
        Ok(link)
    }

    /// Creates a STATIC link. With `swap`, the new link takes over the id of
    /// `swap` and the old contents are deleted.
    fn link_static(
        &mut self,
        iface: InterfaceId,
        subnet: Option<SubnetId>,
        options: LinkOptions,
        swap: Option<LinkId>,
    ) -> NetResult<LinkId> {
        let alloc_type = match options.alloc_type {
            None => AllocType::Sticky,
            Some(t @ (AllocType::Sticky | AllocType::UserReserved)) => t,
            Some(other) => {
                return Err(NetError::validation(
                    "alloc_type",
                    format!("Invalid alloc_type for STATIC mode: {:?}", other),
                ))
            }
        };
        let user = match alloc_type {
            AllocType::Sticky => None,
            _ => options.user,
        };

        let link = match options.ip {
            Some(ip) => {
                if let Some(subnet) = subnet {
                    let subnet = self.store.try_subnet(subnet)?;
                    if !subnet.contains(&ip) {
                        return Err(NetError::out_of_range(
                            ip,
                            format!("IP address is not in the given subnet '{}'.", subnet.cidr),
                        ));
                    }
                    if let Some(range) = subnet.dynamic_range_for(&ip) {
                        return Err(NetError::out_of_range(
                            ip,
                            format!("IP address is inside a dynamic range {}.", range),
                        ));
                    }
                }
                let taken = self
                    .store
                    .links_with_ip(ip)
                    .into_iter()
                    .filter_map(|l| self.store.link(l))
                    .any(|l| !l.is_discovered() && Some(l.id) != swap);
                if taken {
                    return Err(NetError::address_unavailable(ip));
                }
                self.new_link(iface, alloc_type, Some(ip), subnet, user)?
            }
            None => {
                let Some(subnet) = subnet else {
                    return Err(NetError::no_subnet(self.log_string(iface)));
                };
                let ip = self.allocate(subnet, alloc_type, &BTreeSet::new())?;
                self.new_link(iface, alloc_type, Some(ip), Some(subnet), user)?
            }
        };

        let link = match swap {
            Some(old) => {
                self.store.swap_link_ids(old, link)?;
                self.store.remove_link(link);
                old
            }
            None => link,
        };

        let family = self.subnet_family(subnet)?;
        self.remove_link_dhcp(iface, family);
        self.remove_link_up(iface);
        Ok(link)
    }

    /// Changes an existing link in place, keeping its id.
    ///
    /// STATIC to STATIC on a different subnet or address, and anything to
    /// STATIC, go through an id swap. Leaving STATIC, or moving between the
    /// other modes, rewrites the link as an unclaimed link of the new mode
    /// and removes the sibling links that mode replaces. LINK_UP is refused
    /// while other configured links remain.
    #[instrument(skip(self))]
    pub fn update_link(
        &mut self,
        iface: InterfaceId,
        link: LinkId,
        mode: LinkMode,
        subnet: Option<SubnetId>,
        ip: Option<IpAddr>,
    ) -> NetResult<LinkId> {
        self.atomic(|mgr| {
            let current = mgr.owned_link(iface, link)?.clone();
            if let Some(subnet) = subnet {
                mgr.store.try_subnet(subnet)?;
            }
            if mode == LinkMode::Discovered || current.is_discovered() {
                return Err(NetError::validation(
                    "mode",
                    "Discovered links cannot be updated.",
                ));
            }

            if current.link_type() == LinkMode::Static && mode == LinkMode::Static {
                if current.subnet == subnet && (ip.is_none() || current.ip == ip) {
                    return Ok(link);
                }
                let options = LinkOptions {
                    ip,
                    alloc_type: Some(current.alloc_type),
                    user: current.user,
                };
                return mgr.link_static(iface, subnet, options, Some(link));
            }
            if mode == LinkMode::Static {
                let options = LinkOptions {
                    ip,
                    ..LinkOptions::default()
                };
                return mgr.link_static(iface, subnet, options, Some(link));
            }

            // Siblings are cleaned up as for a new link of `mode`.
            let family = mgr.subnet_family(subnet)?;
            mgr.store.detach_link(iface, link);
            match mode {
                LinkMode::Auto => {
                    mgr.remove_link_dhcp(iface, family);
                    mgr.remove_link_up(iface);
                }
                LinkMode::Dhcp => {
                    mgr.remove_link_dhcp(iface, family);
                    mgr.remove_link_static(iface, family);
                    mgr.remove_link_up(iface);
                }
                LinkMode::LinkUp => {
                    mgr.remove_link_up(iface);
                    mgr.remove_link_dhcp(iface, family);
                    if !mgr.configured_links(iface).is_empty() {
                        return Err(NetError::validation(
                            "mode",
                            "LINK_UP cannot coexist with other configured links.",
                        ));
                    }
                }
                LinkMode::Static | LinkMode::Discovered => {}
            }
            mgr.store.attach_link(iface, link)?;

            let record = mgr.store.link_mut(link)?;
            record.alloc_type = mode.alloc_type();
            record.ip = None;
            record.subnet = subnet;
            record.user = None;
            Ok(link)
        })
    }

    // Unlinking

    /// Removes a link. An enabled interface left without links gets a
    /// LINK_UP.
    #[instrument(skip(self))]
    pub fn unlink(&mut self, iface: InterfaceId, link: LinkId) -> NetResult<()> {
        self.atomic(|mgr| {
            mgr.owned_link(iface, link)?;
            mgr.unlink_inner(iface, link)
        })
    }

    /// Removes the configured link carrying `ip`.
    pub fn unlink_by_ip(&mut self, iface: InterfaceId, ip: IpAddr) -> NetResult<()> {
        self.atomic(|mgr| {
            mgr.store.try_interface(iface)?;
            let link = mgr
                .configured_links(iface)
                .into_iter()
                .find(|l| l.ip == Some(ip))
                .map(|l| l.id)
                .ok_or_else(|| NetError::not_found("address", ip))?;
            mgr.unlink_inner(iface, link)
        })
    }

    fn unlink_inner(&mut self, iface: InterfaceId, link: LinkId) -> NetResult<()> {
        self.store.remove_link(link);
        if self.store.try_interface(iface)?.is_enabled() {
            self.ensure_link_up_inner(iface)?;
        }
        Ok(())
    }

    /// Removes every configured link, without the LINK_UP repair.
    pub fn clear_all(&mut self, iface: InterfaceId) -> NetResult<Vec<LinkId>> {
        self.store.try_interface(iface)?;
        let removed: Vec<LinkId> = self.configured_links(iface).iter().map(|l| l.id).collect();
        for link in &removed {
            self.store.remove_link(*link);
        }
        Ok(removed)
    }

    // AUTO claims

    /// Allocates an address for every unclaimed AUTO link, replacing each
    /// placeholder with a claimed link. Addresses claimed earlier in the
    /// batch are excluded from later picks.
    #[instrument(skip(self, exclude))]
    pub fn claim_auto_addresses(
        &mut self,
        iface: InterfaceId,
        exclude: &BTreeSet<IpAddr>,
    ) -> NetResult<Vec<LinkId>> {
        self.atomic(|mgr| {
            mgr.store.try_interface(iface)?;
            let mut exclude = exclude.clone();
            let mut claimed = Vec::new();

            for placeholder in mgr.configured_links(iface) {
                if placeholder.alloc_type != AllocType::Auto || placeholder.ip.is_some() {
                    continue;
                }
                let Some(subnet) = placeholder.subnet else {
                    mgr.emit(NetEvent::AutoClaimWithoutSubnet {
                        interface: mgr.log_string(iface),
                    });
                    return Err(NetError::no_subnet(mgr.log_string(iface)));
                };

                let ip = mgr.allocate(subnet, AllocType::Auto, &exclude)?;
                let link = mgr.new_link(iface, AllocType::Auto, Some(ip), Some(subnet), None)?;
                mgr.store.remove_link(placeholder.id);
                mgr.emit(NetEvent::AutoAddressClaimed {
                    ip,
                    interface: mgr.log_string(iface),
                });
                exclude.insert(ip);
                claimed.push(link);
            }
            Ok(claimed)
        })
    }

    /// Clears the address of every claimed AUTO link and returns them. The
    /// links themselves stay.
    pub fn release_auto_addresses(&mut self, iface: InterfaceId) -> NetResult<Vec<LinkId>> {
        self.store.try_interface(iface)?;
        let mut released = Vec::new();
        for link in self.configured_links(iface) {
            if link.alloc_type == AllocType::Auto && link.ip.is_some() {
                self.store.link_mut(link.id)?.ip = None;
                released.push(link.id);
            }
        }
        Ok(released)
    }

    // Repair

    /// Drops LINK_UP next to other configured links; gives an interface
    /// without configured links a LINK_UP, on a subnet discovered on the
    /// interface's VLAN when there is one. Returns the created link.
    pub fn ensure_link_up(&mut self, iface: InterfaceId) -> NetResult<Option<LinkId>> {
        self.atomic(|mgr| mgr.ensure_link_up_inner(iface))
    }

    fn ensure_link_up_inner(&mut self, iface: InterfaceId) -> NetResult<Option<LinkId>> {
        let vlan = self.store.try_interface(iface)?.vlan();
        let links = self.configured_links(iface);

        if !links.is_empty() {
            let (link_ups, others): (Vec<_>, Vec<_>) = links
                .iter()
                .partition(|l| l.link_type() == LinkMode::LinkUp);
            if !link_ups.is_empty() && !others.is_empty() {
                for link in link_ups {
                    self.store.remove_link(link.id);
                }
            }
            return Ok(None);
        }

        let subnet = vlan.and_then(|vlan| {
            self.store
                .links_of(iface)
                .into_iter()
                .filter_map(|l| self.store.link(l))
                .filter(|l| l.is_discovered())
                .filter_map(|l| l.subnet)
                .find(|s| self.store.subnet(*s).is_some_and(|s| s.vlan == vlan))
        });
        self.link_link_up(iface, subnet).map(Some)
    }

    /// AUTO on the first subnet of the interface's VLAN, or DHCP without a
    /// subnet when the VLAN has none. Does nothing without a VLAN.
    pub fn force_auto_or_dhcp_link(&mut self, iface: InterfaceId) -> NetResult<Option<LinkId>> {
        self.atomic(|mgr| {
            let Some(vlan) = mgr.store.try_interface(iface)?.vlan() else {
                return Ok(None);
            };
            let subnet = mgr.store.subnets_on_vlan(vlan).next().map(|s| s.id);
            let link = match subnet {
                Some(subnet) => mgr.link_auto(iface, Some(subnet))?,
                None => mgr.link_dhcp(iface, None)?,
            };
            Ok(Some(link))
        })
    }

    // Discovery

    /// Replaces the interface's DISCOVERED links with one per observed
    /// address.
    ///
    /// Unknown prefixes get a subnet. The interface follows the VLAN of the
    /// first prefix whose subnet is on a different VLAN. Any prior claim on
    /// an observed address is removed: discovered and orphaned claims
    /// silently, live claims with an eviction event.
    #[instrument(skip(self, observed))]
    pub fn observe_discovered_prefixes(
        &mut self,
        iface: InterfaceId,
        observed: &[HostCidr],
    ) -> NetResult<Vec<LinkId>> {
        self.atomic(|mgr| {
            mgr.store.try_interface(iface)?;
            for link in mgr.store.links_of(iface) {
                if mgr.store.link(link).is_some_and(|l| l.is_discovered()) {
                    mgr.store.remove_link(link);
                }
            }

            let mut vlan_migrated = false;
            let mut seen = BTreeSet::new();
            let mut created = Vec::with_capacity(observed.len());
            for host in observed {
                if !seen.insert(host.address) {
                    debug!(ip = %host.address, "Skipping repeated observed address");
                    continue;
                }
                let subnet = mgr.resolve_subnet_for(host.network, Some(iface))?;
                let subnet_vlan = mgr.store.try_subnet(subnet)?.vlan;

                if !vlan_migrated && mgr.store.try_interface(iface)?.vlan() != Some(subnet_vlan) {
                    vlan_migrated = true;
                    let fabric = mgr
                        .store
                        .vlan(subnet_vlan)
                        .and_then(|v| mgr.store.fabric(v.fabric))
                        .map(|f| f.name.clone())
                        .unwrap_or_default();
                    mgr.emit(NetEvent::VlanObserved {
                        interface: mgr.log_string(iface),
                        fabric,
                        cidr: host.network.to_string(),
                    });
                    mgr.store.interface_mut(iface)?.record_mut().vlan = Some(subnet_vlan);
                    mgr.save_interface(iface)?;
                }

                mgr.evict_prior_claims(host.address, subnet, iface)?;
                created.push(mgr.new_link(
                    iface,
                    AllocType::Discovered,
                    Some(host.address),
                    Some(subnet),
                    None,
                )?);
            }
            Ok(created)
        })
    }

    /// Removes every prior claim on `ip`. Unknown interfaces left holding
    /// only a discovered claim are deleted, except `observer`.
    fn evict_prior_claims(
        &mut self,
        ip: IpAddr,
        subnet: SubnetId,
        observer: InterfaceId,
    ) -> NetResult<()> {
        let dhcp_on = {
            let vlan = self.store.try_subnet(subnet)?.vlan;
            self.store.vlan(vlan).is_some_and(|v| v.dhcp_on)
        };

        for prior in self.store.links_with_ip(ip) {
            let Some(prior_link) = self.store.link(prior).cloned() else {
                continue;
            };
            if prior_link.is_discovered() {
                if self.store.is_linked_to_one_unknown_interface(prior) {
                    for owner in self.store.interfaces_of_link(prior) {
                        if owner != observer {
                            self.delete_interface(owner)?;
                        }
                    }
                }
                self.store.remove_link(prior);
            } else if self.store.interfaces_of_link(prior).is_empty() {
                debug!(%ip, "Removing orphaned address link");
                self.store.remove_link(prior);
            } else {
                // TODO: restrict eviction to addresses inside a dynamic range
                // once external DHCP ranges are recorded per subnet.
                let reason = if dhcp_on {
                    EvictionReason::ManagedDhcp
                } else {
                    EvictionReason::ExternalDhcp
                };
                self.emit(NetEvent::AddressEvicted {
                    ip,
                    alloc_type: prior_link.alloc_type,
                    hostname: self.store.node_of_link(prior).map(|n| n.hostname.clone()),
                    reason,
                });
                self.store.remove_link(prior);
            }
        }
        Ok(())
    }
}
