//! Address pool: subnet resolution and address allocation.

use ipnetwork::IpNetwork;
use metalnet_common::{NetError, NetResult};
use metalnet_types::AddressFamily;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

use crate::events::NetEvent;
use crate::if_mgr::IfMgr;
use crate::types::{AllocType, InterfaceId, IpRange, Subnet, SubnetId, SubnetSpec};

impl IfMgr {
    /// Returns the subnet with exactly this CIDR, creating it on the
    /// default VLAN if none exists.
    pub fn resolve_subnet(&mut self, cidr: IpNetwork) -> NetResult<SubnetId> {
        self.resolve_subnet_for(cidr, None)
    }

    pub(crate) fn resolve_subnet_for(
        &mut self,
        cidr: IpNetwork,
        interface: Option<InterfaceId>,
    ) -> NetResult<SubnetId> {
        let cidr = IpNetwork::new(cidr.network(), cidr.prefix())
            .map_err(|e| NetError::validation("cidr", e.to_string()))?;
        if let Some(subnet) = self.store.subnet_by_cidr(&cidr) {
            return Ok(subnet.id);
        }
        let id = self.store.add_subnet(SubnetSpec::new(cidr))?;
        self.emit(NetEvent::SubnetCreated {
            cidr: cidr.to_string(),
            interface: interface.map(|i| self.log_string(i)),
        });
        Ok(id)
    }

    /// Addresses held by configured (non-discovered) links.
    pub fn used_addresses(&self) -> BTreeSet<IpAddr> {
        self.store
            .links()
            .filter(|l| !l.is_discovered())
            .filter_map(|l| l.ip)
            .collect()
    }

    /// Picks the lowest free address in `subnet`.
    ///
    /// Skipped: network and broadcast addresses, the gateway (unless
    /// configured otherwise), dynamic and reserved ranges, addresses held
    /// by configured links, and `exclude`.
    pub fn allocate(
        &self,
        subnet: SubnetId,
        alloc_type: AllocType,
        exclude: &BTreeSet<IpAddr>,
    ) -> NetResult<IpAddr> {
        if alloc_type == AllocType::Discovered {
            return Err(NetError::validation(
                "alloc_type",
                "Discovered addresses are observed, not allocated.",
            ));
        }
        let subnet = self.store.try_subnet(subnet)?;
        let used = self.used_addresses();
        let gateway = subnet
            .gateway_ip
            .filter(|_| self.config.pool.exclude_gateway);

        let taken = used.iter().chain(exclude).chain(gateway.iter());
        match first_free(subnet, taken) {
            Some(ip) => {
                debug!(%ip, subnet = %subnet.cidr, ?alloc_type, "Allocated address");
                Ok(ip)
            }
            None => Err(NetError::pool_exhausted(subnet.cidr)),
        }
    }

    pub fn is_in_dynamic_range(&self, subnet: SubnetId, ip: IpAddr) -> NetResult<bool> {
        Ok(self.store.try_subnet(subnet)?.is_in_dynamic_range(&ip))
    }

    /// The dynamic range of `subnet` covering `ip`, if any.
    pub fn get_dynamic_range_for_ip(
        &self,
        subnet: SubnetId,
        ip: IpAddr,
    ) -> NetResult<Option<IpRange>> {
        Ok(self.store.try_subnet(subnet)?.dynamic_range_for(&ip).copied())
    }
}

fn to_bits(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// First and last assignable host of `cidr`, as integers.
///
/// IPv4 drops network and broadcast below /31; IPv6 drops the subnet
/// router anycast address below /127.
fn host_bounds(cidr: IpNetwork) -> (u128, u128) {
    match cidr {
        IpNetwork::V4(net) => {
            let edge = u128::from(net.prefix() < 31);
            (
                to_bits(IpAddr::V4(net.network())) + edge,
                to_bits(IpAddr::V4(net.broadcast())) - edge,
            )
        }
        IpNetwork::V6(net) => {
            let edge = u128::from(net.prefix() < 127);
            let network = u128::from(net.network());
            let host_mask = u128::MAX.checked_shr(u32::from(net.prefix())).unwrap_or(0);
            (network + edge, network | host_mask)
        }
    }
}

/// Lowest host of `subnet` outside its ranges and not in `taken`.
///
/// Blocked spans are visited in order and the cursor jumps past each one,
/// so the cost follows the number of spans rather than the subnet size.
fn first_free<'a>(subnet: &Subnet, taken: impl Iterator<Item = &'a IpAddr>) -> Option<IpAddr> {
    let family = subnet.family();
    let (first, last) = host_bounds(subnet.cidr);

    let mut blocked: Vec<(u128, u128)> = subnet
        .ranges
        .iter()
        .filter(|r| {
            AddressFamily::of_addr(&r.start) == family && AddressFamily::of_addr(&r.end) == family
        })
        .map(|r| (to_bits(r.start), to_bits(r.end)))
        .collect();
    blocked.extend(
        taken
            .filter(|ip| subnet.contains(ip))
            .map(|ip| (to_bits(*ip), to_bits(*ip))),
    );
    blocked.sort_unstable();

    let mut cursor = first;
    for (start, end) in blocked {
        if start > cursor {
            break;
        }
        if end >= cursor {
            cursor = end.checked_add(1)?;
        }
    }
    if cursor > last {
        return None;
    }
    Some(match family {
        AddressFamily::V4 => IpAddr::V4(Ipv4Addr::from(u32::try_from(cursor).ok()?)),
        AddressFamily::V6 => IpAddr::V6(Ipv6Addr::from(cursor)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::store::NetworkStore;
    use crate::types::SubnetSpec;
    use metalnet_common::{ErrorKind, MetalnetConfig};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn mgr_with_subnet(spec: SubnetSpec) -> (IfMgr, SubnetId) {
        let mut store = NetworkStore::new();
        let subnet = store.add_subnet(spec).unwrap();
        let mgr = IfMgr::new(store, MetalnetConfig::default(), Arc::new(MemorySink::new()));
        (mgr, subnet)
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_allocate_skips_network_gateway_and_ranges() {
        let (mgr, subnet) = mgr_with_subnet(
            SubnetSpec::new("10.0.0.0/24".parse().unwrap())
                .with_gateway(ip("10.0.0.1"))
                .with_range(IpRange::reserved(ip("10.0.0.2"), ip("10.0.0.9")))
                .with_range(IpRange::dynamic(ip("10.0.0.10"), ip("10.0.0.19"))),
        );
        let got = mgr.allocate(subnet, AllocType::Auto, &BTreeSet::new()).unwrap();
        assert_eq!(got, ip("10.0.0.20"));
    }

    #[test]
    fn test_allocate_honours_exclude_set() {
        let (mgr, subnet) = mgr_with_subnet(SubnetSpec::new("10.0.0.0/29".parse().unwrap()));
        let exclude: BTreeSet<IpAddr> = [ip("10.0.0.1"), ip("10.0.0.2")].into_iter().collect();
        assert_eq!(
            mgr.allocate(subnet, AllocType::Sticky, &exclude).unwrap(),
            ip("10.0.0.3")
        );
    }

    #[test]
    fn test_allocate_exhausted() {
        let (mgr, subnet) = mgr_with_subnet(SubnetSpec::new("10.0.0.0/30".parse().unwrap()));
        let exclude: BTreeSet<IpAddr> = [ip("10.0.0.1"), ip("10.0.0.2")].into_iter().collect();
        let err = mgr.allocate(subnet, AllocType::Auto, &exclude).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    }

    #[test]
    fn test_allocate_ipv6_skips_subnet_router_anycast() {
        let (mgr, subnet) = mgr_with_subnet(SubnetSpec::new("2001:db8::/64".parse().unwrap()));
        assert_eq!(
            mgr.allocate(subnet, AllocType::Auto, &BTreeSet::new()).unwrap(),
            ip("2001:db8::1")
        );
    }

    #[test]
    fn test_allocate_jumps_large_ipv6_range() {
        let (mgr, subnet) = mgr_with_subnet(
            SubnetSpec::new("fd00::/64".parse().unwrap())
                .with_range(IpRange::dynamic(ip("fd00::1"), ip("fd00::ffff:ffff:ffff"))),
        );
        assert_eq!(
            mgr.allocate(subnet, AllocType::Auto, &BTreeSet::new()).unwrap(),
            ip("fd00::1:0:0:0")
        );
        let exclude: BTreeSet<IpAddr> = [ip("fd00::1:0:0:0")].into_iter().collect();
        assert_eq!(
            mgr.allocate(subnet, AllocType::Sticky, &exclude).unwrap(),
            ip("fd00::1:0:0:1")
        );
    }

    #[test]
    fn test_allocate_exhausted_when_range_covers_ipv6_subnet() {
        let (mgr, subnet) = mgr_with_subnet(
            SubnetSpec::new("fd00::/64".parse().unwrap()).with_range(IpRange::reserved(
                ip("fd00::1"),
                ip("fd00::ffff:ffff:ffff:ffff"),
            )),
        );
        let err = mgr.allocate(subnet, AllocType::Auto, &BTreeSet::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    }

    #[test]
    fn test_allocate_skips_overlapping_ranges_and_used() {
        let (mgr, subnet) = mgr_with_subnet(
            SubnetSpec::new("10.0.0.0/24".parse().unwrap())
                .with_range(IpRange::reserved(ip("10.0.0.1"), ip("10.0.0.20")))
                .with_range(IpRange::dynamic(ip("10.0.0.10"), ip("10.0.0.30"))),
        );
        let exclude: BTreeSet<IpAddr> = [ip("10.0.0.31"), ip("10.0.0.5")].into_iter().collect();
        assert_eq!(
            mgr.allocate(subnet, AllocType::Auto, &exclude).unwrap(),
            ip("10.0.0.32")
        );
    }

    #[test]
    fn test_allocate_rejects_discovered() {
        let (mgr, subnet) = mgr_with_subnet(SubnetSpec::new("10.0.0.0/24".parse().unwrap()));
        let err = mgr
            .allocate(subnet, AllocType::Discovered, &BTreeSet::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    }

    #[test]
    fn test_resolve_subnet_creates_once() {
        let sink = Arc::new(MemorySink::new());
        let mut mgr = IfMgr::new(NetworkStore::new(), MetalnetConfig::default(), sink.clone());
        let first = mgr.resolve_subnet("192.168.1.0/24".parse().unwrap()).unwrap();
        let again = mgr.resolve_subnet("192.168.1.77/24".parse().unwrap()).unwrap();
        assert_eq!(first, again);
        assert_eq!(mgr.store().subnet(first).unwrap().vlan, mgr.store().default_vlan());
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_dynamic_range_lookup() {
        let (mgr, subnet) = mgr_with_subnet(
            SubnetSpec::new("10.0.0.0/24".parse().unwrap())
                .with_range(IpRange::dynamic(ip("10.0.0.100"), ip("10.0.0.200"))),
        );
        assert!(mgr.is_in_dynamic_range(subnet, ip("10.0.0.150")).unwrap());
        assert!(!mgr.is_in_dynamic_range(subnet, ip("10.0.0.50")).unwrap());
        assert_eq!(
            mgr.get_dynamic_range_for_ip(subnet, ip("10.0.0.100")).unwrap(),
            Some(IpRange::dynamic(ip("10.0.0.100"), ip("10.0.0.200")))
        );
    }
}
