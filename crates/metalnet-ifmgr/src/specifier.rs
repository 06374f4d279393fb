//! Specifier resolution.
//!
//! A specifier is `[qualifier<sep>]value`, for example `name:eth0`,
//! `vid:untagged` or `tag:e1000&&sriov`. Without a known qualifier the
//! value is tried, in order, as an interface id, a host CIDR, an IP address
//! and finally an interface name.
//!
//! A [`SpecifierQuery`] combines several specifiers: each is OR-ed with the
//! result so far, unless prefixed with `&` (AND) or `|` (OR).

use ipnetwork::IpNetwork;
use metalnet_common::{NetError, NetResult};
use metalnet_types::{HostCidr, Vid};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use crate::fields::{qualifiers, DEFAULT_SEPARATOR, MODE_UNCONFIGURED, TAG_AND};
use crate::if_mgr::IfMgr;
use crate::interface::{Interface, InterfaceType};
use crate::store::NetworkStore;
use crate::types::{AddressLink, FabricId, InterfaceId, NodeId, SpaceId, Subnet, SubnetId, VlanId};

/// Parses a decimal, `0x` hexadecimal or `0b` binary integer.
pub fn parse_integer(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = value.strip_prefix("0b").or_else(|| value.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2).ok()
    } else {
        value.parse().ok()
    }
}

/// Reference to a record by id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector<Id> {
    Id(Id),
    Name(String),
}

impl<Id> Selector<Id> {
    fn parse(value: &str, make_id: impl Fn(u64) -> Id) -> Self {
        match parse_integer(value) {
            Some(id) => Selector::Id(make_id(id)),
            None => Selector::Name(value.to_string()),
        }
    }
}

impl<Id: PartialEq> Selector<Id> {
    fn matches(&self, id: &Id, name: Option<&str>) -> bool {
        match self {
            Selector::Id(wanted) => wanted == id,
            Selector::Name(wanted) => name == Some(wanted.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubnetSelector {
    Id(SubnetId),
    Cidr(IpNetwork),
    Name(String),
}

impl SubnetSelector {
    fn parse(value: &str) -> Self {
        if let Some(id) = parse_integer(value) {
            return SubnetSelector::Id(SubnetId(id));
        }
        if value.contains('/') {
            if let Ok(cidr) = parse_network(value) {
                return SubnetSelector::Cidr(cidr);
            }
        }
        SubnetSelector::Name(value.to_string())
    }

    fn matches(&self, subnet: &Subnet) -> bool {
        match self {
            SubnetSelector::Id(id) => subnet.id == *id,
            SubnetSelector::Cidr(cidr) => subnet.cidr == *cidr,
            SubnetSelector::Name(name) => subnet.name == *name,
        }
    }
}

/// A single predicate over interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceFilter {
    Id(InterfaceId),
    /// Any link carries this address.
    Ip(IpAddr),
    /// A link carries this address on a subnet with this CIDR.
    HostCidr(HostCidr),
    /// No link carries an address.
    Unconfigured,
    Name(String),
    Hostname(String),
    Subnet(SubnetSelector),
    SubnetCidr(IpNetwork),
    Space(Selector<SpaceId>),
    Type(InterfaceType),
    Vlan(Selector<VlanId>),
    Vid(Vid),
    Fabric(Selector<FabricId>),
    FabricClass(String),
    /// Every tag must be present.
    Tags(Vec<String>),
}

impl InterfaceFilter {
    /// Parses one specifier using `separator` between qualifier and value.
    pub fn parse(specifier: &str, separator: char) -> NetResult<Self> {
        let specifier = specifier.trim();
        if let Some((qualifier, value)) = specifier.split_once(separator) {
            if qualifiers::ALL.contains(&qualifier) {
                return Self::qualified(qualifier, value);
            }
        }
        Ok(Self::unqualified(specifier))
    }

    fn qualified(qualifier: &str, value: &str) -> NetResult<Self> {
        let filter = match qualifier {
            qualifiers::ID => InterfaceFilter::Id(InterfaceId(parse_integer(value).ok_or_else(
                || NetError::validation("id", "Interface ID must be numeric."),
            )?)),
            qualifiers::IP => InterfaceFilter::Ip(
                value
                    .trim()
                    .parse()
                    .map_err(|_| NetError::validation("ip", format!("Invalid IP address: {}", value)))?,
            ),
            qualifiers::MODE => {
                if value.trim().to_lowercase() != MODE_UNCONFIGURED {
                    return Err(NetError::validation(
                        "mode",
                        "The only valid value for 'mode' is 'unconfigured'.",
                    ));
                }
                InterfaceFilter::Unconfigured
            }
            qualifiers::NAME => InterfaceFilter::Name(value.to_string()),
            qualifiers::HOSTNAME => InterfaceFilter::Hostname(value.to_string()),
            qualifiers::SUBNET => InterfaceFilter::Subnet(SubnetSelector::parse(value)),
            qualifiers::SUBNET_CIDR => InterfaceFilter::SubnetCidr(parse_network(value)?),
            qualifiers::SPACE => InterfaceFilter::Space(Selector::parse(value, SpaceId)),
            qualifiers::TYPE => InterfaceFilter::Type(value.parse()?),
            qualifiers::VLAN => InterfaceFilter::Vlan(Selector::parse(value, VlanId)),
            qualifiers::VID => InterfaceFilter::Vid(value.parse::<Vid>()?),
            qualifiers::FABRIC => InterfaceFilter::Fabric(Selector::parse(value, FabricId)),
            qualifiers::FABRIC_CLASS => InterfaceFilter::FabricClass(value.to_string()),
            qualifiers::TAG => InterfaceFilter::Tags(
                value
                    .split(TAG_AND)
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            other => {
                return Err(NetError::validation(
                    "specifier",
                    format!("Unknown qualifier: {}", other),
                ))
            }
        };
        Ok(filter)
    }

    fn unqualified(value: &str) -> Self {
        if let Some(id) = parse_integer(value) {
            return InterfaceFilter::Id(InterfaceId(id));
        }
        if value.contains('/') {
            if let Ok(host) = value.parse::<HostCidr>() {
                return InterfaceFilter::HostCidr(host);
            }
        } else if let Ok(ip) = value.parse::<IpAddr>() {
            return InterfaceFilter::Ip(ip);
        }
        InterfaceFilter::Name(value.to_string())
    }

    pub fn matches(&self, store: &NetworkStore, iface: &Interface) -> bool {
        let links = || {
            store
                .links_of(iface.id())
                .into_iter()
                .filter_map(move |l| store.link(l))
        };
        let subnet_of = |link: &AddressLink| link.subnet.and_then(|s| store.subnet(s));
        let vlan = iface.vlan().and_then(|v| store.vlan(v));
        let fabric = vlan.and_then(|v| store.fabric(v.fabric));

        match self {
            InterfaceFilter::Id(id) => iface.id() == *id,
            InterfaceFilter::Ip(ip) => links().any(|l| l.ip == Some(*ip)),
            InterfaceFilter::HostCidr(host) => links().any(|l| {
                l.ip == Some(host.address) && subnet_of(l).is_some_and(|s| s.cidr == host.network)
            }),
            InterfaceFilter::Unconfigured => links().all(|l| l.ip.is_none()),
            InterfaceFilter::Name(name) => iface.name() == name,
            InterfaceFilter::Hostname(hostname) => iface
                .node()
                .and_then(|n| store.node(n))
                .is_some_and(|n| n.hostname == *hostname),
            InterfaceFilter::Subnet(selector) => {
                links().any(|l| subnet_of(l).is_some_and(|s| selector.matches(s)))
            }
            InterfaceFilter::SubnetCidr(cidr) => {
                links().any(|l| subnet_of(l).is_some_and(|s| s.cidr == *cidr))
            }
            InterfaceFilter::Space(selector) => links().any(|l| {
                subnet_of(l)
                    .and_then(|s| s.space)
                    .and_then(|s| store.space(s))
                    .is_some_and(|space| selector.matches(&space.id, Some(&space.name)))
            }),
            InterfaceFilter::Type(kind) => iface.kind() == *kind,
            InterfaceFilter::Vlan(selector) => {
                vlan.is_some_and(|v| selector.matches(&v.id, v.name.as_deref()))
            }
            InterfaceFilter::Vid(vid) => vlan.is_some_and(|v| v.vid == *vid),
            InterfaceFilter::Fabric(selector) => {
                fabric.is_some_and(|f| selector.matches(&f.id, Some(&f.name)))
            }
            InterfaceFilter::FabricClass(class) => {
                fabric.is_some_and(|f| f.class_type.as_deref() == Some(class.as_str()))
            }
            InterfaceFilter::Tags(tags) => tags.iter().all(|t| iface.has_tag(t)),
        }
    }
}

fn parse_network(value: &str) -> NetResult<IpNetwork> {
    let raw: IpNetwork = value
        .trim()
        .parse()
        .map_err(|_| NetError::validation("cidr", format!("Invalid CIDR: {}", value)))?;
    IpNetwork::new(raw.network(), raw.prefix()).map_err(|e| NetError::validation("cidr", e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

/// Specifiers combined left to right.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecifierQuery {
    terms: Vec<(Combinator, InterfaceFilter)>,
}

impl SpecifierQuery {
    pub fn parse<'a, I>(specifiers: I, separator: char) -> NetResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut terms = Vec::new();
        for specifier in specifiers {
            let specifier = specifier.trim();
            let (combinator, rest) = if let Some(rest) = specifier.strip_prefix('&') {
                (Combinator::And, rest)
            } else if let Some(rest) = specifier.strip_prefix('|') {
                (Combinator::Or, rest)
            } else {
                (Combinator::Or, specifier)
            };
            if rest.trim().is_empty() {
                continue;
            }
            terms.push((combinator, InterfaceFilter::parse(rest, separator)?));
        }
        Ok(Self { terms })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// An empty query matches every interface.
    pub fn matches(&self, store: &NetworkStore, iface: &Interface) -> bool {
        let mut result: Option<bool> = None;
        for (combinator, filter) in &self.terms {
            let matched = filter.matches(store, iface);
            result = Some(match (result, combinator) {
                (None, _) => matched,
                (Some(acc), Combinator::And) => acc && matched,
                (Some(acc), Combinator::Or) => acc || matched,
            });
        }
        result.unwrap_or(true)
    }

    pub fn filter(&self, store: &NetworkStore) -> Vec<InterfaceId> {
        store
            .interfaces()
            .filter(|i| self.matches(store, i))
            .map(Interface::id)
            .collect()
    }

    /// Matching node ids, and the matching interfaces of each node.
    /// Interfaces without a node are left out.
    pub fn matching_node_map(
        &self,
        store: &NetworkStore,
    ) -> (BTreeSet<NodeId>, BTreeMap<NodeId, Vec<InterfaceId>>) {
        let mut map: BTreeMap<NodeId, Vec<InterfaceId>> = BTreeMap::new();
        for iface in store.interfaces().filter(|i| self.matches(store, i)) {
            if let Some(node) = iface.node() {
                map.entry(node).or_default().push(iface.id());
            }
        }
        (map.keys().copied().collect(), map)
    }
}

impl IfMgr {
    /// Parses specifiers with the default `:` separator.
    pub fn resolve<'a, I>(&self, specifiers: I) -> NetResult<SpecifierQuery>
    where
        I: IntoIterator<Item = &'a str>,
    {
        SpecifierQuery::parse(specifiers, DEFAULT_SEPARATOR)
    }

    pub fn matching_interfaces<'a, I>(&self, specifiers: I) -> NetResult<Vec<InterfaceId>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        Ok(self.resolve(specifiers)?.filter(&self.store))
    }

    pub fn matching_node_map<'a, I>(
        &self,
        specifiers: I,
    ) -> NetResult<(BTreeSet<NodeId>, BTreeMap<NodeId, Vec<InterfaceId>>)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        Ok(self.resolve(specifiers)?.matching_node_map(&self.store))
    }
}
