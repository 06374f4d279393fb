//! Interface records and the composition rules of each interface type.
//!
//! An [`Interface`] is a tagged variant over the five interface types, each
//! wrapping the same [`InterfaceRecord`]. The variant never changes after
//! creation; a type change means deleting the interface and creating a new
//! one.

use metalnet_common::NetError;
use metalnet_types::MacAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::fields::param_fields;
use crate::types::{InterfaceId, NodeId, VlanId};

/// Opaque key/value parameters carried by an interface.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Interface type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Physical,
    Bond,
    Bridge,
    Vlan,
    Unknown,
}

impl InterfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Physical => "physical",
            InterfaceType::Bond => "bond",
            InterfaceType::Bridge => "bridge",
            InterfaceType::Vlan => "vlan",
            InterfaceType::Unknown => "unknown",
        }
    }

    /// Checks parent count and parent types for an interface of this type.
    ///
    /// Same-node checks need the store and are done by the graph.
    pub fn check_parents(&self, parents: &[InterfaceType]) -> Result<(), &'static str> {
        match self {
            InterfaceType::Physical if !parents.is_empty() => {
                Err("A physical interface cannot have parents.")
            }
            InterfaceType::Unknown if !parents.is_empty() => {
                Err("An unknown interface cannot have parents.")
            }
            InterfaceType::Physical | InterfaceType::Unknown => Ok(()),
            InterfaceType::Bond if parents.is_empty() => {
                Err("A bond must have at least one parent.")
            }
            InterfaceType::Bond => {
                if parents.iter().all(|p| *p == InterfaceType::Physical) {
                    Ok(())
                } else {
                    Err("Only physical interfaces can be bonded.")
                }
            }
            InterfaceType::Bridge if parents.is_empty() => {
                Err("A bridge must have at least one parent.")
            }
            InterfaceType::Bridge => {
                if parents.contains(&InterfaceType::Bridge) {
                    Err("Bridges cannot contain other bridges.")
                } else {
                    Ok(())
                }
            }
            InterfaceType::Vlan => match parents {
                [InterfaceType::Physical | InterfaceType::Bond | InterfaceType::Bridge] => Ok(()),
                [_] => Err("VLAN interface can only be created on a physical, bond or bridge interface."),
                _ => Err("VLAN interface must have exactly one parent."),
            },
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceType {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "physical" => Ok(InterfaceType::Physical),
            "bond" => Ok(InterfaceType::Bond),
            "bridge" => Ok(InterfaceType::Bridge),
            "vlan" => Ok(InterfaceType::Vlan),
            "unknown" => Ok(InterfaceType::Unknown),
            _ => Err(NetError::validation(
                "type",
                format!("Unknown interface type: {}", s),
            )),
        }
    }
}

/// Fields shared by every interface type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub id: InterfaceId,
    pub name: String,
    pub node: Option<NodeId>,
    pub mac_address: Option<MacAddress>,
    pub vlan: Option<VlanId>,
    pub enabled: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub ipv4_params: Params,
    #[serde(default)]
    pub ipv6_params: Params,
    /// Set on bridges synthesized when a machine is allocated.
    #[serde(default)]
    pub acquired: bool,
}

/// A network interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Interface {
    Physical(InterfaceRecord),
    Bond(InterfaceRecord),
    Bridge(InterfaceRecord),
    Vlan(InterfaceRecord),
    Unknown(InterfaceRecord),
}

impl Interface {
    pub fn new(kind: InterfaceType, record: InterfaceRecord) -> Self {
        match kind {
            InterfaceType::Physical => Interface::Physical(record),
            InterfaceType::Bond => Interface::Bond(record),
            InterfaceType::Bridge => Interface::Bridge(record),
            InterfaceType::Vlan => Interface::Vlan(record),
            InterfaceType::Unknown => Interface::Unknown(record),
        }
    }

    pub fn kind(&self) -> InterfaceType {
        match self {
            Interface::Physical(_) => InterfaceType::Physical,
            Interface::Bond(_) => InterfaceType::Bond,
            Interface::Bridge(_) => InterfaceType::Bridge,
            Interface::Vlan(_) => InterfaceType::Vlan,
            Interface::Unknown(_) => InterfaceType::Unknown,
        }
    }

    pub fn record(&self) -> &InterfaceRecord {
        match self {
            Interface::Physical(r)
            | Interface::Bond(r)
            | Interface::Bridge(r)
            | Interface::Vlan(r)
            | Interface::Unknown(r) => r,
        }
    }

    pub fn record_mut(&mut self) -> &mut InterfaceRecord {
        match self {
            Interface::Physical(r)
            | Interface::Bond(r)
            | Interface::Bridge(r)
            | Interface::Vlan(r)
            | Interface::Unknown(r) => r,
        }
    }

    pub fn id(&self) -> InterfaceId {
        self.record().id
    }

    pub fn name(&self) -> &str {
        &self.record().name
    }

    pub fn node(&self) -> Option<NodeId> {
        self.record().node
    }

    pub fn mac_address(&self) -> Option<MacAddress> {
        self.record().mac_address
    }

    pub fn vlan(&self) -> Option<VlanId> {
        self.record().vlan
    }

    pub fn is_enabled(&self) -> bool {
        self.record().enabled
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.record().tags.contains(tag)
    }

    /// MTU set directly in the interface params, if any.
    pub fn param_mtu(&self) -> Option<u32> {
        self.record()
            .params
            .get(param_fields::MTU)
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
    }
}

/// Attributes for creating an interface, also used as the match criteria
/// of `get_or_create`.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceSpec {
    pub name: Option<String>,
    pub node: Option<NodeId>,
    pub mac_address: Option<MacAddress>,
    pub vlan: Option<VlanId>,
    pub enabled: bool,
    pub tags: BTreeSet<String>,
    pub params: Params,
    pub acquired: bool,
}

impl Default for InterfaceSpec {
    fn default() -> Self {
        Self {
            name: None,
            node: None,
            mac_address: None,
            vlan: None,
            enabled: true,
            tags: BTreeSet::new(),
            params: Params::new(),
            acquired: false,
        }
    }
}

impl InterfaceSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn on_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_mac(mut self, mac: MacAddress) -> Self {
        self.mac_address = Some(mac);
        self
    }

    pub fn with_vlan(mut self, vlan: VlanId) -> Self {
        self.vlan = Some(vlan);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// True if every attribute set in this spec equals the interface's.
    ///
    /// `enabled` and `acquired` only count when they differ from the
    /// creation defaults.
    pub fn matches(&self, interface: &Interface) -> bool {
        let record = interface.record();
        self.name.as_ref().map_or(true, |n| *n == record.name)
            && self.node.map_or(true, |n| Some(n) == record.node)
            && self.mac_address.map_or(true, |m| Some(m) == record.mac_address)
            && self.vlan.map_or(true, |v| Some(v) == record.vlan)
            && (self.enabled || !record.enabled)
            && (!self.acquired || record.acquired)
            && self.tags.is_subset(&record.tags)
    }
}

/// Edits applied by `IfMgr::update`. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceChange {
    pub name: Option<String>,
    pub mac_address: Option<Option<MacAddress>>,
    pub vlan: Option<Option<VlanId>>,
    pub enabled: Option<bool>,
    pub tags: Option<BTreeSet<String>>,
    pub params: Option<Params>,
    pub ipv4_params: Option<Params>,
    pub ipv6_params: Option<Params>,
}

impl InterfaceChange {
    pub(crate) fn apply(self, record: &mut InterfaceRecord) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(mac) = self.mac_address {
            record.mac_address = mac;
        }
        if let Some(vlan) = self.vlan {
            record.vlan = vlan;
        }
        if let Some(enabled) = self.enabled {
            record.enabled = enabled;
        }
        if let Some(tags) = self.tags {
            record.tags = tags;
        }
        if let Some(params) = self.params {
            record.params = params;
        }
        if let Some(params) = self.ipv4_params {
            record.ipv4_params = params;
        }
        if let Some(params) = self.ipv6_params {
            record.ipv6_params = params;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(name: &str) -> InterfaceRecord {
        InterfaceRecord {
            id: InterfaceId(1),
            name: name.to_string(),
            node: Some(NodeId(1)),
            mac_address: Some("aa:bb:cc:dd:ee:01".parse().unwrap()),
            vlan: None,
            enabled: true,
            tags: BTreeSet::new(),
            params: Params::new(),
            ipv4_params: Params::new(),
            ipv6_params: Params::new(),
            acquired: false,
        }
    }

    #[test]
    fn test_composition_table() {
        use InterfaceType::*;

        assert!(Physical.check_parents(&[]).is_ok());
        assert!(Physical.check_parents(&[Physical]).is_err());
        assert!(Unknown.check_parents(&[Bond]).is_err());

        assert!(Bond.check_parents(&[Physical, Physical]).is_ok());
        assert!(Bond.check_parents(&[Physical, Bridge]).is_err());
        assert!(Bond.check_parents(&[]).is_err());

        assert!(Bridge.check_parents(&[Bond, Physical, Vlan]).is_ok());
        assert!(Bridge.check_parents(&[Bridge]).is_err());

        assert!(Vlan.check_parents(&[Bridge]).is_ok());
        assert!(Vlan.check_parents(&[Physical, Physical]).is_err());
        assert!(Vlan.check_parents(&[Vlan]).is_err());
        assert!(Vlan.check_parents(&[]).is_err());
    }

    #[test]
    fn test_variant_round_trips_through_json() {
        let iface = Interface::new(InterfaceType::Bond, record("bond0"));
        let value = serde_json::to_value(&iface).unwrap();
        assert_eq!(value["type"], json!("bond"));
        assert_eq!(value["name"], json!("bond0"));

        let back: Interface = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind(), InterfaceType::Bond);
        assert_eq!(back, iface);
    }

    #[test]
    fn test_spec_matches() {
        let iface = Interface::new(InterfaceType::Vlan, record("eth0.10"));
        assert!(InterfaceSpec::default().matches(&iface));
        assert!(InterfaceSpec::named("eth0.10").on_node(NodeId(1)).matches(&iface));
        assert!(!InterfaceSpec::named("eth0.20").matches(&iface));
        assert!(!InterfaceSpec::default().with_vlan(VlanId(3)).matches(&iface));
    }

    #[test]
    fn test_param_mtu() {
        let mut rec = record("eth0");
        rec.params.insert("mtu".to_string(), json!(9000));
        let iface = Interface::new(InterfaceType::Physical, rec);
        assert_eq!(iface.param_mtu(), Some(9000));
    }

    #[test]
    fn test_type_parse() {
        assert_eq!("Bridge".parse::<InterfaceType>().unwrap(), InterfaceType::Bridge);
        assert!("tunnel".parse::<InterfaceType>().is_err());
    }
}
