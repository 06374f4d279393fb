//! Parameter keys, naming constants and specifier qualifiers

// Interface params keys
pub mod param_fields {
    pub const MTU: &str = "mtu";
    pub const BRIDGE_STP: &str = "bridge_stp";
    pub const BRIDGE_FD: &str = "bridge_fd";
}

// Specifier qualifiers
pub mod qualifiers {
    pub const ID: &str = "id";
    pub const IP: &str = "ip";
    pub const MODE: &str = "mode";
    pub const NAME: &str = "name";
    pub const HOSTNAME: &str = "hostname";
    pub const SUBNET: &str = "subnet";
    pub const SUBNET_CIDR: &str = "subnet_cidr";
    pub const SPACE: &str = "space";
    pub const TYPE: &str = "type";
    pub const VLAN: &str = "vlan";
    pub const VID: &str = "vid";
    pub const FABRIC: &str = "fabric";
    pub const FABRIC_CLASS: &str = "fabric_class";
    pub const TAG: &str = "tag";

    /// Every qualifier the resolver understands.
    pub const ALL: &[&str] = &[
        ID,
        IP,
        MODE,
        NAME,
        HOSTNAME,
        SUBNET,
        SUBNET_CIDR,
        SPACE,
        TYPE,
        VLAN,
        VID,
        FABRIC,
        FABRIC_CLASS,
        TAG,
    ];
}

/// Default separator between a qualifier and its value.
pub const DEFAULT_SEPARATOR: char = ':';

/// Value of the `mode` qualifier.
pub const MODE_UNCONFIGURED: &str = "unconfigured";

/// Joins tags in a `tag` qualifier that must all be present.
pub const TAG_AND: &str = "&&";

/// Name prefix of parentless VLAN interfaces.
pub const UNKNOWN_VLAN_PARENT: &str = "unknown";

/// Name of the fabric created with every store.
pub const DEFAULT_FABRIC_NAME: &str = "fabric-0";

/// Name of the default fabric's untagged VLAN.
pub const DEFAULT_VLAN_NAME: &str = "untagged";
