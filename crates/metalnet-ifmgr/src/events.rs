//! Structured events for self-healing actions.
//!
//! The manager never logs through a global; it reports through the
//! [`EventSink`] handed to it at construction. Events are informational
//! and never influence control flow.

use parking_lot::Mutex;
use std::net::IpAddr;
use tracing::{info, warn};

use crate::types::AllocType;

/// Why a prior address claim was evicted by a discovered address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Handed out by the controller's own DHCP server.
    ManagedDhcp,
    /// Handed out by a DHCP server the controller does not manage.
    ExternalDhcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// An interface of the wrong type was found during reconciliation and
    /// deleted before recreating it.
    StaleInterfaceDeleted {
        interface: String,
        expected: String,
    },
    /// A MAC address was found on an unrelated interface.
    MacAddressConflict {
        interface: String,
        other: String,
    },
    /// A prior claim on a discovered address was deleted.
    AddressEvicted {
        ip: IpAddr,
        alloc_type: AllocType,
        hostname: Option<String>,
        reason: EvictionReason,
    },
    /// A subnet was created from an observed prefix.
    SubnetCreated {
        cidr: String,
        interface: Option<String>,
    },
    /// An interface was moved to the VLAN of an observed prefix.
    VlanObserved {
        interface: String,
        fabric: String,
        cidr: String,
    },
    AutoAddressClaimed {
        ip: IpAddr,
        interface: String,
    },
    /// An AUTO link could not be claimed because it has no subnet.
    AutoClaimWithoutSubnet {
        interface: String,
    },
}

/// Receiver for [`NetEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &NetEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &NetEvent) {
        match event {
            NetEvent::StaleInterfaceDeleted {
                interface,
                expected,
            } => {
                warn!(%interface, %expected, "Deleted interface with unexpected type");
            }
            NetEvent::MacAddressConflict { interface, other } => {
                warn!("While adding {}: found a MAC address already in use by {}.", interface, other);
            }
            NetEvent::AddressEvicted {
                ip,
                alloc_type,
                hostname,
                reason,
            } => {
                let on = hostname
                    .as_ref()
                    .map(|h| format!(" on {}", h))
                    .unwrap_or_default();
                let source = match reason {
                    EvictionReason::ManagedDhcp => {
                        "by the managed DHCP server from the dynamic range"
                    }
                    EvictionReason::ExternalDhcp => "by an external DHCP server",
                };
                warn!(
                    "{} IP address ({}){} was deleted because it was handed out {}.",
                    alloc_type.log_name(),
                    ip,
                    on,
                    source
                );
            }
            NetEvent::SubnetCreated { cidr, interface } => match interface {
                Some(interface) => {
                    info!("Creating subnet {} connected to interface {}.", cidr, interface);
                }
                None => info!("Creating subnet {}.", cidr),
            },
            NetEvent::VlanObserved {
                interface,
                fabric,
                cidr,
            } => {
                info!("{}: Observed connected to {} via {}.", interface, fabric, cidr);
            }
            NetEvent::AutoAddressClaimed { ip, interface } => {
                info!("Allocated automatic IP address {} for {}.", ip, interface);
            }
            NetEvent::AutoClaimWithoutSubnet { interface } => {
                warn!("Could not find subnet for interface {}.", interface);
            }
        }
    }
}

/// Records events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<NetEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event recorded so far.
    pub fn events(&self) -> Vec<NetEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &NetEvent) {
        self.events.lock().push(event.clone());
    }
}
