//! Interface Manager - core state and transaction boundary.
//!
//! [`IfMgr`] owns the network store and is the single entry point for
//! every operation. The operations themselves live in their own modules:
//! - [`crate::graph`]: interface composition
//! - [`crate::pool`]: subnet resolution and address allocation
//! - [`crate::link`]: the link state machine
//! - [`crate::specifier`]: specifier resolution

use metalnet_common::{MetalnetConfig, NetResult};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::events::{EventSink, NetEvent, TracingSink};
use crate::store::NetworkStore;
use crate::types::InterfaceId;

/// Interface Manager
pub struct IfMgr {
    pub(crate) store: NetworkStore,
    pub(crate) config: MetalnetConfig,
    events: Arc<dyn EventSink>,
}

impl IfMgr {
    /// Creates a manager over `store`, reporting through `events`.
    pub fn new(store: NetworkStore, config: MetalnetConfig, events: Arc<dyn EventSink>) -> Self {
        info!(
            interfaces = store.interfaces().count(),
            links = store.links().count(),
            "IfMgr initialized"
        );
        Self {
            store,
            config,
            events,
        }
    }

    /// Empty store, default configuration, events to `tracing`.
    pub fn with_defaults() -> Self {
        Self::new(
            NetworkStore::new(),
            MetalnetConfig::default(),
            Arc::new(TracingSink),
        )
    }

    pub fn store(&self) -> &NetworkStore {
        &self.store
    }

    /// Mutable access for records the manager does not police (nodes,
    /// fabrics, spaces, VLANs, subnets).
    pub fn store_mut(&mut self) -> &mut NetworkStore {
        &mut self.store
    }

    pub fn into_store(self) -> NetworkStore {
        self.store
    }

    pub fn config(&self) -> &MetalnetConfig {
        &self.config
    }

    pub(crate) fn emit(&self, event: NetEvent) {
        self.events.emit(&event);
    }

    /// Runs `f` as one transaction: when it fails, the store is restored to
    /// its state before the call.
    pub fn atomic<T, F>(&mut self, f: F) -> NetResult<T>
    where
        F: FnOnce(&mut Self) -> NetResult<T>,
    {
        let snapshot = self.store.clone();
        let result = f(self);
        if let Err(ref e) = result {
            debug!(error = %e, "Rolling back");
            self.store = snapshot;
        }
        result
    }

    /// `"<name> (<type>) on <hostname>"`, used in log lines and error detail.
    pub fn log_string(&self, id: InterfaceId) -> String {
        match self.store.interface(id) {
            Some(iface) => {
                let hostname = iface
                    .node()
                    .and_then(|n| self.store.node(n))
                    .map(|n| n.hostname.as_str())
                    .unwrap_or("<unknown-node>");
                format!("{} ({}) on {}", iface.name(), iface.kind(), hostname)
            }
            None => format!("<deleted interface {}>", id),
        }
    }
}

impl fmt::Debug for IfMgr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IfMgr")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeStatus, SubnetSpec};
    use metalnet_common::NetError;

    #[test]
    fn test_atomic_rolls_back_on_error() {
        let mut mgr = IfMgr::with_defaults();
        let result: NetResult<()> = mgr.atomic(|mgr| {
            mgr.store_mut().add_node("node-1", NodeStatus::Ready);
            Err(NetError::not_found("interface", 1))
        });
        assert!(result.is_err());
        assert_eq!(mgr.store().nodes().count(), 0);
    }

    #[test]
    fn test_atomic_keeps_changes_on_success() {
        let mut mgr = IfMgr::with_defaults();
        let subnet = mgr
            .atomic(|mgr| mgr.store_mut().add_subnet(SubnetSpec::new("10.0.0.0/24".parse().unwrap())))
            .unwrap();
        assert!(mgr.store().subnet(subnet).is_some());
    }

    #[test]
    fn test_log_string_without_node() {
        let mgr = IfMgr::with_defaults();
        assert_eq!(mgr.log_string(InterfaceId(9)), "<deleted interface 9>");
    }
}
