//! Shared infrastructure for the machine networking core.
//!
//! - [`error`]: the error taxonomy every core operation reports through
//! - [`Table`]: ordered, id-keyed storage that never creates entries implicitly
//! - [`config`]: TOML configuration with defaults and validation

pub mod config;
pub mod error;
mod table;

pub use config::{ConfigError, GraphConfig, LoggingConfig, MetalnetConfig, PoolConfig};
pub use error::{ErrorKind, NetError, NetResult};
pub use table::Table;
