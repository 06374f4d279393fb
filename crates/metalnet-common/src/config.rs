//! Configuration file support.
//!
//! Loads and validates the core's tunables from a TOML file. Every field
//! has a default, so a partial file (or no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/metalnet/metalnet.toml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Interface graph tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Upper bound on ancestor/descendant walks.
    #[serde(default = "default_max_traversal_depth")]
    pub max_traversal_depth: usize,

    /// Forward delay written into acquired bridges.
    #[serde(default = "default_bridge_fd")]
    pub default_bridge_fd: u32,

    /// STP flag written into acquired bridges.
    #[serde(default)]
    pub default_bridge_stp: bool,

    /// Name prefix for acquired bridges.
    #[serde(default = "default_acquired_bridge_prefix")]
    pub acquired_bridge_prefix: String,
}

/// Address pool tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Never hand out a subnet's gateway address.
    #[serde(default = "default_true")]
    pub exclude_gateway: bool,

    /// MTU reported when neither the interface nor its VLAN sets one.
    #[serde(default = "default_mtu")]
    pub default_mtu: u32,
}

/// Logging tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetalnetConfig {
    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_traversal_depth() -> usize {
    64
}

fn default_bridge_fd() -> u32 {
    15
}

fn default_acquired_bridge_prefix() -> String {
    "br-".to_string()
}

fn default_true() -> bool {
    true
}

fn default_mtu() -> u32 {
    1500
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_traversal_depth: default_max_traversal_depth(),
            default_bridge_fd: default_bridge_fd(),
            default_bridge_stp: false,
            acquired_bridge_prefix: default_acquired_bridge_prefix(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            exclude_gateway: default_true(),
            default_mtu: default_mtu(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl MetalnetConfig {
    /// Loads configuration from `path`, falling back to defaults if the
    /// file does not exist. The result is validated either way.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let config = match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content).map_err(|e| match e {
                ConfigError::Parse { message, .. } => ConfigError::Parse {
                    path: path.to_path_buf(),
                    message,
                },
                other => other,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads from [`DEFAULT_CONFIG_PATH`] or defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Parses configuration from a TOML string without validating it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    /// Writes the configuration to `path` as pretty TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.graph.max_traversal_depth == 0 {
            return Err(ConfigError::Invalid(
                "graph.max_traversal_depth must be > 0".to_string(),
            ));
        }

        if self.graph.acquired_bridge_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "graph.acquired_bridge_prefix must not be empty".to_string(),
            ));
        }

        if !(68..=65535).contains(&self.pool.default_mtu) {
            return Err(ConfigError::Invalid(
                "pool.default_mtu must be 68-65535".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "logging.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = MetalnetConfig::default();
        assert_eq!(config.graph.max_traversal_depth, 64);
        assert_eq!(config.graph.default_bridge_fd, 15);
        assert!(!config.graph.default_bridge_stp);
        assert_eq!(config.graph.acquired_bridge_prefix, "br-");
        assert!(config.pool.exclude_gateway);
        assert_eq!(config.pool.default_mtu, 1500);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = MetalnetConfig::from_toml_str(
            r#"
[graph]
default_bridge_fd = 4

[logging]
json = true
"#,
        )
        .unwrap();
        assert_eq!(config.graph.default_bridge_fd, 4);
        assert_eq!(config.graph.max_traversal_depth, 64);
        assert!(config.logging.json);
        assert_eq!(config.pool, PoolConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let mut config = MetalnetConfig::default();
        config.graph.max_traversal_depth = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_mtu() {
        let mut config = MetalnetConfig::default();
        config.pool.default_mtu = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = MetalnetConfig::load_or_default("/nonexistent/metalnet.toml").unwrap();
        assert_eq!(config, MetalnetConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metalnet.toml");

        let mut config = MetalnetConfig::default();
        config.graph.acquired_bridge_prefix = "acq-".to_string();
        config.save(&path).unwrap();

        let loaded = MetalnetConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[graph\nmax_traversal_depth = ").unwrap();

        let err = MetalnetConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: p, .. } if p == path));
    }
}
