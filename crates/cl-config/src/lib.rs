//! Cardlock Configuration System
//!
//! TOML-based configuration with environment variable overrides. The
//! election crate does not depend on this one; binaries translate
//! [`ElectionSettings`] into the election crate's own config type.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub election: ElectionSettings,
    pub store: StoreSettings,
}

/// Lease and heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionSettings {
    /// Prefix for the two lease keys in the shared store
    pub key_prefix: String,
    /// Broadcast channel name
    pub channel: String,
    pub heartbeat_interval_ms: u64,
    pub lease_timeout_ms: u64,
    /// Opt-in follower re-check. Absent or 0 keeps followers passive.
    pub follower_recheck_interval_ms: Option<u64>,
    /// Opt-in: a leader re-reads the store before stepping down on a
    /// rival's claim announcement.
    pub confirm_rival_claims: bool,
    /// How often the context logs its leadership status
    pub status_log_interval_ms: u64,
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            key_prefix: "cardlock.leader".to_string(),
            channel: "cardlock.leader".to_string(),
            heartbeat_interval_ms: 5_000,
            lease_timeout_ms: 10_000,
            follower_recheck_interval_ms: None,
            confirm_rival_claims: false,
            status_log_interval_ms: 5_000,
        }
    }
}

/// Which shared store backs the lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    File,
}

impl std::str::FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "file" => Ok(StoreKind::File),
            other => Err(ConfigError::ValidationError(format!(
                "unknown store kind '{other}' (expected memory or file)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub kind: StoreKind,
    /// Directory shared by every context on this machine (file store only)
    pub dir: String,
    /// Directory for leadership messages between processes (file store only)
    pub bus_dir: String,
    pub bus_poll_interval_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::File,
            dir: "./data/lease".to_string(),
            bus_dir: "./data/bus".to_string(),
            bus_poll_interval_ms: 250,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let election = &self.election;

        if election.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "election.heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }
        if election.heartbeat_interval_ms >= election.lease_timeout_ms {
            return Err(ConfigError::ValidationError(format!(
                "election.heartbeat_interval_ms ({}) must be less than election.lease_timeout_ms ({})",
                election.heartbeat_interval_ms, election.lease_timeout_ms
            )));
        }
        if election.key_prefix.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "election.key_prefix must not be empty".to_string(),
            ));
        }
        if election.channel.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "election.channel must not be empty".to_string(),
            ));
        }
        if self.store.kind == StoreKind::File {
            if self.store.dir.trim().is_empty() || self.store.bus_dir.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "store.dir and store.bus_dir are required for the file store".to_string(),
                ));
            }
            if self.store.bus_poll_interval_ms == 0 {
                return Err(ConfigError::ValidationError(
                    "store.bus_poll_interval_ms must be greater than zero".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Cardlock Configuration
# Environment variables (CARDLOCK_*) override these settings

[election]
key_prefix = "cardlock.leader"
channel = "cardlock.leader"
heartbeat_interval_ms = 5000
lease_timeout_ms = 10000
# follower_recheck_interval_ms = 5000  # lets followers take over stale leases
# confirm_rival_claims = true  # leader re-reads the store before stepping down
status_log_interval_ms = 5000

[store]
kind = "file"  # file or memory
dir = "./data/lease"
bus_dir = "./data/bus"
bus_poll_interval_ms = 250
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.election.heartbeat_interval_ms, 5_000);
        assert_eq!(config.election.lease_timeout_ms, 10_000);
        assert!(config.election.follower_recheck_interval_ms.is_none());
        assert_eq!(config.store.kind, StoreKind::File);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_toml_parses() {
        let config: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();
        assert_eq!(config.election.key_prefix, "cardlock.leader");
        assert_eq!(config.store.dir, "./data/lease");
        assert_eq!(config.store.bus_dir, "./data/bus");
        assert!(!config.election.confirm_rival_claims);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_store_needs_bus_settings() {
        let mut config = AppConfig::default();
        config.store.bus_poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.store.bus_dir = String::new();
        assert!(config.validate().is_err());

        config.store.kind = StoreKind::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_must_be_below_timeout() {
        let mut config = AppConfig::default();
        config.election.heartbeat_interval_ms = 10_000;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        config.election.heartbeat_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_names_rejected() {
        let mut config = AppConfig::default();
        config.election.channel = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.election.key_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_kind_from_str() {
        assert_eq!("Memory".parse::<StoreKind>().unwrap(), StoreKind::Memory);
        assert_eq!("file".parse::<StoreKind>().unwrap(), StoreKind::File);
        assert!("redis".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [election]
            lease_timeout_ms = 20000

            [store]
            kind = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.election.lease_timeout_ms, 20_000);
        assert_eq!(config.election.heartbeat_interval_ms, 5_000);
        assert_eq!(config.store.kind, StoreKind::Memory);
    }
}
