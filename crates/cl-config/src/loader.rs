//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "cardlock.toml",
    "config.toml",
    "./config/cardlock.toml",
    "/etc/cardlock/config.toml",
];

/// Configuration loader
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) but reads overrides through `lookup`.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file(&lookup) {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, &lookup);
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file<F>(&self, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured file does not exist, falling back to search paths");
        }

        if let Some(path) = lookup("CARDLOCK_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value, "Ignoring unparsable environment override");
            None
        }
    }
}

fn apply_overrides<F>(config: &mut AppConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    // Election
    if let Some(val) = lookup("CARDLOCK_KEY_PREFIX") {
        config.election.key_prefix = val;
    }
    if let Some(val) = lookup("CARDLOCK_CHANNEL") {
        config.election.channel = val;
    }
    if let Some(val) = lookup("CARDLOCK_HEARTBEAT_INTERVAL_MS") {
        if let Some(ms) = parse_or_warn("CARDLOCK_HEARTBEAT_INTERVAL_MS", &val) {
            config.election.heartbeat_interval_ms = ms;
        }
    }
    if let Some(val) = lookup("CARDLOCK_LEASE_TIMEOUT_MS") {
        if let Some(ms) = parse_or_warn("CARDLOCK_LEASE_TIMEOUT_MS", &val) {
            config.election.lease_timeout_ms = ms;
        }
    }
    if let Some(val) = lookup("CARDLOCK_FOLLOWER_RECHECK_MS") {
        if let Some(ms) = parse_or_warn::<u64>("CARDLOCK_FOLLOWER_RECHECK_MS", &val) {
            config.election.follower_recheck_interval_ms = (ms > 0).then_some(ms);
        }
    }
    if let Some(val) = lookup("CARDLOCK_CONFIRM_RIVAL_CLAIMS") {
        if let Some(confirm) = parse_or_warn("CARDLOCK_CONFIRM_RIVAL_CLAIMS", &val) {
            config.election.confirm_rival_claims = confirm;
        }
    }
    if let Some(val) = lookup("CARDLOCK_STATUS_LOG_INTERVAL_MS") {
        if let Some(ms) = parse_or_warn("CARDLOCK_STATUS_LOG_INTERVAL_MS", &val) {
            config.election.status_log_interval_ms = ms;
        }
    }

    // Store
    if let Some(val) = lookup("CARDLOCK_STORE") {
        if let Some(kind) = parse_or_warn("CARDLOCK_STORE", &val) {
            config.store.kind = kind;
        }
    }
    if let Some(val) = lookup("CARDLOCK_STORE_DIR") {
        config.store.dir = val;
    }
    if let Some(val) = lookup("CARDLOCK_BUS_DIR") {
        config.store.bus_dir = val;
    }
    if let Some(val) = lookup("CARDLOCK_BUS_POLL_MS") {
        if let Some(ms) = parse_or_warn("CARDLOCK_BUS_POLL_MS", &val) {
            config.store.bus_poll_interval_ms = ms;
        }
    }
}
