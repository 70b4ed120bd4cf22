use std::time::Duration;

use config as cfg;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TallyError};
use crate::types::TenantId;

/// Settings for the counter pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Seconds between flush cycles.
    #[serde(default = "CounterConfig::default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Seconds to wait for a bulk-reconciliation confirmation before aborting.
    #[serde(default = "CounterConfig::default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    /// Tenants whose activity is counted. An empty list counts every tenant.
    #[serde(default)]
    pub counted_tenants: Vec<TenantId>,
}

impl CounterConfig {
    fn default_flush_interval_secs() -> u64 {
        30
    }

    fn default_confirm_timeout_secs() -> u64 {
        60
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn is_counted(&self, tenant: TenantId) -> bool {
        self.counted_tenants.is_empty() || self.counted_tenants.contains(&tenant)
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: Self::default_flush_interval_secs(),
            confirm_timeout_secs: Self::default_confirm_timeout_secs(),
            counted_tenants: Vec::new(),
        }
    }
}

/// Settings for the durable counter store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_url")]
    pub url: String,
    #[serde(default = "StorageConfig::default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "StorageConfig::default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a pool connection.
    #[serde(default = "StorageConfig::default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Upper bound on any single storage command.
    #[serde(default = "StorageConfig::default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl StorageConfig {
    fn default_url() -> String {
        "sqlite://guildtally.db?mode=rwc".to_string()
    }

    fn default_min_connections() -> u32 {
        10
    }

    fn default_max_connections() -> u32 {
        20
    }

    fn default_acquire_timeout_secs() -> u64 {
        10
    }

    fn default_command_timeout_secs() -> u64 {
        60
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            min_connections: Self::default_min_connections(),
            max_connections: Self::default_max_connections(),
            acquire_timeout_secs: Self::default_acquire_timeout_secs(),
            command_timeout_secs: Self::default_command_timeout_secs(),
        }
    }
}

/// Top-level settings, loaded from an optional config file plus environment
/// overrides (`GUILDTALLY__COUNTER__FLUSH_INTERVAL_SECS` and friends).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub counter: CounterConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from("guildtally")
    }

    pub fn load_from(name: &str) -> Result<Self> {
        let settings = cfg::Config::builder()
            .add_source(cfg::File::with_name(name).required(false))
            .add_source(cfg::Environment::with_prefix("GUILDTALLY").separator("__"))
            .build()
            .map_err(|e| TallyError::Configuration(e.to_string()))?
            .try_deserialize::<Settings>()
            .map_err(|e| TallyError::Configuration(e.to_string()))?;
        info!(
            flush_interval_secs = settings.counter.flush_interval_secs,
            tenants = settings.counter.counted_tenants.len(),
            "settings loaded"
        );
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = CounterConfig::default();
        assert_eq!(config.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.confirm_timeout(), Duration::from_secs(60));
        assert!(config.is_counted(42));

        let storage = StorageConfig::default();
        assert_eq!(storage.acquire_timeout(), Duration::from_secs(10));
        assert_eq!(storage.command_timeout(), Duration::from_secs(60));
        assert!(storage.min_connections <= storage.max_connections);
    }

    #[test]
    fn allow_list_gates_tenants() {
        let config = CounterConfig {
            counted_tenants: vec![7, 9],
            ..Default::default()
        };
        assert!(config.is_counted(7));
        assert!(!config.is_counted(8));
    }
}
