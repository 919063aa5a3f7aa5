//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Maintenance ledger configuration.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// What happens to the other credits when a credit is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReallocationPolicy {
    /// Deductions of the deleted credit turn straight back into debt.
    #[default]
    ReverseOnly,
    /// The whole license is replayed chronologically after the deletion.
    Replay,
}

/// Maintenance ledger configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Policy applied after a credit or expenditure deletion.
    #[serde(default)]
    pub reallocation_policy: ReallocationPolicy,
    /// Maximum number of cached settlement results.
    #[serde(default = "default_settlement_cache_capacity")]
    pub settlement_cache_capacity: u64,
    /// Time-to-live for cached settlement results in seconds.
    #[serde(default = "default_settlement_cache_ttl")]
    pub settlement_cache_ttl_secs: u64,
}

fn default_settlement_cache_capacity() -> u64 {
    1_000
}

fn default_settlement_cache_ttl() -> u64 {
    300 // 5 minutes
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            reallocation_policy: ReallocationPolicy::default(),
            settlement_cache_capacity: default_settlement_cache_capacity(),
            settlement_cache_ttl_secs: default_settlement_cache_ttl(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("TIMEBANK").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
