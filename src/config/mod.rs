//! # Configuration Management Module
//!
//! Guildkeep reads a single TOML file at startup. Every section has defaults, so
//! a missing section simply keeps the default values.
//!
//! ## Configuration Structure
//!
//! - [`StorageConfig`] - backend selection, embedded database location
//! - [`NetworkConfig`] - networked backend address and credentials
//! - [`PoolConfig`] - connection pool bound, idle eviction and sweep cadence
//! - [`PersistenceConfig`] - retry policy and dead-letter log for background writes
//! - [`GuildConfig`] - economy costs and guild-hall protection flags
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use guildkeep::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("guildkeep.toml").await?;
//!     println!("Backend: {:?}", config.storage.backend_kind());
//!
//!     Config::create_default("guildkeep.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [storage]
//! backend = "networked"
//! data_dir = "./data"
//!
//! [storage.network]
//! host = "db.internal"
//! port = 5432
//! username = "guildkeep"
//! password = "secret"
//! database = "guildkeep"
//!
//! [storage.pool]
//! max_size = 8
//! idle_timeout_secs = 300
//!
//! [guilds]
//! creation_cost = 500
//! ```

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// Which storage technology backs the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Single-file embedded database under `data_dir`.
    Embedded,
    /// Pooled connections to a database server.
    Networked,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub guilds: GuildConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selector: "embedded" (aliases "sled", "sqlite") or
    /// "networked" (aliases "postgres", "mysql").
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Embedded database directory name inside `data_dir`.
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

fn default_backend() -> String {
    "embedded".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_db_name() -> String {
    "guildkeep".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
            db_name: default_db_name(),
            network: NetworkConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Resolve the backend selector. Unknown values fall back to the embedded
    /// backend with a warning.
    pub fn backend_kind(&self) -> BackendKind {
        match self.backend.trim().to_ascii_lowercase().as_str() {
            "embedded" | "sled" | "sqlite" => BackendKind::Embedded,
            "networked" | "postgres" | "postgresql" | "mysql" => BackendKind::Networked,
            other => {
                warn!(
                    "storage.backend '{}' is not one of \"embedded\" or \"networked\", \
                     defaulting to embedded",
                    other
                );
                BackendKind::Embedded
            }
        }
    }

    pub fn embedded_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.db_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    5432
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: default_port(),
            username: "guildkeep".to_string(),
            password: String::new(),
            database: "guildkeep".to_string(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Most connections checked out at once.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// How long a caller waits for a connection once `max_size` is reached.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
    /// Idle time after which a connection becomes eligible for eviction.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_max_size() -> usize {
    8
}

fn default_acquire_timeout() -> u64 {
    5000
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    20
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            acquire_timeout_ms: default_acquire_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Attempts per background write before it is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Optional JSON-lines file mirroring the dead-letter log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_file: Option<String>,
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    250
}

fn default_dead_letter_capacity() -> usize {
    256
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            dead_letter_file: None,
            dead_letter_capacity: default_dead_letter_capacity(),
        }
    }
}

/// Global guild options handed to the registry at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    #[serde(default)]
    pub creation_cost: i64,
    #[serde(default)]
    pub invite_cost: i64,
    #[serde(default)]
    pub hall_cost: i64,
    /// Protect guild halls from the environment and hostile mobs.
    #[serde(default = "default_true")]
    pub protect_from_environment: bool,
    /// Disallow PvP inside guild halls.
    #[serde(default = "default_true")]
    pub disallow_hall_pvp: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            creation_cost: 0,
            invite_cost: 0,
            hall_cost: 0,
            protect_from_environment: true,
            disallow_hall_pvp: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("guildkeep.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_aliases() {
        let cases = vec![
            ("embedded", BackendKind::Embedded),
            ("SQLite", BackendKind::Embedded),
            ("sled", BackendKind::Embedded),
            ("networked", BackendKind::Networked),
            ("mysql", BackendKind::Networked),
            ("Postgres", BackendKind::Networked),
        ];
        for (selector, expected) in cases {
            let storage = StorageConfig {
                backend: selector.to_string(),
                ..StorageConfig::default()
            };
            assert_eq!(storage.backend_kind(), expected, "selector {selector}");
        }
    }

    #[test]
    fn test_unknown_backend_defaults_to_embedded() {
        let storage = StorageConfig {
            backend: "oracle".to_string(),
            ..StorageConfig::default()
        };
        assert_eq!(storage.backend_kind(), BackendKind::Embedded);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let text = r#"
            [storage]
            backend = "networked"

            [storage.network]
            host = "db.internal"
            username = "gk"
            database = "guilds"

            [guilds]
            creation_cost = 500
            disallow_hall_pvp = false
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.storage.backend_kind(), BackendKind::Networked);
        assert_eq!(config.storage.network.port, 5432);
        assert_eq!(config.storage.pool.max_size, 8);
        assert_eq!(config.storage.pool.idle_timeout_secs, 300);
        assert_eq!(config.persistence.max_attempts, 3);
        assert_eq!(config.guilds.creation_cost, 500);
        assert!(config.guilds.protect_from_environment);
        assert!(!config.guilds.disallow_hall_pvp);
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.storage.backend, "embedded");
        assert_eq!(parsed.guilds, GuildConfig::default());
        assert_eq!(
            parsed.storage.embedded_path(),
            PathBuf::from("./data").join("guildkeep")
        );
    }
}
