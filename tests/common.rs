//! Test utilities & fixtures shared by the integration tests.

use guildkeep::config::{NetworkConfig, PersistenceConfig, PoolConfig, StorageConfig};
use tempfile::TempDir;

/// Embedded storage rooted in `dir`.
pub fn embedded_storage(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        backend: "embedded".to_string(),
        data_dir: dir.path().to_string_lossy().into_owned(),
        ..StorageConfig::default()
    }
}

/// Fast retries so failing writes settle quickly.
pub fn quick_persistence() -> PersistenceConfig {
    PersistenceConfig {
        max_attempts: 2,
        retry_backoff_ms: 10,
        ..PersistenceConfig::default()
    }
}

/// A networked backend pointed at a port nothing listens on.
#[allow(dead_code)] // only the unreachable-backend tests use it
pub fn unreachable_storage() -> StorageConfig {
    StorageConfig {
        backend: "networked".to_string(),
        network: NetworkConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout_secs: 1,
            ..NetworkConfig::default()
        },
        pool: PoolConfig {
            max_size: 2,
            acquire_timeout_ms: 200,
            ..PoolConfig::default()
        },
        ..StorageConfig::default()
    }
}
