//! # Guildkeep - Guild Registry over Pluggable Storage
//!
//! Guildkeep keeps a game server's guilds, their ranks and the actions each rank
//! may perform in memory, and persists them in the background to either an
//! embedded database or a PostgreSQL server.
//!
//! ## Features
//!
//! - **Pluggable Backends**: sled on local disk, or PostgreSQL through a bounded connection pool
//! - **Non-blocking Startup**: schema bootstrap runs in the background behind a readiness gate
//! - **Rank Authorization**: first-match rank lookup with stable action tokens on the wire
//! - **Observable Persistence**: every write yields an outcome; exhausted writes are dead-lettered
//! - **Text Console**: guild management commands over a line-based interface
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use guildkeep::config::Config;
//! use guildkeep::guild::GuildRegistry;
//! use guildkeep::storage::StorageManager;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("guildkeep.toml").await?;
//!     let storage = StorageManager::start(&config.storage, &config.persistence);
//!
//!     let mut registry = GuildRegistry::start(storage.clone(), &config.guilds);
//!     registry.wait_loaded().await;
//!     registry.create_guild("Iron Wolves", Uuid::new_v4())?;
//!
//!     storage.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - TOML configuration
//! - [`storage`] - backends, connection pool, readiness gate, persistence jobs
//! - [`guild`] - guild model, registry and command surface
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  GuildRegistry  │ ← synchronous: lookups, mutations, listeners
//! └─────────────────┘
//!          │ PersistOp (fire and forget)
//! ┌─────────────────┐
//! │ StorageManager  │ ← background: retries, outcomes, dead letters
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Embedded / Pool │ ← sled or PostgreSQL
//! └─────────────────┘
//! ```

pub mod config;
pub mod guild;
pub mod storage;
