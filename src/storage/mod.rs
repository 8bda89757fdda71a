//! # Storage Module - Pluggable Persistence Layer
//!
//! Guild and player rows live in one of two backends, chosen from configuration:
//!
//! - **Embedded**: a sled database under `data_dir` ([`EmbeddedBackend`])
//! - **Networked**: PostgreSQL behind a bounded [`ConnectionPool`] ([`NetworkedBackend`])
//!
//! ## Architecture
//!
//! ```text
//! StorageManager ──► Backend ──► EmbeddedBackend (sled trees)
//!      │                    └──► NetworkedBackend ──► ConnectionPool ──► PostgreSQL
//!      ├── ReadinessGate     (opened once schema bootstrap succeeds)
//!      ├── PersistOutcome    (broadcast to subscribers, resolves PersistTicket)
//!      └── DeadLetterLog     (writes that exhausted their retries)
//! ```
//!
//! Writes are submitted as [`PersistOp`] snapshots and run on the tokio runtime;
//! the submitting code never waits on them. Storage errors are retried, logged
//! and dead-lettered, never returned to the submitter.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use guildkeep::config::Config;
//! use guildkeep::storage::StorageManager;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let storage = StorageManager::start(&config.storage, &config.persistence);
//!     storage.gate().wait_ready().await;
//!     println!("{} guilds stored", storage.load_guilds().await?.len());
//!     storage.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod embedded;
pub mod errors;
pub mod gate;
pub mod networked;
pub mod outcome;
pub mod pool;
pub mod rows;

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{BackendKind, PersistenceConfig, StorageConfig};

pub use embedded::EmbeddedBackend;
pub use errors::StorageError;
pub use gate::ReadinessGate;
pub use networked::NetworkedBackend;
pub use outcome::{DeadLetterLog, PersistOp, PersistOutcome, PersistTicket, RetryPolicy};
pub use pool::{ConnState, ConnectionPool, PoolStats};
pub use rows::{GuildRow, PlayerRow, SchemaStatus};

const OUTCOME_CHANNEL_CAPACITY: usize = 64;

/// The configured storage technology.
#[derive(Clone)]
pub enum Backend {
    Embedded(EmbeddedBackend),
    Networked(NetworkedBackend),
}

impl Backend {
    /// Build the backend named by `storage.backend`. The networked variant
    /// starts its pool sweeper, so this must run inside a tokio runtime.
    pub fn from_config(storage: &StorageConfig) -> Self {
        match storage.backend_kind() {
            BackendKind::Embedded => {
                Backend::Embedded(EmbeddedBackend::new(storage.embedded_path()))
            }
            BackendKind::Networked => {
                Backend::Networked(NetworkedBackend::new(&storage.network, &storage.pool))
            }
        }
    }

    pub fn store_type_name(&self) -> &'static str {
        match self {
            Backend::Embedded(b) => b.store_type_name(),
            Backend::Networked(b) => b.store_type_name(),
        }
    }

    /// Pool counters for the networked backend.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        match self {
            Backend::Embedded(_) => None,
            Backend::Networked(b) => Some(b.pool_stats()),
        }
    }

    pub async fn initialize(&self) -> Result<SchemaStatus, StorageError> {
        match self {
            Backend::Embedded(b) => b.initialize().await,
            Backend::Networked(b) => b.initialize().await,
        }
    }

    pub async fn persist_guild(&self, row: GuildRow) -> Result<(), StorageError> {
        match self {
            Backend::Embedded(b) => b.persist_guild(row).await,
            Backend::Networked(b) => b.persist_guild(row).await,
        }
    }

    /// Returns `false` when no stored row matched.
    pub async fn update_guild(&self, row: GuildRow) -> Result<bool, StorageError> {
        match self {
            Backend::Embedded(b) => b.update_guild(row).await,
            Backend::Networked(b) => b.update_guild(row).await,
        }
    }

    pub async fn delete_guild(&self, id: Uuid) -> Result<(), StorageError> {
        match self {
            Backend::Embedded(b) => b.delete_guild(id).await.map(|detached| {
                debug!("guild {id} deleted, {detached} player(s) detached");
            }),
            Backend::Networked(b) => b.delete_guild(id).await.map(|_| ()),
        }
    }

    pub async fn load_guilds(&self) -> Result<Vec<GuildRow>, StorageError> {
        match self {
            Backend::Embedded(b) => b.load_guilds().await,
            Backend::Networked(b) => b.load_guilds().await,
        }
    }

    pub async fn load_player(&self, id: Uuid) -> Result<Option<PlayerRow>, StorageError> {
        match self {
            Backend::Embedded(b) => b.load_player(id).await,
            Backend::Networked(b) => b.load_player(id).await,
        }
    }

    pub async fn commit_player(&self, row: PlayerRow) -> Result<(), StorageError> {
        match self {
            Backend::Embedded(b) => b.commit_player(row).await,
            Backend::Networked(b) => b.commit_player(row).await,
        }
    }

    pub async fn clear_player_record(
        &self,
        id: Uuid,
        last_name: String,
    ) -> Result<(), StorageError> {
        match self {
            Backend::Embedded(b) => b.clear_player_record(id, last_name).await,
            Backend::Networked(b) => b.clear_player_record(id, last_name).await,
        }
    }

    pub async fn close(&self) -> Result<(), StorageError> {
        match self {
            Backend::Embedded(b) => b.close().await,
            Backend::Networked(b) => b.close().await,
        }
    }

    /// Run one write job once.
    pub async fn execute(&self, op: &PersistOp) -> Result<(), StorageError> {
        match op {
            PersistOp::CreateGuild(row) => self.persist_guild(row.clone()).await,
            PersistOp::UpdateGuild(row) => {
                if !self.update_guild(row.clone()).await? {
                    debug!("update for guild {} matched no stored row", row.id);
                }
                Ok(())
            }
            PersistOp::DeleteGuild { id, .. } => self.delete_guild(*id).await,
            PersistOp::CommitPlayer(row) => self.commit_player(row.clone()).await,
            PersistOp::ClearPlayer { id, last_name } => {
                self.clear_player_record(*id, last_name.clone()).await
            }
        }
    }
}

/// State shared between manager handles and the persistence worker.
struct Shared {
    backend: Backend,
    gate: ReadinessGate,
    retry: RetryPolicy,
    dead_letters: DeadLetterLog,
    outcomes: broadcast::Sender<PersistOutcome>,
    in_flight: watch::Sender<usize>,
}

struct Job {
    op: PersistOp,
    reply: oneshot::Sender<PersistOutcome>,
}

impl Shared {
    async fn run_job(&self, op: PersistOp) -> PersistOutcome {
        let policy = self.retry;
        let mut attempts = 0;
        let error = loop {
            attempts += 1;
            let result = if self.gate.is_ready() {
                self.backend.execute(&op).await
            } else {
                Err(StorageError::NotReady)
            };
            match result {
                Ok(()) => break None,
                Err(e) if attempts >= policy.max_attempts => break Some(e.to_string()),
                Err(e) => {
                    let delay = policy.backoff(attempts);
                    warn!(
                        "{op} failed (attempt {attempts}/{}): {e}; retrying in {delay:?}",
                        policy.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };
        PersistOutcome {
            op,
            attempts,
            error,
            finished_at: Utc::now(),
        }
    }

    fn finish_one(&self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Runs jobs one at a time in submission order, so writes to the same row
/// land in the order they were made. Exits once every manager handle is gone.
async fn run_worker(shared: Arc<Shared>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(Job { op, reply }) = jobs.recv().await {
        debug!("persisting {op}");
        let outcome = shared.run_job(op).await;
        if !outcome.succeeded() {
            shared.dead_letters.record(outcome.clone()).await;
        }
        let _ = shared.outcomes.send(outcome.clone());
        let _ = reply.send(outcome);
        shared.finish_one();
    }
    debug!("persistence worker stopped");
}

/// Shared handle to the storage layer. Cheap to clone; every clone talks to the
/// same backend, gate, worker and dead-letter log.
#[derive(Clone)]
pub struct StorageManager {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
    runtime: Handle,
}

impl StorageManager {
    /// Wrap `backend` without bootstrapping it and start the persistence
    /// worker. Must be called inside a tokio runtime; the handle can be used
    /// from any thread afterwards.
    pub fn new(backend: Backend, persistence: &PersistenceConfig) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        let (in_flight, _) = watch::channel(0usize);
        let shared = Arc::new(Shared {
            backend,
            gate: ReadinessGate::new(),
            retry: RetryPolicy::from(persistence),
            dead_letters: DeadLetterLog::from_config(persistence),
            outcomes,
            in_flight,
        });
        let runtime = Handle::current();
        let (jobs, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_worker(Arc::clone(&shared), rx));
        Self {
            shared,
            jobs,
            runtime,
        }
    }

    /// Select the configured backend and start schema bootstrap in the
    /// background. Returns immediately.
    pub fn start(storage: &StorageConfig, persistence: &PersistenceConfig) -> Self {
        let manager = Self::new(Backend::from_config(storage), persistence);
        manager.spawn_initialize();
        manager
    }

    /// Bootstrap the schema and open the gate on success. A failure is logged
    /// and the gate stays closed; bootstrap is not retried.
    pub fn spawn_initialize(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(async move {
            let name = shared.backend.store_type_name();
            match shared.backend.initialize().await {
                Ok(status) => {
                    if let SchemaStatus::Mismatch(found) = &status {
                        warn!(
                            "{name}: stored schema version {found} differs, \
                             no migration available"
                        );
                    }
                    info!("{name} storage ready ({status})");
                    shared.gate.mark_ready();
                }
                Err(e) => {
                    error!("{name} storage bootstrap failed: {e}");
                }
            }
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.shared.backend
    }

    pub fn store_type_name(&self) -> &'static str {
        self.shared.backend.store_type_name()
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.shared.gate
    }

    pub fn is_ready(&self) -> bool {
        self.shared.gate.is_ready()
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn dead_letters(&self) -> &DeadLetterLog {
        &self.shared.dead_letters
    }

    /// Receive every outcome finished after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PersistOutcome> {
        self.shared.outcomes.subscribe()
    }

    /// Live handles to the shared state, counting background tasks.
    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Jobs submitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        *self.shared.in_flight.borrow()
    }

    /// Enqueue a write and return without waiting for it.
    pub fn submit(&self, op: PersistOp) -> PersistTicket {
        let (reply, rx) = oneshot::channel();
        self.shared.in_flight.send_modify(|n| *n += 1);
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(Job { op, reply }) {
            error!("persistence worker is gone, dropping {}", job.op);
            self.shared.finish_one();
        }
        PersistTicket::new(rx)
    }

    pub fn persist_guild(&self, row: GuildRow) -> PersistTicket {
        self.submit(PersistOp::CreateGuild(row))
    }

    pub fn update_guild(&self, row: GuildRow) -> PersistTicket {
        self.submit(PersistOp::UpdateGuild(row))
    }

    pub fn delete_guild(&self, id: Uuid, name: impl Into<String>) -> PersistTicket {
        self.submit(PersistOp::DeleteGuild {
            id,
            name: name.into(),
        })
    }

    pub fn commit_player(&self, row: PlayerRow) -> PersistTicket {
        self.submit(PersistOp::CommitPlayer(row))
    }

    pub fn clear_player_record(&self, id: Uuid, last_name: impl Into<String>) -> PersistTicket {
        self.submit(PersistOp::ClearPlayer {
            id,
            last_name: last_name.into(),
        })
    }

    /// Resubmit every dead-lettered job, emptying the log.
    pub fn replay_dead_letters(&self) -> Vec<PersistTicket> {
        self.shared
            .dead_letters
            .take_all()
            .into_iter()
            .map(|outcome| self.submit(outcome.op))
            .collect()
    }

    /// Wait until every submitted job has finished.
    pub async fn drain(&self) {
        let mut rx = self.shared.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub async fn load_guilds(&self) -> Result<Vec<GuildRow>, StorageError> {
        self.shared.backend.load_guilds().await
    }

    pub async fn load_player(&self, id: Uuid) -> Result<Option<PlayerRow>, StorageError> {
        self.shared.backend.load_player(id).await
    }

    /// Drain outstanding jobs, then close the backend.
    pub async fn shutdown(&self) {
        self.drain().await;
        if let Err(e) = self.shared.backend.close().await {
            warn!("{} close failed: {e}", self.store_type_name());
        }
    }
}
