//! Background write jobs and what became of them.
//!
//! A [`PersistOp`] carries a snapshot of the row captured when it was enqueued,
//! so the job never reads live registry state. Each job ends in exactly one
//! [`PersistOutcome`]; jobs that exhaust their retries are kept in the
//! [`DeadLetterLog`] so they can be inspected or replayed.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::rows::{GuildRow, PlayerRow};
use crate::config::PersistenceConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PersistOp {
    CreateGuild(GuildRow),
    UpdateGuild(GuildRow),
    DeleteGuild { id: Uuid, name: String },
    CommitPlayer(PlayerRow),
    ClearPlayer { id: Uuid, last_name: String },
}

impl PersistOp {
    pub fn kind(&self) -> &'static str {
        match self {
            PersistOp::CreateGuild(_) => "create_guild",
            PersistOp::UpdateGuild(_) => "update_guild",
            PersistOp::DeleteGuild { .. } => "delete_guild",
            PersistOp::CommitPlayer(_) => "commit_player",
            PersistOp::ClearPlayer { .. } => "clear_player",
        }
    }

    /// Id of the guild or player the job writes.
    pub fn target(&self) -> Uuid {
        match self {
            PersistOp::CreateGuild(row) | PersistOp::UpdateGuild(row) => row.id,
            PersistOp::DeleteGuild { id, .. } | PersistOp::ClearPlayer { id, .. } => *id,
            PersistOp::CommitPlayer(row) => row.id,
        }
    }
}

impl fmt::Display for PersistOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistOp::CreateGuild(row) | PersistOp::UpdateGuild(row) => {
                write!(f, "{} '{}' ({})", self.kind(), row.name, row.id)
            }
            PersistOp::DeleteGuild { id, name } => write!(f, "{} '{}' ({})", self.kind(), name, id),
            PersistOp::CommitPlayer(row) => {
                write!(f, "{} '{}' ({})", self.kind(), row.last_name, row.id)
            }
            PersistOp::ClearPlayer { id, last_name } => {
                write!(f, "{} '{}' ({})", self.kind(), last_name, id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub op: PersistOp,
    pub attempts: u32,
    /// Last error text when every attempt failed.
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl PersistOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Resolves with the job's outcome. Dropping it does not cancel the job.
#[derive(Debug)]
pub struct PersistTicket {
    rx: oneshot::Receiver<PersistOutcome>,
}

impl PersistTicket {
    pub(crate) fn new(rx: oneshot::Receiver<PersistOutcome>) -> Self {
        Self { rx }
    }

    /// `None` only if the job was torn down with the runtime before finishing.
    pub async fn outcome(self) -> Option<PersistOutcome> {
        self.rx.await.ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from the initial backoff.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor)
    }
}

impl From<&PersistenceConfig> for RetryPolicy {
    fn from(cfg: &PersistenceConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }
}

struct DeadLetterInner {
    capacity: usize,
    entries: Mutex<VecDeque<PersistOutcome>>,
    file: Option<PathBuf>,
}

/// Bounded in-memory record of failed jobs, optionally mirrored to a
/// JSON-lines file. The oldest entry is dropped once `capacity` is reached.
#[derive(Clone)]
pub struct DeadLetterLog {
    inner: Arc<DeadLetterInner>,
}

impl DeadLetterLog {
    pub fn new(capacity: usize, file: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DeadLetterInner {
                capacity: capacity.max(1),
                entries: Mutex::new(VecDeque::new()),
                file,
            }),
        }
    }

    pub fn from_config(cfg: &PersistenceConfig) -> Self {
        Self::new(
            cfg.dead_letter_capacity,
            cfg.dead_letter_file.as_ref().map(PathBuf::from),
        )
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<PersistOutcome>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn record(&self, outcome: PersistOutcome) {
        error!(
            target: "deadletter",
            "{} abandoned after {} attempt(s): {}",
            outcome.op,
            outcome.attempts,
            outcome.error.as_deref().unwrap_or("unknown error")
        );

        if let Some(path) = &self.inner.file {
            if let Err(e) = append_json_line(path, &outcome).await {
                warn!("could not mirror dead letter to {}: {}", path.display(), e);
            }
        }

        let mut entries = self.entries();
        if entries.len() == self.inner.capacity {
            entries.pop_front();
        }
        entries.push_back(outcome);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Oldest first.
    pub fn entries_snapshot(&self) -> Vec<PersistOutcome> {
        self.entries().iter().cloned().collect()
    }

    /// Remove and return every entry, oldest first.
    pub fn take_all(&self) -> Vec<PersistOutcome> {
        self.entries().drain(..).collect()
    }
}

async fn append_json_line(path: &PathBuf, outcome: &PersistOutcome) -> std::io::Result<()> {
    let mut line = serde_json::to_string(outcome)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
