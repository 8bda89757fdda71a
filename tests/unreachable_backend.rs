//! A networked backend that never answers: nothing loads, writes are
//! dead-lettered, and nothing blocks the caller.

mod common;

use std::time::Duration;

use guildkeep::config::{GuildConfig, PersistenceConfig};
use guildkeep::guild::{GuildError, GuildRegistry, RegistryState};
use guildkeep::storage::{PersistOp, PlayerRow, StorageManager};
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn registry_never_loads() {
    let storage =
        StorageManager::start(&common::unreachable_storage(), &common::quick_persistence());
    let mut registry = GuildRegistry::start(storage.clone(), &GuildConfig::default());

    let waited = tokio::time::timeout(Duration::from_millis(500), registry.wait_loaded()).await;
    assert!(waited.is_err());
    assert!(!storage.is_ready());
    assert!(!registry.poll_load());
    assert_eq!(registry.state(), RegistryState::WaitingForBackend);
    assert!(registry.lookup_by_name("Alpha").is_none());
    assert_eq!(registry.join_guild(Uuid::new_v4(), Uuid::new_v4()), Err(GuildError::NotLoaded));
    assert_eq!(storage.store_type_name(), "PostgreSQL");
}

#[tokio::test]
async fn failed_writes_are_dead_lettered_and_replayable() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("dead-letters.jsonl");
    let persistence = PersistenceConfig {
        dead_letter_file: Some(file.to_string_lossy().into_owned()),
        ..common::quick_persistence()
    };
    let storage = StorageManager::start(&common::unreachable_storage(), &persistence);

    let player = PlayerRow::new(Uuid::new_v4(), "ghost");
    let outcome = storage
        .commit_player(player.clone())
        .outcome()
        .await
        .unwrap();
    assert!(!outcome.succeeded());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.op, PersistOp::CommitPlayer(player));

    storage.drain().await;
    assert_eq!(storage.dead_letters().len(), 1);
    let mirrored = std::fs::read_to_string(&file).unwrap();
    assert_eq!(mirrored.lines().count(), 1);

    let replays = storage.replay_dead_letters();
    assert_eq!(replays.len(), 1);
    assert!(storage.dead_letters().is_empty());
    for ticket in replays {
        assert!(!ticket.outcome().await.unwrap().succeeded());
    }
    assert_eq!(storage.dead_letters().len(), 1);
    assert_eq!(std::fs::read_to_string(&file).unwrap().lines().count(), 2);
}
