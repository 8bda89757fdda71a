//! Registry load lifecycle and live mutations against the embedded backend.

mod common;

use std::time::Duration;

use guildkeep::config::{GuildConfig, PersistenceConfig};
use guildkeep::guild::{
    execute, parse_command, Guild, GuildAction, GuildError, GuildRank, GuildRegistry, Location,
    Region, RegistryState,
};
use guildkeep::storage::{Backend, EmbeddedBackend, StorageManager};
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn lookups_wait_for_the_backend_and_bulk_load() {
    let dir = TempDir::new().unwrap();
    let path = common::embedded_storage(&dir).embedded_path();

    let seeded = Guild::new("Alpha", Uuid::new_v4()).unwrap();
    let seed = EmbeddedBackend::new(&path);
    seed.persist_guild(seeded.to_row()).await.unwrap();
    seed.close().await.unwrap();
    drop(seed);

    let storage = StorageManager::new(
        Backend::Embedded(EmbeddedBackend::new(&path)),
        &common::quick_persistence(),
    );
    let mut registry = GuildRegistry::new(storage.clone(), &GuildConfig::default());
    assert_eq!(registry.state(), RegistryState::Constructing);

    registry.begin_load();
    assert_eq!(registry.state(), RegistryState::WaitingForBackend);
    assert!(registry.lookup_by_name("Alpha").is_none());
    assert!(registry.snapshot().is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!registry.poll_load());
    assert!(!registry.is_loaded());

    storage.spawn_initialize().await.unwrap();
    registry.wait_loaded().await;
    assert!(registry.is_loaded());
    assert_eq!(registry.state(), RegistryState::Loaded);

    let found = registry.lookup_by_name("alpha").unwrap();
    assert_eq!(found, &seeded);
    assert!(registry.channels().is_registered(&seeded.id()));
    assert_eq!(registry.snapshot().unwrap().len(), 1);
}

#[tokio::test]
async fn case_insensitive_names_and_disband() {
    let dir = TempDir::new().unwrap();
    let storage =
        StorageManager::start(&common::embedded_storage(&dir), &common::quick_persistence());
    let mut registry = GuildRegistry::start(storage.clone(), &GuildConfig::default());
    registry.wait_loaded().await;

    let alpha = registry.create_guild("Alpha", Uuid::new_v4()).unwrap();
    assert_eq!(
        registry.add_guild(Guild::new("alpha", Uuid::new_v4()).unwrap(), false),
        Err(GuildError::NameTaken("alpha".to_string()))
    );
    assert_eq!(registry.len(), 1);
    assert!(registry.channels().is_registered(&alpha));

    registry.remove_guild(alpha).unwrap();
    assert!(registry.lookup_by_name("Alpha").is_none());
    assert!(!registry.channels().is_registered(&alpha));
    assert_eq!(registry.remove_guild(alpha), Err(GuildError::UnknownGuild(alpha)));

    storage.drain().await;
    assert!(storage.load_guilds().await.unwrap().is_empty());
    assert!(storage.dead_letters().is_empty());
}

#[tokio::test]
async fn stored_duplicates_are_trusted() {
    let dir = TempDir::new().unwrap();
    let storage =
        StorageManager::start(&common::embedded_storage(&dir), &common::quick_persistence());
    let mut registry = GuildRegistry::start(storage, &GuildConfig::default());
    registry.wait_loaded().await;

    registry.add_guild(Guild::new("Alpha", Uuid::new_v4()).unwrap(), true).unwrap();
    registry.add_guild(Guild::new("ALPHA", Uuid::new_v4()).unwrap(), true).unwrap();
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn disband_needs_a_loaded_registry() {
    let dir = TempDir::new().unwrap();
    let patient = PersistenceConfig {
        max_attempts: 10,
        retry_backoff_ms: 20,
        ..PersistenceConfig::default()
    };
    let storage = StorageManager::new(
        Backend::Embedded(EmbeddedBackend::new(dir.path().join("db"))),
        &patient,
    );
    let mut registry = GuildRegistry::start(storage.clone(), &GuildConfig::default());

    // Live creation is accepted before the load; removal is not.
    let early = registry.create_guild("Early", Uuid::new_v4()).unwrap();
    assert_eq!(registry.remove_guild(early), Err(GuildError::NotLoaded));

    storage.spawn_initialize().await.unwrap();
    storage.drain().await;
    registry.wait_loaded().await;
    assert_eq!(registry.len(), 1, "stored copy of a live guild is not loaded twice");
    registry.remove_guild(early).unwrap();
}

#[tokio::test]
async fn guild_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let leader = Uuid::new_v4();
    let officer = Uuid::new_v4();

    let before = {
        let storage =
            StorageManager::start(&common::embedded_storage(&dir), &common::quick_persistence());
        let mut registry = GuildRegistry::start(storage.clone(), &GuildConfig::default());
        registry.wait_loaded().await;

        let id = registry.create_guild("Iron Wolves", leader).unwrap();
        registry.join_guild(id, officer).unwrap();
        let officer_rank =
            GuildRank::new("Officer", [GuildAction::Invite, GuildAction::SetHome]).unwrap();
        registry.create_rank(id, leader, officer_rank).unwrap();
        registry.assign_rank(id, leader, officer, "Officer").unwrap();
        registry
            .set_home(id, officer, Some(Location::new("overworld", 12.5, 70.0, -301.25)))
            .unwrap();
        registry.adjust_influence(id, 42).unwrap();

        let snapshot = registry.lookup_by_id(id).unwrap().clone();
        storage.shutdown().await;
        assert!(storage.dead_letters().is_empty());
        snapshot
    };

    let storage =
        StorageManager::start(&common::embedded_storage(&dir), &common::quick_persistence());
    let mut registry = GuildRegistry::start(storage, &GuildConfig::default());
    registry.wait_loaded().await;
    let after = registry.lookup_by_member(&officer).unwrap();
    assert_eq!(after, &before);
    assert!(after.can(&officer, GuildAction::SetHome));
    assert!(!after.can(&officer, GuildAction::KickMember));
}

#[tokio::test]
async fn homes_and_halls_set_from_the_console_reload() {
    let dir = TempDir::new().unwrap();
    let leader = Uuid::new_v4();

    {
        let storage =
            StorageManager::start(&common::embedded_storage(&dir), &common::quick_persistence());
        let mut registry = GuildRegistry::start(storage.clone(), &GuildConfig::default());
        registry.wait_loaded().await;
        let mut run = |line: &str| execute(&mut registry, leader, parse_command(line));

        assert_eq!(run("create Alpha"), "Guild 'Alpha' founded.");
        assert!(run("sethome a,b 1 2 3").starts_with("Error: invalid location"));
        assert!(run("sethome world NaN 64 0").starts_with("Usage: SETHOME"));
        assert!(run("sethall a,b 0 0 0 1 1 1").starts_with("Error: invalid location"));
        assert!(run("sethome world -0.5 64 12.25").starts_with("Guild home set"));
        assert!(run("sethall world -0.5 0 -0.5 4 10 4").starts_with("Guild hall claimed"));
        storage.shutdown().await;
        assert!(storage.dead_letters().is_empty());
    }

    let storage =
        StorageManager::start(&common::embedded_storage(&dir), &common::quick_persistence());
    let mut registry = GuildRegistry::start(storage, &GuildConfig::default());
    registry.wait_loaded().await;

    let alpha = registry.lookup_by_name("Alpha").expect("guild reloads");
    assert!(alpha.is_leader(&leader));
    assert_eq!(alpha.home(), Some(&Location::new("world", -0.5, 64.0, 12.25)));
    assert_eq!(alpha.hall(), Some(&Region::new("world", (-1, 0, -1), (4, 10, 4))));

    let standing = Location::new("world", -0.5, 1.0, -0.5);
    assert_eq!(registry.hall_at(&standing).map(Guild::id), Some(alpha.id()));
}
