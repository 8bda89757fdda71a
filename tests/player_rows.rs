//! Player row writes through the storage manager on the embedded backend.

mod common;

use guildkeep::guild::Guild;
use guildkeep::storage::{PersistOp, PlayerRow, StorageManager};
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn commit_clear_and_detach() {
    let dir = TempDir::new().unwrap();
    let storage =
        StorageManager::start(&common::embedded_storage(&dir), &common::quick_persistence());
    storage.gate().wait_ready().await;
    let mut outcomes = storage.subscribe();

    let leader = Uuid::new_v4();
    let guild = Guild::new("Alpha", leader).unwrap();
    storage.persist_guild(guild.to_row());

    let mut row = PlayerRow::new(leader, "ada");
    row.guild = Some(guild.id());
    row.experience = 1250.0;
    row.profession = Some("alchemist".to_string());
    row.karma = -2.5;
    let ticket = storage.commit_player(row.clone());
    let outcome = ticket.outcome().await.unwrap();
    assert!(outcome.succeeded());
    assert_eq!(storage.load_player(leader).await.unwrap(), Some(row));

    storage.delete_guild(guild.id(), guild.name());
    storage.drain().await;
    let detached = storage.load_player(leader).await.unwrap().unwrap();
    assert_eq!(detached.guild, None);
    assert_eq!(detached.experience, 1250.0);

    storage.clear_player_record(leader, "ada2").outcome().await.unwrap();
    assert_eq!(
        storage.load_player(leader).await.unwrap(),
        Some(PlayerRow::new(leader, "ada2"))
    );

    let kinds: Vec<&'static str> = std::iter::from_fn(|| outcomes.try_recv().ok())
        .map(|o| o.op.kind())
        .collect();
    assert_eq!(
        kinds,
        vec!["create_guild", "commit_player", "delete_guild", "clear_player"]
    );
    assert!(storage.load_player(Uuid::new_v4()).await.unwrap().is_none());
    storage.shutdown().await;
}

#[tokio::test]
async fn writes_apply_in_submission_order() {
    let dir = TempDir::new().unwrap();
    let storage =
        StorageManager::start(&common::embedded_storage(&dir), &common::quick_persistence());
    storage.gate().wait_ready().await;

    let mut guild = Guild::new("Ordered", Uuid::new_v4()).unwrap();
    storage.persist_guild(guild.to_row());
    for step in 1..=20 {
        guild.adjust_influence(1);
        storage.update_guild(guild.to_row());
        if step == 10 {
            storage.submit(PersistOp::DeleteGuild {
                id: guild.id(),
                name: guild.name().to_string(),
            });
            storage.persist_guild(guild.to_row());
        }
    }
    storage.drain().await;

    let rows = storage.load_guilds().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].influence, 20);
}
