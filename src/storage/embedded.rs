//! Embedded backend: a single sled database under the configured data directory.
//!
//! Each logical table is a sled tree and each row a bincode blob keyed by
//! `<table>:<uuid>`. The database handle is opened lazily, cached, and reopened
//! on the next acquire after [`EmbeddedBackend::close`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use sled::IVec;
use uuid::Uuid;

use super::errors::StorageError;
use super::rows::{
    GuildRow, PlayerRow, SchemaStatus, GUILD_TABLE, META_ENTRY, META_TABLE, PLAYER_TABLE,
    SCHEMA_VERSION,
};

pub const STORE_TYPE: &str = "Sled";

#[derive(Clone)]
pub struct EmbeddedBackend {
    path: PathBuf,
    db: Arc<Mutex<Option<sled::Db>>>,
}

/// The cached database handle plus its three trees.
pub struct EmbeddedConnection {
    db: sled::Db,
    players: sled::Tree,
    guilds: sled::Tree,
    meta: sled::Tree,
}

fn guild_key(id: Uuid) -> Vec<u8> {
    format!("guilds:{id}").into_bytes()
}

fn player_key(id: Uuid) -> Vec<u8> {
    format!("players:{id}").into_bytes()
}

fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serialize(value)?)
}

fn deserialize<T: serde::de::DeserializeOwned>(bytes: &IVec) -> Result<T, StorageError> {
    Ok(bincode::deserialize::<T>(bytes)?)
}

impl EmbeddedConnection {
    fn open(db: sled::Db) -> Result<Self, StorageError> {
        let players = db.open_tree(PLAYER_TABLE)?;
        let guilds = db.open_tree(GUILD_TABLE)?;
        let meta = db.open_tree(META_TABLE)?;
        Ok(Self {
            db,
            players,
            guilds,
            meta,
        })
    }

    /// Stamp the schema version on first use and report what was found.
    pub fn initialize(&self) -> Result<SchemaStatus, StorageError> {
        let status = match self.meta.get(META_ENTRY)? {
            None => {
                self.meta.insert(META_ENTRY, SCHEMA_VERSION.as_bytes())?;
                SchemaStatus::Created
            }
            Some(stored) if stored.as_ref() == SCHEMA_VERSION.as_bytes() => SchemaStatus::Current,
            Some(stored) => SchemaStatus::Mismatch(String::from_utf8_lossy(&stored).into_owned()),
        };
        self.db.flush()?;
        Ok(status)
    }

    /// Insert or replace a guild row.
    pub fn put_guild(&self, row: &GuildRow) -> Result<(), StorageError> {
        self.guilds.insert(guild_key(row.id), serialize(row)?)?;
        Ok(())
    }

    /// Overwrite an existing guild row. Returns `false` when no row matched.
    pub fn update_guild(&self, row: &GuildRow) -> Result<bool, StorageError> {
        let key = guild_key(row.id);
        if !self.guilds.contains_key(&key)? {
            return Ok(false);
        }
        self.guilds.insert(key, serialize(row)?)?;
        Ok(true)
    }

    /// Remove a guild row and detach every player that referenced it. Returns
    /// the number of detached players.
    pub fn delete_guild(&self, id: Uuid) -> Result<usize, StorageError> {
        self.guilds.remove(guild_key(id))?;
        let mut detached = 0;
        for entry in self.players.iter() {
            let (key, bytes) = entry?;
            let mut player: PlayerRow = deserialize(&bytes)?;
            if player.guild == Some(id) {
                player.guild = None;
                self.players.insert(key, serialize(&player)?)?;
                detached += 1;
            }
        }
        Ok(detached)
    }

    /// Every readable guild row. Rows that fail to decode are skipped.
    pub fn guilds(&self) -> Result<Vec<GuildRow>, StorageError> {
        let mut rows = Vec::new();
        for entry in self.guilds.iter() {
            let (key, bytes) = entry?;
            match deserialize::<GuildRow>(&bytes) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(
                    "skipping unreadable guild row {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(rows)
    }

    /// A stored row that no longer decodes is reported as `MalformedRow`.
    pub fn player(&self, id: Uuid) -> Result<Option<PlayerRow>, StorageError> {
        let Some(bytes) = self.players.get(player_key(id))? else {
            return Ok(None);
        };
        deserialize(&bytes)
            .map(Some)
            .map_err(|e| StorageError::MalformedRow {
                entity: "player",
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn put_player(&self, row: &PlayerRow) -> Result<(), StorageError> {
        self.players.insert(player_key(row.id), serialize(row)?)?;
        Ok(())
    }

    /// Delete the player row and write back only its id and last known name.
    pub fn clear_player(&self, id: Uuid, last_name: &str) -> Result<(), StorageError> {
        let key = player_key(id);
        self.players.remove(&key)?;
        self.players
            .insert(key, serialize(&PlayerRow::new(id, last_name))?)?;
        Ok(())
    }
}

impl EmbeddedBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store_type_name(&self) -> &'static str {
        STORE_TYPE
    }

    fn cached(&self) -> MutexGuard<'_, Option<sled::Db>> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the database on first use (or after `close`) and hand out the
    /// cached handle. Blocking.
    pub fn acquire_connection(&self) -> Result<EmbeddedConnection, StorageError> {
        let db = {
            let mut cached = self.cached();
            match cached.as_ref() {
                Some(db) => db.clone(),
                None => {
                    std::fs::create_dir_all(&self.path)?;
                    let db = sled::open(&self.path)?;
                    debug!("opened embedded store at {}", self.path.display());
                    *cached = Some(db.clone());
                    db
                }
            }
        };
        EmbeddedConnection::open(db)
    }

    /// The embedded handle is shared, so there is nothing to hand back.
    pub fn release_connection(&self, _conn: EmbeddedConnection) {}

    async fn run<T, F>(&self, job: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&EmbeddedConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let backend = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = backend.acquire_connection()?;
            let result = job(&conn);
            backend.release_connection(conn);
            result
        })
        .await?
    }

    pub async fn initialize(&self) -> Result<SchemaStatus, StorageError> {
        self.run(|conn| conn.initialize()).await
    }

    pub async fn persist_guild(&self, row: GuildRow) -> Result<(), StorageError> {
        self.run(move |conn| conn.put_guild(&row)).await
    }

    pub async fn update_guild(&self, row: GuildRow) -> Result<bool, StorageError> {
        self.run(move |conn| conn.update_guild(&row)).await
    }

    pub async fn delete_guild(&self, id: Uuid) -> Result<usize, StorageError> {
        self.run(move |conn| conn.delete_guild(id)).await
    }

    pub async fn load_guilds(&self) -> Result<Vec<GuildRow>, StorageError> {
        self.run(|conn| conn.guilds()).await
    }

    pub async fn load_player(&self, id: Uuid) -> Result<Option<PlayerRow>, StorageError> {
        self.run(move |conn| conn.player(id)).await
    }

    pub async fn commit_player(&self, row: PlayerRow) -> Result<(), StorageError> {
        self.run(move |conn| conn.put_player(&row)).await
    }

    pub async fn clear_player_record(
        &self,
        id: Uuid,
        last_name: String,
    ) -> Result<(), StorageError> {
        self.run(move |conn| conn.clear_player(id, &last_name)).await
    }

    /// Flush and drop the cached handle. A later acquire reopens the database.
    pub async fn close(&self) -> Result<(), StorageError> {
        let Some(db) = self.cached().take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || db.flush().map(|_| ()))
            .await?
            .map_err(StorageError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn guild_row(name: &str, leader: Uuid) -> GuildRow {
        GuildRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            leader,
            members: leader.to_string(),
            ranks: String::new(),
            home: None,
            hall: None,
            influence: 0,
        }
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let backend = EmbeddedBackend::new(dir.path().join("db"));
        assert_eq!(backend.initialize().await.unwrap(), SchemaStatus::Created);
        assert_eq!(backend.initialize().await.unwrap(), SchemaStatus::Current);
    }

    #[tokio::test]
    async fn mismatched_version_is_reported_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let backend = EmbeddedBackend::new(dir.path().join("db"));
        let conn = backend.acquire_connection().unwrap();
        conn.meta.insert(META_ENTRY, "0".as_bytes()).unwrap();
        backend.release_connection(conn);

        assert_eq!(
            backend.initialize().await.unwrap(),
            SchemaStatus::Mismatch("0".to_string())
        );
        assert_eq!(
            backend.initialize().await.unwrap(),
            SchemaStatus::Mismatch("0".to_string())
        );
    }

    #[tokio::test]
    async fn delete_guild_detaches_players() {
        let dir = TempDir::new().unwrap();
        let backend = EmbeddedBackend::new(dir.path().join("db"));
        backend.initialize().await.unwrap();

        let leader = Uuid::new_v4();
        let row = guild_row("Alpha", leader);
        backend.persist_guild(row.clone()).await.unwrap();

        let mut member = PlayerRow::new(leader, "ada");
        member.guild = Some(row.id);
        backend.commit_player(member).await.unwrap();
        let bystander = PlayerRow::new(Uuid::new_v4(), "bob");
        backend.commit_player(bystander.clone()).await.unwrap();

        assert_eq!(backend.delete_guild(row.id).await.unwrap(), 1);
        assert!(backend.load_guilds().await.unwrap().is_empty());
        let reloaded = backend.load_player(leader).await.unwrap().unwrap();
        assert_eq!(reloaded.guild, None);
        assert_eq!(
            backend.load_player(bystander.id).await.unwrap(),
            Some(bystander)
        );
    }

    #[tokio::test]
    async fn update_of_missing_guild_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let backend = EmbeddedBackend::new(dir.path().join("db"));
        let row = guild_row("Ghost", Uuid::new_v4());
        assert!(!backend.update_guild(row.clone()).await.unwrap());
        assert!(backend.load_guilds().await.unwrap().is_empty());

        backend.persist_guild(row.clone()).await.unwrap();
        let mut renamed = row.clone();
        renamed.influence = 12;
        assert!(backend.update_guild(renamed.clone()).await.unwrap());
        assert_eq!(backend.load_guilds().await.unwrap(), vec![renamed]);
    }

    #[tokio::test]
    async fn clear_player_record_resets_columns() {
        let dir = TempDir::new().unwrap();
        let backend = EmbeddedBackend::new(dir.path().join("db"));
        let id = Uuid::new_v4();
        let mut row = PlayerRow::new(id, "old-name");
        row.experience = 120.5;
        row.profession = Some("smith".to_string());
        row.influence = 40;
        backend.commit_player(row).await.unwrap();

        backend
            .clear_player_record(id, "new-name".to_string())
            .await
            .unwrap();
        assert_eq!(
            backend.load_player(id).await.unwrap(),
            Some(PlayerRow::new(id, "new-name"))
        );
    }

    #[tokio::test]
    async fn undecodable_player_row_is_malformed() {
        let dir = TempDir::new().unwrap();
        let backend = EmbeddedBackend::new(dir.path().join("db"));
        let id = Uuid::new_v4();
        let conn = backend.acquire_connection().unwrap();
        conn.players.insert(player_key(id), &[0xff_u8, 0x01][..]).unwrap();
        backend.release_connection(conn);

        match backend.load_player(id).await {
            Err(StorageError::MalformedRow { entity, id: row_id, .. }) => {
                assert_eq!(entity, "player");
                assert_eq!(row_id, id.to_string());
            }
            other => panic!("expected a malformed row, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_then_reopen_keeps_rows() {
        let dir = TempDir::new().unwrap();
        let backend = EmbeddedBackend::new(dir.path().join("db"));
        let row = guild_row("Beta", Uuid::new_v4());
        backend.persist_guild(row.clone()).await.unwrap();
        backend.close().await.unwrap();
        backend.close().await.unwrap();

        assert_eq!(backend.load_guilds().await.unwrap(), vec![row]);
        assert_eq!(backend.store_type_name(), "Sled");
    }
}
