//! Networked backend: PostgreSQL over a bounded [`ConnectionPool`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};
use uuid::Uuid;

use super::errors::StorageError;
use super::pool::{ConnectionPool, Connector, PoolConnection, PoolSettings, PoolStats};
use super::rows::{
    GuildRow, PlayerRow, SchemaStatus, GUILD_TABLE, META_ENTRY, META_TABLE, PLAYER_TABLE,
    SCHEMA_VERSION,
};
use crate::config::{NetworkConfig, PoolConfig};

pub const STORE_TYPE: &str = "PostgreSQL";

/// Opens PostgreSQL sessions and spawns each session's connection driver.
pub struct PgConnector {
    config: tokio_postgres::Config,
}

impl PgConnector {
    pub fn new(net: &NetworkConfig) -> Self {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&net.host)
            .port(net.port)
            .user(&net.username)
            .dbname(&net.database)
            .application_name("guildkeep")
            .connect_timeout(Duration::from_secs(net.connect_timeout_secs.max(1)));
        if !net.password.is_empty() {
            config.password(&net.password);
        }
        Self { config }
    }
}

pub struct PgConnection {
    client: Client,
}

impl PgConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl PoolConnection for PgConnection {
    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Probe(e.to_string()))
    }
}

impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, StorageError> {
        let (client, connection) = self.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("postgres connection terminated: {e}");
            }
        });
        Ok(PgConnection { client })
    }
}

fn create_statements() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {GUILD_TABLE} (
            id UUID PRIMARY KEY,
            name VARCHAR(50) NOT NULL,
            leader UUID NOT NULL,
            members TEXT NOT NULL DEFAULT '',
            ranks TEXT NOT NULL DEFAULT '',
            home VARCHAR(150),
            hall VARCHAR(150),
            influence BIGINT NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS {PLAYER_TABLE} (
            id UUID PRIMARY KEY,
            last_name VARCHAR(16) NOT NULL,
            guild UUID REFERENCES {GUILD_TABLE}(id) ON DELETE SET NULL,
            experience DOUBLE PRECISION NOT NULL DEFAULT 0,
            profession VARCHAR(37),
            second_profession VARCHAR(37),
            influence BIGINT NOT NULL DEFAULT 0,
            karma DOUBLE PRECISION NOT NULL DEFAULT 0,
            mana DOUBLE PRECISION NOT NULL DEFAULT 0,
            settings VARCHAR(100)
        );
        CREATE TABLE IF NOT EXISTS {META_TABLE} (
            version VARCHAR(6) NOT NULL,
            entry VARCHAR(20) PRIMARY KEY
        );"
    )
}

/// Maps a column decode failure on `row` to `MalformedRow`.
fn malformed<'a>(
    entity: &'static str,
    row: &'a Row,
) -> impl Fn(tokio_postgres::Error) -> StorageError + 'a {
    move |e| StorageError::MalformedRow {
        entity,
        id: row
            .try_get::<_, Uuid>("id")
            .map(|id| id.to_string())
            .unwrap_or_else(|_| "?".to_string()),
        reason: e.to_string(),
    }
}

fn guild_from_row(row: &Row) -> Result<GuildRow, StorageError> {
    let bad = malformed("guild", row);
    Ok(GuildRow {
        id: row.try_get("id").map_err(&bad)?,
        name: row.try_get("name").map_err(&bad)?,
        leader: row.try_get("leader").map_err(&bad)?,
        members: row.try_get("members").map_err(&bad)?,
        ranks: row.try_get("ranks").map_err(&bad)?,
        home: row.try_get("home").map_err(&bad)?,
        hall: row.try_get("hall").map_err(&bad)?,
        influence: row.try_get("influence").map_err(&bad)?,
    })
}

fn player_from_row(row: &Row) -> Result<PlayerRow, StorageError> {
    let bad = malformed("player", row);
    Ok(PlayerRow {
        id: row.try_get("id").map_err(&bad)?,
        last_name: row.try_get("last_name").map_err(&bad)?,
        guild: row.try_get("guild").map_err(&bad)?,
        experience: row.try_get("experience").map_err(&bad)?,
        profession: row.try_get("profession").map_err(&bad)?,
        second_profession: row.try_get("second_profession").map_err(&bad)?,
        influence: row.try_get("influence").map_err(&bad)?,
        karma: row.try_get("karma").map_err(&bad)?,
        mana: row.try_get("mana").map_err(&bad)?,
        settings: row.try_get("settings").map_err(&bad)?,
    })
}

#[derive(Clone)]
pub struct NetworkedBackend {
    pool: ConnectionPool<PgConnector>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

pub type PgPooledConnection = super::pool::PooledConnection<PgConnector>;

impl NetworkedBackend {
    /// Build the pool and start its sweeper. Must be called inside a tokio
    /// runtime. No connection is opened until the first acquire.
    pub fn new(net: &NetworkConfig, pool: &PoolConfig) -> Self {
        let pool = ConnectionPool::new(PgConnector::new(net), PoolSettings::from(pool));
        let sweeper = pool.start_sweeper();
        debug!(
            "networked backend targeting {}:{}/{} (max_size={})",
            net.host,
            net.port,
            net.database,
            pool.settings().max_size
        );
        Self {
            pool,
            sweeper: Arc::new(Mutex::new(Some(sweeper))),
        }
    }

    pub fn store_type_name(&self) -> &'static str {
        STORE_TYPE
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub async fn acquire_connection(&self) -> Result<PgPooledConnection, StorageError> {
        self.pool.acquire().await
    }

    pub fn release_connection(&self, conn: PgPooledConnection) {
        self.pool.release(conn);
    }

    pub async fn initialize(&self) -> Result<SchemaStatus, StorageError> {
        let conn = self.acquire_connection().await?;
        let client = conn.client();
        client.batch_execute(&create_statements()).await?;

        let select = format!("SELECT version FROM {META_TABLE} WHERE entry = $1");
        let status = match client.query_opt(select.as_str(), &[&META_ENTRY]).await? {
            None => {
                let insert = format!("INSERT INTO {META_TABLE} (version, entry) VALUES ($1, $2)");
                client.execute(insert.as_str(), &[&SCHEMA_VERSION, &META_ENTRY]).await?;
                SchemaStatus::Created
            }
            Some(row) => {
                let stored: String = row.try_get("version")?;
                if stored == SCHEMA_VERSION {
                    SchemaStatus::Current
                } else {
                    SchemaStatus::Mismatch(stored)
                }
            }
        };
        self.release_connection(conn);
        Ok(status)
    }

    pub async fn persist_guild(&self, row: GuildRow) -> Result<(), StorageError> {
        let conn = self.acquire_connection().await?;
        let sql = format!(
            "INSERT INTO {GUILD_TABLE} (id, name, leader, members, ranks, home, hall, influence)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, leader = EXCLUDED.leader, members = EXCLUDED.members,
                ranks = EXCLUDED.ranks, home = EXCLUDED.home, hall = EXCLUDED.hall,
                influence = EXCLUDED.influence"
        );
        conn.client()
            .execute(
                sql.as_str(),
                &[
                    &row.id,
                    &row.name,
                    &row.leader,
                    &row.members,
                    &row.ranks,
                    &row.home,
                    &row.hall,
                    &row.influence,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn update_guild(&self, row: GuildRow) -> Result<bool, StorageError> {
        let conn = self.acquire_connection().await?;
        let sql = format!(
            "UPDATE {GUILD_TABLE} SET name = $2, leader = $3, members = $4, ranks = $5,
                home = $6, hall = $7, influence = $8
             WHERE id = $1"
        );
        let changed = conn
            .client()
            .execute(
                sql.as_str(),
                &[
                    &row.id,
                    &row.name,
                    &row.leader,
                    &row.members,
                    &row.ranks,
                    &row.home,
                    &row.hall,
                    &row.influence,
                ],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Player rows referencing the guild are detached by the foreign key.
    pub async fn delete_guild(&self, id: Uuid) -> Result<bool, StorageError> {
        let conn = self.acquire_connection().await?;
        let sql = format!("DELETE FROM {GUILD_TABLE} WHERE id = $1");
        Ok(conn.client().execute(sql.as_str(), &[&id]).await? > 0)
    }

    pub async fn load_guilds(&self) -> Result<Vec<GuildRow>, StorageError> {
        let conn = self.acquire_connection().await?;
        let sql = format!(
            "SELECT id, name, leader, members, ranks, home, hall, influence FROM {GUILD_TABLE}"
        );
        let mut guilds = Vec::new();
        for row in conn.client().query(sql.as_str(), &[]).await? {
            match guild_from_row(&row) {
                Ok(guild) => guilds.push(guild),
                Err(e) => warn!("skipping unreadable guild row: {e}"),
            }
        }
        Ok(guilds)
    }

    pub async fn load_player(&self, id: Uuid) -> Result<Option<PlayerRow>, StorageError> {
        let conn = self.acquire_connection().await?;
        let sql = format!("SELECT * FROM {PLAYER_TABLE} WHERE id = $1");
        conn.client()
            .query_opt(sql.as_str(), &[&id])
            .await?
            .map(|row| player_from_row(&row))
            .transpose()
    }

    pub async fn commit_player(&self, row: PlayerRow) -> Result<(), StorageError> {
        let conn = self.acquire_connection().await?;
        let sql = format!(
            "INSERT INTO {PLAYER_TABLE}
                (id, last_name, guild, experience, profession, second_profession,
                 influence, karma, mana, settings)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (id) DO UPDATE SET
                last_name = EXCLUDED.last_name, guild = EXCLUDED.guild,
                experience = EXCLUDED.experience, profession = EXCLUDED.profession,
                second_profession = EXCLUDED.second_profession,
                influence = EXCLUDED.influence, karma = EXCLUDED.karma,
                mana = EXCLUDED.mana, settings = EXCLUDED.settings"
        );
        conn.client()
            .execute(
                sql.as_str(),
                &[
                    &row.id,
                    &row.last_name,
                    &row.guild,
                    &row.experience,
                    &row.profession,
                    &row.second_profession,
                    &row.influence,
                    &row.karma,
                    &row.mana,
                    &row.settings,
                ],
            )
            .await?;
        Ok(())
    }

    /// Delete then reinsert `(id, last_name)` so every other column takes its
    /// default. The two statements are not atomic.
    pub async fn clear_player_record(
        &self,
        id: Uuid,
        last_name: String,
    ) -> Result<(), StorageError> {
        let conn = self.acquire_connection().await?;
        let client = conn.client();
        client
            .execute(format!("DELETE FROM {PLAYER_TABLE} WHERE id = $1").as_str(), &[&id])
            .await?;
        client
            .execute(
                format!("INSERT INTO {PLAYER_TABLE} (id, last_name) VALUES ($1, $2)").as_str(),
                &[&id, &last_name],
            )
            .await?;
        Ok(())
    }

    /// Stop the sweeper and drop every idle connection.
    pub async fn close(&self) -> Result<(), StorageError> {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper {
            handle.abort();
        }
        self.pool.close();
        info!("networked backend closed");
        Ok(())
    }
}
