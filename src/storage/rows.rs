//! Backend-agnostic row shapes and schema constants shared by both backends.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version stamp written into the metadata table on first bootstrap.
pub const SCHEMA_VERSION: &str = "1";
/// Primary key of the single metadata row.
pub const META_ENTRY: &str = "guildkeep";

pub const PLAYER_TABLE: &str = "guildkeep_players";
pub const GUILD_TABLE: &str = "guildkeep_guilds";
pub const META_TABLE: &str = "guildkeep_meta";

/// One persisted guild. `members` and `ranks` hold the text encodings produced
/// by [`crate::guild::Guild::to_row`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRow {
    pub id: Uuid,
    pub name: String,
    pub leader: Uuid,
    pub members: String,
    pub ranks: String,
    pub home: Option<String>,
    pub hall: Option<String>,
    pub influence: i64,
}

/// One persisted player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRow {
    pub id: Uuid,
    pub last_name: String,
    pub guild: Option<Uuid>,
    pub experience: f64,
    pub profession: Option<String>,
    pub second_profession: Option<String>,
    pub influence: i64,
    pub karma: f64,
    pub mana: f64,
    pub settings: Option<String>,
}

impl PlayerRow {
    /// A row with every column at its default, as written when a player record
    /// is cleared.
    pub fn new(id: Uuid, last_name: impl Into<String>) -> Self {
        Self {
            id,
            last_name: last_name.into(),
            guild: None,
            experience: 0.0,
            profession: None,
            second_profession: None,
            influence: 0,
            karma: 0.0,
            mana: 0.0,
            settings: None,
        }
    }
}

/// What `initialize` found in the metadata table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// No version row existed; the current version was written.
    Created,
    /// The stored version matches [`SCHEMA_VERSION`].
    Current,
    /// A different version is stored. No migration runs.
    Mismatch(String),
}

impl std::fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaStatus::Created => write!(f, "schema v{SCHEMA_VERSION} created"),
            SchemaStatus::Current => write!(f, "schema v{SCHEMA_VERSION}"),
            SchemaStatus::Mismatch(found) => {
                write!(f, "schema v{found} found, expected v{SCHEMA_VERSION}")
            }
        }
    }
}
