use thiserror::Error;
use uuid::Uuid;

use super::action::GuildAction;

/// Errors returned by guild registry operations. None of these involve storage:
/// persistence problems are reported through `PersistOutcome` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuildError {
    /// Another guild already uses this name (case-insensitive).
    #[error("a guild named {0:?} already exists")]
    NameTaken(String),

    /// A creation listener vetoed the new guild.
    #[error("guild creation cancelled: {0}")]
    Cancelled(String),

    /// The registry has not finished its initial load yet.
    #[error("guild data is still loading")]
    NotLoaded,

    #[error("unknown guild {0}")]
    UnknownGuild(Uuid),

    #[error("unknown rank {0:?}")]
    UnknownRank(String),

    #[error("rank {0:?} already exists")]
    RankExists(String),

    #[error("rank {0:?} cannot be removed")]
    ProtectedRank(String),

    #[error("invalid rank name {0:?}")]
    InvalidRankName(String),

    #[error("invalid guild name {0:?}")]
    InvalidGuildName(String),

    /// A home or hall that could not be stored and read back.
    #[error("invalid location {0:?}")]
    InvalidLocation(String),

    #[error("player {0} is not a member of this guild")]
    NotMember(Uuid),

    #[error("player {0} already belongs to a guild")]
    AlreadyInGuild(Uuid),

    /// The acting player's rank does not grant the action.
    #[error("not permitted to {0}")]
    NotPermitted(GuildAction),

    /// Operation reserved for the guild leader.
    #[error("only the guild leader can do that")]
    LeaderOnly,

    /// The leader cannot be kicked or leave without disbanding.
    #[error("the guild leader cannot be removed")]
    LeaderProtected,
}
