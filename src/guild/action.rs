//! Guild-scoped privileged actions.
//!
//! Every action carries two identities that never depend on declaration order:
//! a stable token (`kick`, `invite`, ...) used both by the text command surface
//! and by the rank wire format, and a fixed legacy tag that older stored rank
//! blobs used before tokens were written.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuildAction {
    /// Remove another member from the guild
    KickMember,
    /// Invite players into the guild
    Invite,
    /// Move the guild home location
    SetHome,
    /// Place or break blocks inside the guild hall
    ModifyHall,
}

impl GuildAction {
    pub const ALL: [GuildAction; 4] = [
        GuildAction::KickMember,
        GuildAction::Invite,
        GuildAction::SetHome,
        GuildAction::ModifyHall,
    ];

    /// Player-readable token, also written into stored rank blobs.
    pub fn token(self) -> &'static str {
        match self {
            GuildAction::KickMember => "kick",
            GuildAction::Invite => "invite",
            GuildAction::SetHome => "sethome",
            GuildAction::ModifyHall => "modifyhall",
        }
    }

    /// Numeric tag used by legacy rank blobs. Assigned here explicitly so that
    /// adding variants never shifts existing values.
    pub fn legacy_tag(self) -> u8 {
        match self {
            GuildAction::KickMember => 0,
            GuildAction::Invite => 1,
            GuildAction::SetHome => 2,
            GuildAction::ModifyHall => 3,
        }
    }

    /// Parse a player-readable token (case-insensitive).
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|action| action.token().eq_ignore_ascii_case(token))
    }

    pub fn from_legacy_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.legacy_tag() == tag)
    }
}

impl fmt::Display for GuildAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
