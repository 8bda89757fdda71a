//! Guild ranks and their stored text encoding.
//!
//! A rank is encoded as `name:action#action:member#member`. Actions are written
//! as their stable tokens; decoding also accepts the numeric legacy tags found in
//! older rows. Rank names may not contain any of [`RESERVED_CHARS`], which is
//! enforced when a rank is built so the encoding never needs escaping.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::action::GuildAction;
use super::errors::GuildError;

/// Separators used by the rank and member blob encodings.
pub const RESERVED_CHARS: [char; 3] = [':', '#', ','];
pub const MAX_RANK_NAME_LEN: usize = 32;

const FIELD_SEP: char = ':';
const ITEM_SEP: char = '#';

/// Errors produced while decoding a stored rank.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RankCodecError {
    #[error("rank encoding needs 3 ':'-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid rank name in encoding: {0:?}")]
    InvalidName(String),

    #[error("unknown guild action {0:?}")]
    UnknownAction(String),

    #[error("invalid member id {0:?}")]
    InvalidMember(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRank {
    name: String,
    permitted: BTreeSet<GuildAction>,
    members: BTreeSet<Uuid>,
}

/// Check a rank name against the encoding constraints.
pub fn validate_rank_name(name: &str) -> Result<(), GuildError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.len() != name.len()
        || name.chars().count() > MAX_RANK_NAME_LEN
        || name.contains(RESERVED_CHARS)
        || name.chars().any(char::is_control)
    {
        return Err(GuildError::InvalidRankName(name.to_string()));
    }
    Ok(())
}

impl GuildRank {
    pub fn new(
        name: impl Into<String>,
        permitted: impl IntoIterator<Item = GuildAction>,
    ) -> Result<Self, GuildError> {
        let name = name.into();
        validate_rank_name(&name)?;
        Ok(Self {
            name,
            permitted: permitted.into_iter().collect(),
            members: BTreeSet::new(),
        })
    }

    /// Builder-style member seeding, mostly for bulk construction.
    pub fn with_members(mut self, members: impl IntoIterator<Item = Uuid>) -> Self {
        self.members.extend(members);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permitted(&self) -> &BTreeSet<GuildAction> {
        &self.permitted
    }

    pub fn members(&self) -> &BTreeSet<Uuid> {
        &self.members
    }

    pub fn has_player(&self, player: &Uuid) -> bool {
        self.members.contains(player)
    }

    /// Plain set membership against the permitted actions.
    pub fn can(&self, action: GuildAction) -> bool {
        self.permitted.contains(&action)
    }

    /// Add a member. Does not look at the guild's other ranks.
    pub fn add_member(&mut self, member: Uuid) -> bool {
        self.members.insert(member)
    }

    pub fn remove_member(&mut self, member: &Uuid) -> bool {
        self.members.remove(member)
    }

    pub fn permit(&mut self, action: GuildAction) {
        self.permitted.insert(action);
    }

    pub fn revoke(&mut self, action: GuildAction) {
        self.permitted.remove(&action);
    }

    pub fn encode(&self) -> String {
        let actions: Vec<&str> = self.permitted.iter().map(|a| a.token()).collect();
        let members: Vec<String> = self.members.iter().map(Uuid::to_string).collect();
        format!(
            "{}{FIELD_SEP}{}{FIELD_SEP}{}",
            self.name,
            actions.join("#"),
            members.join("#")
        )
    }

    pub fn decode(text: &str) -> Result<Self, RankCodecError> {
        let fields: Vec<&str> = text.split(FIELD_SEP).collect();
        let [name, actions, members] = fields.as_slice() else {
            return Err(RankCodecError::FieldCount(fields.len()));
        };
        validate_rank_name(name).map_err(|_| RankCodecError::InvalidName(name.to_string()))?;

        let mut permitted = BTreeSet::new();
        for item in split_items(actions) {
            let action = match item.parse::<u8>() {
                Ok(tag) => GuildAction::from_legacy_tag(tag),
                Err(_) => GuildAction::from_token(item),
            }
            .ok_or_else(|| RankCodecError::UnknownAction(item.to_string()))?;
            permitted.insert(action);
        }

        let mut member_set = BTreeSet::new();
        for item in split_items(members) {
            let id = Uuid::parse_str(item)
                .map_err(|_| RankCodecError::InvalidMember(item.to_string()))?;
            member_set.insert(id);
        }

        Ok(Self {
            name: name.to_string(),
            permitted,
            members: member_set,
        })
    }
}

fn split_items(field: &str) -> impl Iterator<Item = &str> {
    field.split(ITEM_SEP).map(str::trim).filter(|s| !s.is_empty())
}

impl fmt::Display for GuildRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actions: Vec<&str> = self.permitted.iter().map(|a| a.token()).collect();
        if actions.is_empty() {
            write!(f, "{} (no permissions)", self.name)
        } else {
            write!(f, "{} ({})", self.name, actions.join(", "))
        }
    }
}
