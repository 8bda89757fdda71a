//! Guild entity, locations and regions, plus the conversion to and from stored
//! guild rows.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::action::GuildAction;
use super::errors::GuildError;
use super::rank::{GuildRank, RankCodecError};
use crate::storage::rows::GuildRow;

pub const LEADER_RANK: &str = "Leader";
pub const DEFAULT_RANK: &str = "Default";
pub const MAX_GUILD_NAME_LEN: usize = 32;

const MEMBER_SEP: &str = "#";
const RANK_SEP: &str = ",";
const COORD_SEP: char = ',';

/// Errors converting a stored guild row back into a [`Guild`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelCodecError {
    #[error("invalid member id {0:?}")]
    InvalidMember(String),

    #[error("invalid location {0:?}")]
    InvalidLocation(String),

    #[error("invalid region {0:?}")]
    InvalidRegion(String),

    #[error("rank: {0}")]
    Rank(#[from] RankCodecError),
}

/// A point in a named world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Check the world name and coordinates so the location survives its
    /// stored text encoding.
    pub fn validate(&self) -> Result<(), GuildError> {
        let finite = self.x.is_finite() && self.y.is_finite() && self.z.is_finite();
        if !finite || !valid_world_name(&self.world) {
            return Err(GuildError::InvalidLocation(self.to_string()));
        }
        Ok(())
    }

    pub fn block(&self) -> (i64, i64, i64) {
        (
            self.x.floor() as i64,
            self.y.floor() as i64,
            self.z.floor() as i64,
        )
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.world, self.x, self.y, self.z)
    }
}

impl FromStr for Location {
    type Err = ModelCodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelCodecError::InvalidLocation(s.to_string());
        let parts: Vec<&str> = s.split(COORD_SEP).map(str::trim).collect();
        let [world, x, y, z] = parts.as_slice() else {
            return Err(invalid());
        };
        if world.is_empty() {
            return Err(invalid());
        }
        let coord = |v: &str| v.parse::<f64>().ok().filter(|n| n.is_finite());
        match (coord(*x), coord(*y), coord(*z)) {
            (Some(x), Some(y), Some(z)) => Ok(Location::new(*world, x, y, z)),
            _ => Err(invalid()),
        }
    }
}

/// An axis-aligned block region, inclusive on both corners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub world: String,
    pub min: (i64, i64, i64),
    pub max: (i64, i64, i64),
}

impl Region {
    /// Build a region from two arbitrary corners.
    pub fn new(world: impl Into<String>, a: (i64, i64, i64), b: (i64, i64, i64)) -> Self {
        Self {
            world: world.into(),
            min: (a.0.min(b.0), a.1.min(b.1), a.2.min(b.2)),
            max: (a.0.max(b.0), a.1.max(b.1), a.2.max(b.2)),
        }
    }

    pub fn validate(&self) -> Result<(), GuildError> {
        if !valid_world_name(&self.world) {
            return Err(GuildError::InvalidLocation(self.to_string()));
        }
        Ok(())
    }

    pub fn contains(&self, location: &Location) -> bool {
        if location.world != self.world {
            return false;
        }
        let (x, y, z) = location.block();
        (self.min.0..=self.max.0).contains(&x)
            && (self.min.1..=self.max.1).contains(&y)
            && (self.min.2..=self.max.2).contains(&z)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{}",
            self.world, self.min.0, self.min.1, self.min.2, self.max.0, self.max.1, self.max.2
        )
    }
}

impl FromStr for Region {
    type Err = ModelCodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelCodecError::InvalidRegion(s.to_string());
        let parts: Vec<&str> = s.split(COORD_SEP).map(str::trim).collect();
        let Some((world, coords)) = parts.split_first() else {
            return Err(invalid());
        };
        if world.is_empty() || coords.len() != 6 {
            return Err(invalid());
        }
        let nums = coords
            .iter()
            .map(|c| c.parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        Ok(Region::new(
            *world,
            (nums[0], nums[1], nums[2]),
            (nums[3], nums[4], nums[5]),
        ))
    }
}

/// World names share the coordinate separator's column, so they may not
/// contain it, control characters, or surrounding whitespace.
fn valid_world_name(world: &str) -> bool {
    !world.is_empty()
        && world.trim().len() == world.len()
        && !world.contains(COORD_SEP)
        && !world.chars().any(char::is_control)
}

/// Check a guild name for the live creation path.
pub fn validate_guild_name(name: &str) -> Result<(), GuildError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.len() != name.len()
        || name.chars().count() > MAX_GUILD_NAME_LEN
        || name.chars().any(char::is_control)
    {
        return Err(GuildError::InvalidGuildName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Guild {
    id: Uuid,
    name: String,
    leader: Uuid,
    members: BTreeSet<Uuid>,
    ranks: Vec<GuildRank>,
    home: Option<Location>,
    hall: Option<Region>,
    influence: i64,
}

impl Guild {
    /// Create a fresh guild led by `leader`, with the built-in `Leader` rank
    /// (every action) and an empty `Default` rank.
    pub fn new(name: impl Into<String>, leader: Uuid) -> Result<Self, GuildError> {
        let name = name.into();
        validate_guild_name(&name)?;
        let leader_rank = GuildRank::new(LEADER_RANK, GuildAction::ALL)?.with_members([leader]);
        let default_rank = GuildRank::new(DEFAULT_RANK, [])?;
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            leader,
            members: BTreeSet::from([leader]),
            ranks: vec![leader_rank, default_rank],
            home: None,
            hall: None,
            influence: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn leader(&self) -> Uuid {
        self.leader
    }

    pub fn members(&self) -> &BTreeSet<Uuid> {
        &self.members
    }

    pub fn ranks(&self) -> &[GuildRank] {
        &self.ranks
    }

    pub fn home(&self) -> Option<&Location> {
        self.home.as_ref()
    }

    pub fn hall(&self) -> Option<&Region> {
        self.hall.as_ref()
    }

    pub fn influence(&self) -> i64 {
        self.influence
    }

    pub fn is_member(&self, player: &Uuid) -> bool {
        self.members.contains(player)
    }

    pub fn is_leader(&self, player: &Uuid) -> bool {
        self.leader == *player
    }

    /// The first rank, in rank order, whose member set contains `player`.
    pub fn rank_of(&self, player: &Uuid) -> Option<&GuildRank> {
        self.ranks.iter().find(|rank| rank.has_player(player))
    }

    /// Whether `player` may perform `action` in this guild. Players outside
    /// every rank are denied.
    pub fn can(&self, player: &Uuid, action: GuildAction) -> bool {
        self.rank_of(player).is_some_and(|rank| rank.can(action))
    }

    pub fn rank(&self, name: &str) -> Option<&GuildRank> {
        self.ranks
            .iter()
            .find(|rank| rank.name().eq_ignore_ascii_case(name))
    }

    /// Direct mutable access to a rank. Membership changes made through this
    /// handle are not checked against the guild's other ranks.
    pub fn rank_mut(&mut self, name: &str) -> Option<&mut GuildRank> {
        self.ranks
            .iter_mut()
            .find(|rank| rank.name().eq_ignore_ascii_case(name))
    }

    /// Add a member and file them under the default rank when the guild has one.
    pub fn add_member(&mut self, player: Uuid) -> bool {
        if !self.members.insert(player) {
            return false;
        }
        if let Some(rank) = self.rank_mut(DEFAULT_RANK) {
            rank.add_member(player);
        }
        true
    }

    /// Remove a member from the guild and from every rank.
    pub fn remove_member(&mut self, player: &Uuid) -> bool {
        let removed = self.members.remove(player);
        for rank in &mut self.ranks {
            rank.remove_member(player);
        }
        removed
    }

    pub fn add_rank(&mut self, rank: GuildRank) -> Result<(), GuildError> {
        if self.rank(rank.name()).is_some() {
            return Err(GuildError::RankExists(rank.name().to_string()));
        }
        self.ranks.push(rank);
        Ok(())
    }

    /// Remove a custom rank. Its members fall back to the default rank.
    pub fn remove_rank(&mut self, name: &str) -> Result<GuildRank, GuildError> {
        if name.eq_ignore_ascii_case(LEADER_RANK) || name.eq_ignore_ascii_case(DEFAULT_RANK) {
            return Err(GuildError::ProtectedRank(name.to_string()));
        }
        let index = self
            .ranks
            .iter()
            .position(|rank| rank.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| GuildError::UnknownRank(name.to_string()))?;
        let removed = self.ranks.remove(index);
        for member in removed.members() {
            if self.rank_of(member).is_none() {
                if let Some(default) = self.rank_mut(DEFAULT_RANK) {
                    default.add_member(*member);
                }
            }
        }
        Ok(removed)
    }

    /// Move a member into exactly one rank.
    pub fn assign_rank(&mut self, player: Uuid, name: &str) -> Result<(), GuildError> {
        if !self.is_member(&player) {
            return Err(GuildError::NotMember(player));
        }
        if self.rank(name).is_none() {
            return Err(GuildError::UnknownRank(name.to_string()));
        }
        for rank in &mut self.ranks {
            if rank.name().eq_ignore_ascii_case(name) {
                rank.add_member(player);
            } else {
                rank.remove_member(&player);
            }
        }
        Ok(())
    }

    pub fn set_home(&mut self, home: Option<Location>) -> Result<(), GuildError> {
        if let Some(home) = &home {
            home.validate()?;
        }
        self.home = home;
        Ok(())
    }

    pub fn set_hall(&mut self, hall: Option<Region>) -> Result<(), GuildError> {
        if let Some(hall) = &hall {
            hall.validate()?;
        }
        self.hall = hall;
        Ok(())
    }

    pub fn adjust_influence(&mut self, delta: i64) -> i64 {
        self.influence = self.influence.saturating_add(delta);
        self.influence
    }

    /// Snapshot of this guild as a storage row.
    pub fn to_row(&self) -> GuildRow {
        let members: Vec<String> = self.members.iter().map(Uuid::to_string).collect();
        let ranks: Vec<String> = self.ranks.iter().map(GuildRank::encode).collect();
        GuildRow {
            id: self.id,
            name: self.name.clone(),
            leader: self.leader,
            members: members.join(MEMBER_SEP),
            ranks: ranks.join(RANK_SEP),
            home: self.home.as_ref().map(Location::to_string),
            hall: self.hall.as_ref().map(Region::to_string),
            influence: self.influence,
        }
    }

    /// Rebuild a guild from its stored row. Stored names are trusted and not
    /// re-validated.
    pub fn from_row(row: GuildRow) -> Result<Self, ModelCodecError> {
        let members = row
            .members
            .split(MEMBER_SEP)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Uuid::parse_str(s).map_err(|_| ModelCodecError::InvalidMember(s.to_string())))
            .collect::<Result<BTreeSet<_>, _>>()?;
        let ranks = row
            .ranks
            .split(RANK_SEP)
            .filter(|s| !s.trim().is_empty())
            .map(GuildRank::decode)
            .collect::<Result<Vec<_>, _>>()?;
        let home: Option<Location> = row.home.as_deref().map(str::parse).transpose()?;
        let hall: Option<Region> = row.hall.as_deref().map(str::parse).transpose()?;
        Ok(Self {
            id: row.id,
            name: row.name,
            leader: row.leader,
            members,
            ranks,
            home,
            hall,
            influence: row.influence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guild_with_officer() -> (Guild, Uuid, Uuid) {
        let leader = Uuid::new_v4();
        let officer = Uuid::new_v4();
        let mut guild = Guild::new("Alpha", leader).unwrap();
        guild.add_member(officer);
        guild
            .add_rank(GuildRank::new("Officer", [GuildAction::Invite]).unwrap())
            .unwrap();
        guild.assign_rank(officer, "officer").unwrap();
        (guild, leader, officer)
    }

    #[test]
    fn new_guild_has_leader_and_default_ranks() {
        let leader = Uuid::new_v4();
        let guild = Guild::new("Alpha", leader).unwrap();
        assert_eq!(guild.ranks().len(), 2);
        assert_eq!(guild.rank_of(&leader).map(GuildRank::name), Some(LEADER_RANK));
        for action in GuildAction::ALL {
            assert!(guild.can(&leader, action));
        }
    }

    #[test]
    fn outsiders_are_denied_everything() {
        let (guild, _, _) = guild_with_officer();
        let stranger = Uuid::new_v4();
        for action in GuildAction::ALL {
            assert!(!guild.can(&stranger, action));
        }
    }

    #[test]
    fn can_follows_the_members_rank() {
        let (guild, _, officer) = guild_with_officer();
        let rank = guild.rank_of(&officer).unwrap();
        for action in GuildAction::ALL {
            assert_eq!(guild.can(&officer, action), rank.permitted().contains(&action));
        }
    }

    #[test]
    fn member_without_any_rank_is_denied() {
        let (mut guild, _, officer) = guild_with_officer();
        guild.rank_mut("Officer").unwrap().remove_member(&officer);
        assert!(guild.is_member(&officer));
        assert!(!guild.can(&officer, GuildAction::Invite));
    }

    #[test]
    fn rank_membership_overlap_is_not_enforced() {
        // Direct rank edits may put a player in two ranks; the first rank wins.
        let (mut guild, _, officer) = guild_with_officer();
        guild.rank_mut(LEADER_RANK).unwrap().add_member(officer);
        let holding: Vec<&str> = guild
            .ranks()
            .iter()
            .filter(|r| r.has_player(&officer))
            .map(GuildRank::name)
            .collect();
        assert_eq!(holding, vec![LEADER_RANK, "Officer"]);
        assert!(guild.can(&officer, GuildAction::KickMember));
    }

    #[test]
    fn assign_rank_is_exclusive() {
        let (mut guild, _, officer) = guild_with_officer();
        guild.rank_mut(DEFAULT_RANK).unwrap().add_member(officer);
        guild.assign_rank(officer, "Officer").unwrap();
        let count = guild.ranks().iter().filter(|r| r.has_player(&officer)).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn removing_a_rank_moves_members_to_default() {
        let (mut guild, _, officer) = guild_with_officer();
        guild.remove_rank("Officer").unwrap();
        assert_eq!(guild.rank_of(&officer).map(GuildRank::name), Some(DEFAULT_RANK));
        assert_eq!(
            guild.remove_rank(LEADER_RANK),
            Err(GuildError::ProtectedRank(LEADER_RANK.to_string()))
        );
    }

    #[test]
    fn row_conversion_keeps_every_field() {
        let (mut guild, _, _) = guild_with_officer();
        guild.set_home(Some(Location::new("world", 10.5, 64.0, -3.25))).unwrap();
        guild.set_hall(Some(Region::new("world", (20, 60, 20), (0, 70, 0)))).unwrap();
        guild.adjust_influence(12);
        let restored = Guild::from_row(guild.to_row()).expect("restore");
        assert_eq!(restored, guild);
    }

    #[test]
    fn unencodable_homes_and_halls_are_rejected() {
        let (mut guild, _, _) = guild_with_officer();
        for home in [
            Location::new("a,b", 1.0, 2.0, 3.0),
            Location::new("world", f64::NAN, 64.0, 0.0),
            Location::new("world", 0.0, f64::INFINITY, 0.0),
            Location::new(" world", 0.0, 0.0, 0.0),
            Location::new("", 0.0, 0.0, 0.0),
        ] {
            assert!(
                matches!(guild.set_home(Some(home.clone())), Err(GuildError::InvalidLocation(_))),
                "{home} should be rejected"
            );
        }
        assert!(guild.set_hall(Some(Region::new("a,b", (0, 0, 0), (1, 1, 1)))).is_err());
        assert_eq!(guild.home(), None);
        assert_eq!(guild.hall(), None);

        guild.set_home(Some(Location::new("world", -0.5, 64.0, 1e6))).unwrap();
        let restored = Guild::from_row(guild.to_row()).unwrap();
        assert_eq!(restored.home(), guild.home());
    }

    #[test]
    fn region_contains_is_inclusive_and_world_scoped() {
        let hall = Region::new("world", (0, 0, 0), (10, 10, 10));
        assert!(hall.contains(&Location::new("world", 10.9, 0.0, 5.0)));
        assert!(!hall.contains(&Location::new("world", 11.0, 0.0, 5.0)));
        assert!(!hall.contains(&Location::new("nether", 1.0, 1.0, 1.0)));
    }

    #[test]
    fn guild_names_are_validated() {
        let leader = Uuid::new_v4();
        assert!(Guild::new("", leader).is_err());
        assert!(Guild::new(" Alpha", leader).is_err());
        assert!(Guild::new("a".repeat(33), leader).is_err());
        assert!(Guild::new("Knights of Ni", leader).is_ok());
    }
}
