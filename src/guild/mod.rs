//! # Guild Module - Authorization Model and Registry
//!
//! - [`GuildAction`] - the closed set of privileged guild actions
//! - [`GuildRank`] - a named member subset with its permitted actions
//! - [`Guild`] - members, ranks, home, hall and influence of one guild
//! - [`GuildRegistry`] - the loaded guild set, its lifecycle and listeners
//! - [`ChannelBatch`] - one chat channel per registered guild
//! - [`commands`] - text command parser and executor
//!
//! Authorization is first-match: a player's rank is the first rank (in guild
//! order) containing them, and [`Guild::can`] asks that rank alone.

pub mod action;
pub mod channel;
pub mod commands;
pub mod errors;
pub mod model;
pub mod rank;
pub mod registry;

pub use action::GuildAction;
pub use channel::{ChannelBatch, ChannelMessage, GuildChannel};
pub use commands::{execute, parse_command, GuildCommand};
pub use errors::GuildError;
pub use model::{Guild, Location, ModelCodecError, Region, DEFAULT_RANK, LEADER_RANK};
pub use rank::{GuildRank, RankCodecError};
pub use registry::{GuildListener, GuildRegistry, GuildSettings, RegistryState};
