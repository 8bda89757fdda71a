//! # Guild Registry
//!
//! Owns the in-memory guild set. All mutation happens synchronously through
//! `&mut self`; every accepted change enqueues a write on the
//! [`StorageManager`] without waiting for it.
//!
//! ## Lifecycle
//!
//! ```text
//! Constructing ─► WaitingForBackend ─► Loading ─► Loaded
//!   (new)          (begin_load, gate     (gate open,   (rows ingested by
//!                   still closed)         bulk read)     poll_load / wait_loaded)
//! ```
//!
//! The bulk read runs on the storage runtime and hands its rows back through a
//! oneshot channel, so the owner of the registry never blocks: it calls
//! [`GuildRegistry::poll_load`] from its own loop, or awaits
//! [`GuildRegistry::wait_loaded`] when it has nothing else to do. Until the
//! load lands every lookup reports "not found".

use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use uuid::Uuid;

use super::action::GuildAction;
use super::channel::{ChannelBatch, GuildChannel};
use super::errors::GuildError;
use super::model::{Guild, Location, Region};
use super::rank::GuildRank;
use crate::config::GuildConfig;
use crate::storage::{GuildRow, StorageManager};

const LOAD_RETRY_INITIAL: Duration = Duration::from_millis(500);
const LOAD_RETRY_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Constructing,
    WaitingForBackend,
    Loading,
    Loaded,
}

/// Observer of registry events. `on_create` and `on_rank_create` may veto by
/// returning the message to show the acting player.
pub trait GuildListener: Send {
    fn on_create(&mut self, _guild: &Guild) -> Result<(), String> {
        Ok(())
    }

    fn on_disband(&mut self, _guild: &Guild) {}

    fn on_rank_create(&mut self, _guild: &Guild, _rank: &GuildRank) -> Result<(), String> {
        Ok(())
    }

    fn on_member_kicked(&mut self, _guild: &Guild, _actor: Uuid, _target: Uuid) {}
}

/// Economy costs and hall protection flags, fixed at construction and
/// adjustable by the host afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSettings {
    creation_cost: i64,
    invite_cost: i64,
    hall_cost: i64,
    protect_from_environment: bool,
    disallow_hall_pvp: bool,
}

impl From<&GuildConfig> for GuildSettings {
    fn from(cfg: &GuildConfig) -> Self {
        Self {
            creation_cost: cfg.creation_cost,
            invite_cost: cfg.invite_cost,
            hall_cost: cfg.hall_cost,
            protect_from_environment: cfg.protect_from_environment,
            disallow_hall_pvp: cfg.disallow_hall_pvp,
        }
    }
}

impl GuildSettings {
    pub fn creation_cost(&self) -> i64 {
        self.creation_cost
    }

    pub fn set_creation_cost(&mut self, cost: i64) {
        self.creation_cost = cost;
    }

    pub fn invite_cost(&self) -> i64 {
        self.invite_cost
    }

    pub fn set_invite_cost(&mut self, cost: i64) {
        self.invite_cost = cost;
    }

    pub fn hall_cost(&self) -> i64 {
        self.hall_cost
    }

    pub fn set_hall_cost(&mut self, cost: i64) {
        self.hall_cost = cost;
    }

    pub fn protect_from_environment(&self) -> bool {
        self.protect_from_environment
    }

    pub fn set_protect_from_environment(&mut self, protect: bool) {
        self.protect_from_environment = protect;
    }

    pub fn disallow_hall_pvp(&self) -> bool {
        self.disallow_hall_pvp
    }

    pub fn set_disallow_hall_pvp(&mut self, disallow: bool) {
        self.disallow_hall_pvp = disallow;
    }
}

enum LoadState {
    NotStarted,
    Pending(oneshot::Receiver<Vec<GuildRow>>),
    Done,
}

pub struct GuildRegistry {
    storage: StorageManager,
    settings: GuildSettings,
    guilds: Vec<Guild>,
    channels: ChannelBatch,
    listeners: Vec<Box<dyn GuildListener>>,
    load: LoadState,
}

impl GuildRegistry {
    /// An empty, unloaded registry. Call [`GuildRegistry::begin_load`] (or use
    /// [`GuildRegistry::start`]) to schedule the bulk load.
    pub fn new(storage: StorageManager, config: &GuildConfig) -> Self {
        Self {
            storage,
            settings: GuildSettings::from(config),
            guilds: Vec::new(),
            channels: ChannelBatch::new(),
            listeners: Vec::new(),
            load: LoadState::NotStarted,
        }
    }

    pub fn start(storage: StorageManager, config: &GuildConfig) -> Self {
        let mut registry = Self::new(storage, config);
        registry.begin_load();
        registry
    }

    /// Schedule the bulk load: wait for the readiness gate, then read every
    /// guild row, retrying failed reads with backoff. Does nothing if a load
    /// was already scheduled.
    pub fn begin_load(&mut self) {
        if !matches!(self.load, LoadState::NotStarted) {
            return;
        }
        let (mut tx, rx) = oneshot::channel();
        let storage = self.storage.clone();
        self.storage.runtime().spawn(async move {
            // Stop as soon as the registry is dropped, ready or not.
            tokio::select! {
                _ = storage.gate().wait_ready() => {}
                _ = tx.closed() => return,
            }
            let mut delay = LOAD_RETRY_INITIAL;
            loop {
                match storage.load_guilds().await {
                    Ok(rows) => {
                        let _ = tx.send(rows);
                        return;
                    }
                    Err(e) => {
                        warn!(
                            "guild load from {} failed: {e}; retrying in {delay:?}",
                            storage.store_type_name()
                        );
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = tx.closed() => return,
                }
                delay = (delay * 2).min(LOAD_RETRY_MAX);
            }
        });
        self.load = LoadState::Pending(rx);
    }

    /// Ingest the bulk load if it has arrived. Returns whether the registry is
    /// loaded. Never blocks.
    pub fn poll_load(&mut self) -> bool {
        let LoadState::Pending(rx) = &mut self.load else {
            return self.is_loaded();
        };
        match rx.try_recv() {
            Ok(rows) => {
                self.ingest(rows);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                error!("guild loader stopped before delivering any rows");
                self.load = LoadState::NotStarted;
                false
            }
        }
    }

    /// Await the bulk load and ingest it. Has no timeout: an unready backend
    /// keeps this pending.
    pub async fn wait_loaded(&mut self) {
        if matches!(self.load, LoadState::NotStarted) {
            self.begin_load();
        }
        let LoadState::Pending(rx) = &mut self.load else {
            return;
        };
        match rx.await {
            Ok(rows) => self.ingest(rows),
            Err(_) => {
                error!("guild loader stopped before delivering any rows");
                self.load = LoadState::NotStarted;
            }
        }
    }

    fn ingest(&mut self, rows: Vec<GuildRow>) {
        let total = rows.len();
        let mut skipped = 0;
        for row in rows {
            if self.guilds.iter().any(|g| g.id() == row.id) {
                continue;
            }
            let id = row.id;
            match Guild::from_row(row) {
                Ok(guild) => {
                    let _ = self.add_guild(guild, true);
                }
                Err(e) => {
                    skipped += 1;
                    warn!("skipping stored guild {id}: {e}");
                }
            }
        }
        self.load = LoadState::Done;
        info!(
            "loaded {} guild(s) from {} ({} unreadable)",
            total - skipped,
            self.storage.store_type_name(),
            skipped
        );
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.load, LoadState::Done)
    }

    pub fn state(&self) -> RegistryState {
        match self.load {
            LoadState::Done => RegistryState::Loaded,
            LoadState::NotStarted => RegistryState::Constructing,
            LoadState::Pending(_) if self.storage.is_ready() => RegistryState::Loading,
            LoadState::Pending(_) => RegistryState::WaitingForBackend,
        }
    }

    pub fn settings(&self) -> &GuildSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut GuildSettings {
        &mut self.settings
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn add_listener(&mut self, listener: Box<dyn GuildListener>) {
        self.listeners.push(listener);
    }

    /// Insert a guild. Stored guilds (`from_persistence`) go in unconditionally
    /// and silently. Live guilds must have a name no other guild uses
    /// (ignoring case) and survive every listener's `on_create`; they are then
    /// persisted in the background.
    pub fn add_guild(&mut self, guild: Guild, from_persistence: bool) -> Result<(), GuildError> {
        if !from_persistence {
            if self
                .guilds
                .iter()
                .any(|g| g.name().eq_ignore_ascii_case(guild.name()))
            {
                return Err(GuildError::NameTaken(guild.name().to_string()));
            }
            for listener in &mut self.listeners {
                listener.on_create(&guild).map_err(GuildError::Cancelled)?;
            }
            self.storage.persist_guild(guild.to_row());
            info!("guild '{}' created by {}", guild.name(), guild.leader());
        }
        self.channels.register(guild.id(), guild.name());
        self.guilds.push(guild);
        Ok(())
    }

    /// Create a guild led by `leader`, who must not already belong to one.
    pub fn create_guild(&mut self, name: &str, leader: Uuid) -> Result<Uuid, GuildError> {
        if self.guild_of(&leader).is_some() {
            return Err(GuildError::AlreadyInGuild(leader));
        }
        let guild = Guild::new(name, leader)?;
        let id = guild.id();
        self.add_guild(guild, false)?;
        Ok(id)
    }

    /// Disband a guild. Only allowed once loaded.
    pub fn remove_guild(&mut self, id: Uuid) -> Result<Guild, GuildError> {
        if !self.is_loaded() {
            return Err(GuildError::NotLoaded);
        }
        let index = self
            .guilds
            .iter()
            .position(|g| g.id() == id)
            .ok_or(GuildError::UnknownGuild(id))?;
        for listener in &mut self.listeners {
            listener.on_disband(&self.guilds[index]);
        }
        self.storage.delete_guild(id, self.guilds[index].name());
        self.channels.unregister(&id);
        let guild = self.guilds.remove(index);
        info!("guild '{}' disbanded", guild.name());
        Ok(guild)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&Guild> {
        if !self.is_loaded() {
            return None;
        }
        self.guilds
            .iter()
            .find(|g| g.name().eq_ignore_ascii_case(name))
    }

    pub fn lookup_by_id(&self, id: Uuid) -> Option<&Guild> {
        if !self.is_loaded() {
            return None;
        }
        self.guilds.iter().find(|g| g.id() == id)
    }

    pub fn lookup_by_member(&self, player: &Uuid) -> Option<&Guild> {
        if !self.is_loaded() {
            return None;
        }
        self.guild_of(player)
    }

    /// Independent copy of every guild, or `None` before the load.
    pub fn snapshot(&self) -> Option<Vec<Guild>> {
        self.is_loaded().then(|| self.guilds.clone())
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    pub fn channels(&self) -> &ChannelBatch {
        &self.channels
    }

    pub fn channel(&self, guild_id: &Uuid) -> Option<&GuildChannel> {
        self.channels.get(guild_id)
    }

    fn guild_of(&self, player: &Uuid) -> Option<&Guild> {
        self.guilds.iter().find(|g| g.is_member(player))
    }

    /// Mutable access to a guild of a loaded registry.
    fn loaded_guild_mut(&mut self, id: Uuid) -> Result<&mut Guild, GuildError> {
        if !self.is_loaded() {
            return Err(GuildError::NotLoaded);
        }
        self.guilds
            .iter_mut()
            .find(|g| g.id() == id)
            .ok_or(GuildError::UnknownGuild(id))
    }

    fn persist_update(&self, id: Uuid) {
        if let Some(guild) = self.guilds.iter().find(|g| g.id() == id) {
            self.storage.update_guild(guild.to_row());
        }
    }

    fn require_leader(guild: &Guild, actor: &Uuid) -> Result<(), GuildError> {
        if guild.is_leader(actor) {
            Ok(())
        } else {
            Err(GuildError::LeaderOnly)
        }
    }

    fn require(guild: &Guild, actor: &Uuid, action: GuildAction) -> Result<(), GuildError> {
        if !guild.is_member(actor) {
            return Err(GuildError::NotMember(*actor));
        }
        if guild.can(actor, action) {
            Ok(())
        } else {
            Err(GuildError::NotPermitted(action))
        }
    }

    pub fn join_guild(&mut self, guild_id: Uuid, player: Uuid) -> Result<(), GuildError> {
        if !self.is_loaded() {
            return Err(GuildError::NotLoaded);
        }
        if self.guild_of(&player).is_some() {
            return Err(GuildError::AlreadyInGuild(player));
        }
        self.loaded_guild_mut(guild_id)?.add_member(player);
        self.persist_update(guild_id);
        Ok(())
    }

    /// Remove `player` from their guild. Returns the guild they left.
    pub fn leave_guild(&mut self, player: Uuid) -> Result<Uuid, GuildError> {
        if !self.is_loaded() {
            return Err(GuildError::NotLoaded);
        }
        let guild = self
            .guilds
            .iter_mut()
            .find(|g| g.is_member(&player))
            .ok_or(GuildError::NotMember(player))?;
        if guild.is_leader(&player) {
            return Err(GuildError::LeaderProtected);
        }
        guild.remove_member(&player);
        let id = guild.id();
        self.persist_update(id);
        Ok(id)
    }

    pub fn kick_member(
        &mut self,
        guild_id: Uuid,
        actor: Uuid,
        target: Uuid,
    ) -> Result<(), GuildError> {
        let guild = self.loaded_guild_mut(guild_id)?;
        Self::require(guild, &actor, GuildAction::KickMember)?;
        if !guild.is_member(&target) {
            return Err(GuildError::NotMember(target));
        }
        if guild.is_leader(&target) {
            return Err(GuildError::LeaderProtected);
        }
        guild.remove_member(&target);
        let guild = &self.guilds[self.index_of(guild_id)?];
        for listener in &mut self.listeners {
            listener.on_member_kicked(guild, actor, target);
        }
        debug!("{actor} kicked {target} from '{}'", guild.name());
        self.persist_update(guild_id);
        Ok(())
    }

    fn index_of(&self, guild_id: Uuid) -> Result<usize, GuildError> {
        self.guilds
            .iter()
            .position(|g| g.id() == guild_id)
            .ok_or(GuildError::UnknownGuild(guild_id))
    }

    pub fn create_rank(
        &mut self,
        guild_id: Uuid,
        actor: Uuid,
        rank: GuildRank,
    ) -> Result<(), GuildError> {
        let guild = self.loaded_guild_mut(guild_id)?;
        Self::require_leader(guild, &actor)?;
        if guild.rank(rank.name()).is_some() {
            return Err(GuildError::RankExists(rank.name().to_string()));
        }
        let index = self.index_of(guild_id)?;
        for listener in &mut self.listeners {
            listener
                .on_rank_create(&self.guilds[index], &rank)
                .map_err(GuildError::Cancelled)?;
        }
        self.guilds[index].add_rank(rank)?;
        self.persist_update(guild_id);
        Ok(())
    }

    pub fn remove_rank(
        &mut self,
        guild_id: Uuid,
        actor: Uuid,
        name: &str,
    ) -> Result<GuildRank, GuildError> {
        let guild = self.loaded_guild_mut(guild_id)?;
        Self::require_leader(guild, &actor)?;
        let removed = guild.remove_rank(name)?;
        self.persist_update(guild_id);
        Ok(removed)
    }

    pub fn assign_rank(
        &mut self,
        guild_id: Uuid,
        actor: Uuid,
        target: Uuid,
        rank: &str,
    ) -> Result<(), GuildError> {
        let guild = self.loaded_guild_mut(guild_id)?;
        Self::require_leader(guild, &actor)?;
        if guild.is_leader(&target) {
            return Err(GuildError::LeaderProtected);
        }
        guild.assign_rank(target, rank)?;
        self.persist_update(guild_id);
        Ok(())
    }

    /// Move (or clear) the guild home. Rejects locations that cannot be stored.
    pub fn set_home(
        &mut self,
        guild_id: Uuid,
        actor: Uuid,
        home: Option<Location>,
    ) -> Result<(), GuildError> {
        let guild = self.loaded_guild_mut(guild_id)?;
        Self::require(guild, &actor, GuildAction::SetHome)?;
        guild.set_home(home)?;
        self.persist_update(guild_id);
        Ok(())
    }

    pub fn set_hall(
        &mut self,
        guild_id: Uuid,
        actor: Uuid,
        hall: Option<Region>,
    ) -> Result<(), GuildError> {
        let guild = self.loaded_guild_mut(guild_id)?;
        Self::require_leader(guild, &actor)?;
        guild.set_hall(hall)?;
        self.persist_update(guild_id);
        Ok(())
    }

    /// Returns the new influence total.
    pub fn adjust_influence(&mut self, guild_id: Uuid, delta: i64) -> Result<i64, GuildError> {
        let total = self.loaded_guild_mut(guild_id)?.adjust_influence(delta);
        self.persist_update(guild_id);
        Ok(total)
    }

    /// The guild whose hall contains `location`.
    pub fn hall_at(&self, location: &Location) -> Option<&Guild> {
        if !self.is_loaded() {
            return None;
        }
        self.guilds
            .iter()
            .find(|g| g.hall().is_some_and(|hall| hall.contains(location)))
    }

    /// Inside a hall only members whose rank grants `ModifyHall` may change
    /// blocks. Outside every hall anyone may.
    pub fn can_modify_block(&self, player: &Uuid, location: &Location) -> bool {
        match self.hall_at(location) {
            Some(guild) => guild.can(player, GuildAction::ModifyHall),
            None => true,
        }
    }

    pub fn is_pvp_allowed(&self, location: &Location) -> bool {
        !(self.settings.disallow_hall_pvp && self.hall_at(location).is_some())
    }

    pub fn is_protected_from_environment(&self, location: &Location) -> bool {
        self.settings.protect_from_environment && self.hall_at(location).is_some()
    }

    /// Post to the sender's guild channel.
    pub fn post_message(&mut self, sender: Uuid, text: &str) -> Result<Uuid, GuildError> {
        let guild_id = self
            .lookup_by_member(&sender)
            .map(Guild::id)
            .ok_or(GuildError::NotMember(sender))?;
        if let Some(channel) = self.channels.get_mut(&guild_id) {
            channel.post(sender, text);
        }
        Ok(guild_id)
    }
}
