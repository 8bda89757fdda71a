//! Guild-scoped chat channels. The registry keeps exactly one channel per
//! guild, registering and unregistering it together with the guild itself.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Messages kept per channel before the oldest is dropped.
pub const CHANNEL_HISTORY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub sender: Uuid,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GuildChannel {
    guild_id: Uuid,
    name: String,
    history: VecDeque<ChannelMessage>,
}

impl GuildChannel {
    pub fn new(guild_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            guild_id,
            name: name.into(),
            history: VecDeque::new(),
        }
    }

    pub fn guild_id(&self) -> Uuid {
        self.guild_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post(&mut self, sender: Uuid, text: impl Into<String>) -> &ChannelMessage {
        if self.history.len() == CHANNEL_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(ChannelMessage {
            sender,
            text: text.into(),
            sent_at: Utc::now(),
        });
        &self.history[self.history.len() - 1]
    }

    /// Up to `limit` most recent messages, oldest first.
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &ChannelMessage> {
        self.history.iter().skip(self.history.len().saturating_sub(limit))
    }
}

/// Every registered guild channel, keyed by guild id.
#[derive(Debug, Default)]
pub struct ChannelBatch {
    channels: HashMap<Uuid, GuildChannel>,
}

impl ChannelBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel for the guild. Returns `false` if one already existed.
    pub fn register(&mut self, guild_id: Uuid, name: &str) -> bool {
        if self.channels.contains_key(&guild_id) {
            return false;
        }
        self.channels
            .insert(guild_id, GuildChannel::new(guild_id, name));
        true
    }

    pub fn unregister(&mut self, guild_id: &Uuid) -> Option<GuildChannel> {
        self.channels.remove(guild_id)
    }

    pub fn get(&self, guild_id: &Uuid) -> Option<&GuildChannel> {
        self.channels.get(guild_id)
    }

    pub fn get_mut(&mut self, guild_id: &Uuid) -> Option<&mut GuildChannel> {
        self.channels.get_mut(guild_id)
    }

    pub fn is_registered(&self, guild_id: &Uuid) -> bool {
        self.channels.contains_key(guild_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_once_per_guild() {
        let mut batch = ChannelBatch::new();
        let id = Uuid::new_v4();
        assert!(batch.register(id, "Alpha"));
        assert!(!batch.register(id, "Alpha"));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.unregister(&id).map(|c| c.name().to_string()), Some("Alpha".into()));
        assert!(batch.is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let mut channel = GuildChannel::new(Uuid::new_v4(), "Alpha");
        let sender = Uuid::new_v4();
        for i in 0..(CHANNEL_HISTORY + 5) {
            channel.post(sender, format!("msg {i}"));
        }
        let recent: Vec<&str> = channel.recent(2).map(|m| m.text.as_str()).collect();
        assert_eq!(recent, vec!["msg 53", "msg 54"]);
        assert_eq!(channel.recent(usize::MAX).count(), CHANNEL_HISTORY);
    }
}
