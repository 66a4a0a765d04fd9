//! Room power-level maps.
//!
//! A [`PowerLevels`] value is always written to a room as a whole. The
//! constructors below build the three profiles the bridge uses: the base
//! profile, the normal bridged-room profile, and the read-only profile.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PowerLevels {
    pub users: BTreeMap<UserId, i64>,
    pub users_default: i64,
    pub events_default: i64,
    pub state_default: i64,
    pub ban: i64,
    pub kick: i64,
    pub invite: i64,
    pub redact: i64,
    pub events: BTreeMap<String, i64>,
}

impl PowerLevels {
    /// Anyone may chat, react, redact and rename; moderation and other
    /// state changes need level 99.
    pub fn base() -> Self {
        let events = [
            STATE_ROOM_NAME,
            STATE_ROOM_AVATAR,
            EVENT_REACTION,
            EVENT_REDACTION,
            EVENT_MESSAGE,
        ]
        .into_iter()
        .map(|ty| (ty.to_string(), LEVEL_ANYONE))
        .collect();

        Self {
            users: BTreeMap::new(),
            users_default: LEVEL_ANYONE,
            events_default: LEVEL_ANYONE,
            state_default: LEVEL_DISABLED,
            ban: LEVEL_DISABLED,
            kick: LEVEL_DISABLED,
            invite: LEVEL_DISABLED,
            redact: LEVEL_ANYONE,
            events,
        }
    }

    /// Bot at super-admin, every ghost at the normal elevated level.
    pub fn bridged<'a>(bot: &UserId, ghosts: impl IntoIterator<Item = &'a UserId>) -> Self {
        let mut levels = Self::base();
        levels.users.insert(bot.clone(), BOT_POWER_LEVEL);
        for ghost in ghosts {
            levels.users.insert(ghost.clone(), GHOST_POWER_LEVEL);
        }
        levels
    }

    /// Ghosts above the send threshold and the threshold above every normal
    /// user, so only the bridge side can still post.
    pub fn read_only<'a>(bot: &UserId, ghosts: impl IntoIterator<Item = &'a UserId>) -> Self {
        let mut levels = Self::base();
        levels.users.insert(bot.clone(), BOT_POWER_LEVEL);
        for ghost in ghosts {
            levels.users.insert(ghost.clone(), READ_ONLY_GHOST_POWER_LEVEL);
        }
        levels.events_default = READ_ONLY_SEND_THRESHOLD;
        levels
            .events
            .insert(EVENT_REACTION.to_string(), READ_ONLY_SEND_THRESHOLD);
        levels
            .events
            .insert(EVENT_MESSAGE.to_string(), READ_ONLY_SEND_THRESHOLD);
        levels
    }

    pub fn user_level(&self, user: &UserId) -> i64 {
        self.users.get(user).copied().unwrap_or(self.users_default)
    }

    /// Level needed to send an event of the given type.
    pub fn required_for(&self, event_type: &str) -> i64 {
        self.events
            .get(event_type)
            .copied()
            .unwrap_or(self.events_default)
    }

    pub fn can_send(&self, user: &UserId, event_type: &str) -> bool {
        self.user_level(user) >= self.required_for(event_type)
    }
}
