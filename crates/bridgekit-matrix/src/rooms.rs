//! Room creation, permissions and room state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use bridgekit_shared::constants::{
    BOT_POWER_LEVEL, MEGOLM_ALGORITHM, ROOM_TYPE_SPACE, SPACE_OWNER_POWER_LEVEL,
};
use bridgekit_shared::types::{ActingHandle, ContentUri, EventId, RoomId};
use bridgekit_shared::PowerLevels;
use bridgekit_store::{Ghost, LogicalUser, Room};

use crate::error::{BridgeError, Result};
use crate::ghost::GhostRegistry;
use crate::resolver::IdentityResolver;
use crate::transport::{CreateRoomRequest, CreatedRoom, StateEvent, Transport};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Custom megolm session rotation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rotation {
    pub period_ms: u64,
    pub period_msgs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionSettings {
    /// Encryption may be used at all.
    pub allow: bool,
    /// New portal rooms are created encrypted.
    pub default: bool,
    pub rotation: Option<Rotation>,
}

impl EncryptionSettings {
    fn state_event(&self) -> StateEvent {
        StateEvent::Encryption {
            algorithm: MEGOLM_ALGORITHM.to_string(),
            rotation_period_ms: self.rotation.map(|r| r.period_ms),
            rotation_period_msgs: self.rotation.map(|r| r.period_msgs),
        }
    }
}

// ---------------------------------------------------------------------------
// RoomController
// ---------------------------------------------------------------------------

pub struct RoomController {
    transport: Arc<dyn Transport>,
    resolver: Arc<IdentityResolver>,
    registry: Arc<GhostRegistry>,
    encryption: EncryptionSettings,
    bot_avatar: ContentUri,
}

impl RoomController {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<IdentityResolver>,
        registry: Arc<GhostRegistry>,
        encryption: EncryptionSettings,
        bot_avatar: ContentUri,
    ) -> Self {
        Self {
            transport,
            resolver,
            registry,
            encryption,
            bot_avatar,
        }
    }

    pub fn new_room(&self, name: impl Into<String>, topic: impl Into<String>, ghosts: Vec<Ghost>) -> Room {
        let mut room = Room::new(name, topic, ghosts);
        room.encrypted = self.encryption.allow && self.encryption.default;
        room.bot = Some(self.resolver.as_bot());
        room
    }

    /// Bind the bot handle to a room restored from storage.
    pub fn load_room(&self, room: &mut Room) {
        if room.bot.is_none() {
            room.bot = Some(self.resolver.as_bot());
        }
    }

    /// Create `room` on the chat network with `owner` as its local member.
    ///
    /// Inviting the owner and refreshing ghost names afterwards are best
    /// effort; only the creation call itself can fail the operation.
    pub async fn create_room(
        &self,
        room: &mut Room,
        owner: &LogicalUser,
        avatar: &ContentUri,
    ) -> Result<CreatedRoom> {
        let bot = self.transport.bot_user_id().clone();

        let mut invite = vec![bot.clone(), owner.user_id().clone()];
        invite.extend(room.ghost_user_ids());

        let power_levels = PowerLevels::bridged(&bot, room.ghosts.iter().map(|g| &g.user_id));
        let mut initial_state = vec![StateEvent::PowerLevels(power_levels.clone())];

        if self.encryption.default {
            debug!(room = %room.name, "Creating room encrypted");
            initial_state.push(self.encryption.state_event());
            room.encrypted = true;
        }

        if !avatar.is_empty() {
            initial_state.push(StateEvent::RoomAvatar { url: avatar.clone() });
        }

        // The owner's own ghost does not count towards a direct chat.
        let owner_ghost = self.resolver.user_ghost(owner).await.map(|g| g.user_id);
        let others = room
            .ghosts
            .iter()
            .filter(|g| g.user_id != *owner.user_id() && Some(&g.user_id) != owner_ghost.as_ref())
            .count();

        let request = CreateRoomRequest {
            name: room.name.clone(),
            topic: room.topic.clone(),
            invite,
            is_direct: others == 1,
            power_levels,
            initial_state,
            room_type: None,
            auto_join_invites: true,
        };

        let created = self
            .transport
            .create_room(request)
            .await
            .map_err(|source| BridgeError::CreateFailed {
                room: room.name.clone(),
                source,
            })?;

        info!(room = %created.room_id, name = %room.name, "Room created");
        room.room_id = Some(created.room_id.clone());
        self.load_room(room);

        if let Err(e) = self.add_user_to_room(&created.room_id, owner).await {
            warn!(room = %created.room_id, user = %owner.user_id(), error = %e, "Could not add owner to room");
        }

        for ghost in room.ghosts.iter_mut() {
            let name = ghost.display_name.clone();
            if let Err(e) = self.registry.update_display_name(ghost, name).await {
                warn!(room = %created.room_id, error = %e, "Ghost rename failed");
            }
        }

        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Permissions
    // -----------------------------------------------------------------------

    /// Replace the room's power levels with the bridged profile.
    pub async fn reset_permissions(&self, room: &Room, mark_read_as: Option<&LogicalUser>) -> Result<EventId> {
        let levels = PowerLevels::bridged(
            self.transport.bot_user_id(),
            room.ghosts.iter().map(|g| &g.user_id),
        );
        self.replace_power_levels(room, &levels, mark_read_as).await
    }

    /// Replace the room's power levels so only the bridge side may post.
    pub async fn mark_read_only(&self, room: &Room, mark_read_as: Option<&LogicalUser>) -> Result<EventId> {
        let levels = PowerLevels::read_only(
            self.transport.bot_user_id(),
            room.ghosts.iter().map(|g| &g.user_id),
        );
        self.replace_power_levels(room, &levels, mark_read_as).await
    }

    async fn replace_power_levels(
        &self,
        room: &Room,
        levels: &PowerLevels,
        mark_read_as: Option<&LogicalUser>,
    ) -> Result<EventId> {
        let room_id = require_created(room)?;
        debug!(room = %room_id, events_default = levels.events_default, "Replacing power levels");

        let event_id = self
            .transport
            .set_power_levels(room_id, levels)
            .await
            .map_err(|source| BridgeError::PermissionsFailed {
                room: room_id.clone(),
                source,
            })?;

        if let Some(user) = mark_read_as {
            let handle = self.resolver.resolve_acting_handle(user).await;
            if let Err(e) = self.transport.mark_read(room_id, &event_id, &handle).await {
                warn!(room = %room_id, user = %handle.user_id, error = %e, "Could not mark power levels read");
            }
        }

        Ok(event_id)
    }

    // -----------------------------------------------------------------------
    // Spaces and membership
    // -----------------------------------------------------------------------

    pub async fn create_personal_space(
        &self,
        owner: &LogicalUser,
        name: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<CreatedRoom> {
        let name = name.into();
        let bot = self.transport.bot_user_id().clone();

        let mut power_levels = PowerLevels::base();
        power_levels.users.insert(bot, BOT_POWER_LEVEL);
        power_levels
            .users
            .insert(owner.user_id().clone(), SPACE_OWNER_POWER_LEVEL);

        let request = CreateRoomRequest {
            name: name.clone(),
            topic: topic.into(),
            invite: Vec::new(),
            is_direct: false,
            power_levels,
            initial_state: vec![StateEvent::RoomAvatar {
                url: self.bot_avatar.clone(),
            }],
            room_type: Some(ROOM_TYPE_SPACE.to_string()),
            auto_join_invites: true,
        };

        let created = self
            .transport
            .create_room(request)
            .await
            .map_err(|source| BridgeError::CreateFailed { room: name, source })?;
        info!(space = %created.room_id, user = %owner.user_id(), "Personal space created");

        if let Err(e) = self.add_user_to_room(&created.room_id, owner).await {
            warn!(space = %created.room_id, error = %e, "Could not add owner to space");
        }

        Ok(created)
    }

    pub async fn add_room_to_space(&self, space: &RoomId, room: &Room) -> Result<()> {
        let child = require_created(room)?.clone();
        let event = StateEvent::SpaceChild {
            child,
            via: vec![self.transport.domain().to_string()],
        };

        self.transport
            .send_state(space, &self.resolver.as_bot(), event, None)
            .await
            .map_err(|source| BridgeError::TransportUnavailable {
                action: "add room to space",
                source,
            })?;
        Ok(())
    }

    /// Invite `user`, then join their double puppet if they have one.
    pub async fn add_user_to_room(&self, room_id: &RoomId, user: &LogicalUser) -> Result<()> {
        self.transport
            .invite_user(room_id, user.user_id())
            .await
            .map_err(|source| BridgeError::TransportUnavailable {
                action: "invite user",
                source,
            })?;

        let puppet = match self.resolver.double_puppet(user.user_id()).await {
            Some(handle) => Some(handle),
            None => user.double_puppet().cloned(),
        };
        if let Some(handle) = puppet {
            self.transport
                .ensure_joined(room_id, &handle)
                .await
                .map_err(|source| BridgeError::TransportUnavailable {
                    action: "join double puppet",
                    source,
                })?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Room state
    // -----------------------------------------------------------------------

    pub async fn set_room_name(&self, room: &mut Room, handle: &ActingHandle, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        let room_id = require_created(room)?;
        self.transport
            .send_state(room_id, handle, StateEvent::RoomName { name: name.clone() }, None)
            .await
            .map_err(|source| BridgeError::TransportUnavailable {
                action: "set room name",
                source,
            })?;
        room.name = name;
        Ok(())
    }

    pub async fn set_room_avatar(&self, room: &Room, handle: &ActingHandle, url: &ContentUri) -> Result<()> {
        self.send_room_avatar(room, handle, url, None).await
    }

    /// Set the room avatar with an origin timestamp, so it lands among
    /// backfilled history instead of after it.
    pub async fn set_room_avatar_at(
        &self,
        room: &Room,
        handle: &ActingHandle,
        url: &ContentUri,
        timestamp: i64,
    ) -> Result<()> {
        self.send_room_avatar(room, handle, url, Some(timestamp)).await
    }

    async fn send_room_avatar(
        &self,
        room: &Room,
        handle: &ActingHandle,
        url: &ContentUri,
        timestamp: Option<i64>,
    ) -> Result<()> {
        let room_id = require_created(room)?;
        self.transport
            .send_state(room_id, handle, StateEvent::RoomAvatar { url: url.clone() }, timestamp)
            .await
            .map_err(|source| BridgeError::TransportUnavailable {
                action: "set room avatar",
                source,
            })?;
        Ok(())
    }

    /// Download an image, upload it and make it the room avatar.
    pub async fn upload_room_avatar(&self, room: &Room, handle: &ActingHandle, url: &str) -> Result<ContentUri> {
        let uri = self.registry.fetch_and_upload(url).await?;
        self.set_room_avatar(room, handle, &uri).await?;
        Ok(uri)
    }

    pub async fn encrypt_room(&self, room: &mut Room) -> Result<()> {
        let room_id = require_created(room)?;
        self.transport
            .send_state(room_id, &self.resolver.as_bot(), self.encryption.state_event(), None)
            .await
            .map_err(|source| BridgeError::TransportUnavailable {
                action: "enable encryption",
                source,
            })?;
        info!(room = %room_id, "Room encrypted");
        room.encrypted = true;
        Ok(())
    }
}

pub(crate) fn require_created(room: &Room) -> Result<&RoomId> {
    room.room_id
        .as_ref()
        .ok_or_else(|| BridgeError::RoomNotCreated(room.name.clone()))
}
