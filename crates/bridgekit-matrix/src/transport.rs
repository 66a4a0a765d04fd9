//! Boundary to the chat-network client.
//!
//! Everything that crosses the network goes through [`Transport`]. The core
//! never talks to the homeserver any other way, which keeps the decision
//! logic testable against [`InMemoryTransport`](crate::memory::InMemoryTransport).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bridgekit_shared::constants::*;
use bridgekit_shared::types::{ActingHandle, ContentUri, EventId, RoomId, UserId};
use bridgekit_shared::{MessageContent, PowerLevels, TransportError};

pub type TransportResult<T> = Result<T, TransportError>;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// A state event the bridge writes into a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StateEvent {
    PowerLevels(PowerLevels),
    Encryption {
        algorithm: String,
        rotation_period_ms: Option<u64>,
        rotation_period_msgs: Option<u64>,
    },
    RoomAvatar {
        url: ContentUri,
    },
    RoomName {
        name: String,
    },
    SpaceChild {
        child: RoomId,
        via: Vec<String>,
    },
}

impl StateEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            StateEvent::PowerLevels(_) => STATE_POWER_LEVELS,
            StateEvent::Encryption { .. } => STATE_ENCRYPTION,
            StateEvent::RoomAvatar { .. } => STATE_ROOM_AVATAR,
            StateEvent::RoomName { .. } => STATE_ROOM_NAME,
            StateEvent::SpaceChild { .. } => STATE_SPACE_CHILD,
        }
    }

    pub fn state_key(&self) -> String {
        match self {
            StateEvent::SpaceChild { child, .. } => child.to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub topic: String,
    pub invite: Vec<UserId>,
    pub is_direct: bool,
    /// Power levels applied at creation, replacing the server defaults.
    pub power_levels: PowerLevels,
    pub initial_state: Vec<StateEvent>,
    /// Creation type, e.g. [`ROOM_TYPE_SPACE`].
    pub room_type: Option<String>,
    /// Invitees join without having to accept.
    pub auto_join_invites: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedRoom {
    pub room_id: RoomId,
}

/// One historical event inside a batch import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvent {
    pub sender: UserId,
    pub recipient: Option<UserId>,
    pub content: MessageContent,
    pub timestamp: i64,
    /// Marks an event sent through a double puppet so the sender's own
    /// clients do not treat it as a foreign message.
    pub double_puppeted: bool,
}

/// Bulk import of historical events, appended in the given order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSendRequest {
    /// Import after the existing history instead of before it.
    pub forward: bool,
    pub forward_if_no_messages: bool,
    pub send_notification: bool,
    /// Mark the imported events as read by this user.
    pub mark_read_by: Option<UserId>,
    pub events: Vec<BatchEvent>,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Transport: Send + Sync {
    /// The bridge bot's user id.
    fn bot_user_id(&self) -> &UserId;

    /// Homeserver domain the bridge lives on.
    fn domain(&self) -> &str;

    /// Whether the server accepts [`BatchSendRequest`]s.
    async fn supports_batch_send(&self) -> TransportResult<bool>;

    async fn create_room(&self, request: CreateRoomRequest) -> TransportResult<CreatedRoom>;

    async fn invite_user(&self, room_id: &RoomId, user_id: &UserId) -> TransportResult<()>;

    /// Join `room_id` as `handle` if not already joined.
    async fn ensure_joined(&self, room_id: &RoomId, handle: &ActingHandle) -> TransportResult<()>;

    /// Send a message as `handle`. A timestamp overrides the origin time.
    async fn send_message(
        &self,
        room_id: &RoomId,
        handle: &ActingHandle,
        content: &MessageContent,
        timestamp: Option<i64>,
    ) -> TransportResult<EventId>;

    async fn send_batch(
        &self,
        room_id: &RoomId,
        request: BatchSendRequest,
    ) -> TransportResult<Vec<EventId>>;

    /// Write a state event as `handle`. A timestamp places it in the past,
    /// next to imported history.
    async fn send_state(
        &self,
        room_id: &RoomId,
        handle: &ActingHandle,
        event: StateEvent,
        timestamp: Option<i64>,
    ) -> TransportResult<EventId>;

    /// Replace the room's power levels wholesale, as the bot.
    async fn set_power_levels(
        &self,
        room_id: &RoomId,
        levels: &PowerLevels,
    ) -> TransportResult<EventId>;

    async fn set_display_name(&self, handle: &ActingHandle, name: &str) -> TransportResult<()>;

    async fn set_avatar_url(&self, handle: &ActingHandle, url: &ContentUri) -> TransportResult<()>;

    async fn upload_media(&self, data: Vec<u8>, mime_type: &str) -> TransportResult<ContentUri>;

    /// Exchange the user's existing credential for a puppeting credential.
    async fn setup_double_puppet(
        &self,
        user_id: &UserId,
        existing_credential: Option<&str>,
    ) -> TransportResult<(ActingHandle, String)>;

    async fn mark_read(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
        handle: &ActingHandle,
    ) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_event_types() {
        let child = StateEvent::SpaceChild {
            child: RoomId("!c:example.org".into()),
            via: vec!["example.org".into()],
        };
        assert_eq!(child.event_type(), STATE_SPACE_CHILD);
        assert_eq!(child.state_key(), "!c:example.org");

        let pl = StateEvent::PowerLevels(PowerLevels::base());
        assert_eq!(pl.event_type(), STATE_POWER_LEVELS);
        assert!(pl.state_key().is_empty());
    }
}
