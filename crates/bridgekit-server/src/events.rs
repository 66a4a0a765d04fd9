//! Events entering the bridge from either side.

use serde::{Deserialize, Serialize};

use bridgekit_shared::types::{EventId, RoomId, UserId};
use bridgekit_shared::{BackfillMessage, MessageContent};

/// An event observed in a room on the local chat network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEvent {
    pub event_id: EventId,
    pub room_id: RoomId,
    pub sender: UserId,
    pub kind: LocalEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocalEventKind {
    Message(MessageContent),
    /// Encryption was enabled in the room.
    Encrypted,
    /// Anything the bridge does not interpret, by event type.
    Other { event_type: String },
}

impl LocalEvent {
    pub fn message(event_id: EventId, room_id: RoomId, sender: UserId, content: MessageContent) -> Self {
        Self {
            event_id,
            room_id,
            sender,
            kind: LocalEventKind::Message(content),
        }
    }
}

/// An event reported by the remote network's connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteEvent {
    /// A new message from a remote participant or from the owner's remote account.
    Message {
        room_id: RoomId,
        sender: UserId,
        content: MessageContent,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Past messages to import, oldest first.
    History {
        room_id: RoomId,
        owner: UserId,
        messages: Vec<BackfillMessage>,
        #[serde(default)]
        notify: bool,
    },
    /// A remote participant changed their name.
    Rename {
        room_id: RoomId,
        ghost: UserId,
        name: String,
    },
    /// The remote side closed the conversation.
    Closed { room_id: RoomId },
}

impl RemoteEvent {
    pub fn room_id(&self) -> &RoomId {
        match self {
            RemoteEvent::Message { room_id, .. }
            | RemoteEvent::History { room_id, .. }
            | RemoteEvent::Rename { room_id, .. }
            | RemoteEvent::Closed { room_id } => room_id,
        }
    }
}
