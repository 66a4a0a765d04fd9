//! The seam between the bridge core and a remote-network integration.

use async_trait::async_trait;

use bridgekit_shared::types::{RoomId, UserId};
use bridgekit_store::{Ghost, LogicalUser, Room};

use crate::error::Result;
use crate::events::LocalEvent;
use crate::kit::BridgeKit;

/// A remote-network integration plugged into the bridge.
#[async_trait]
pub trait BridgeConnector: Send + Sync {
    /// Called once before [`start`](Self::start). Register commands here.
    async fn init(&self, kit: &BridgeKit) -> Result<()>;

    /// Connect to the remote network.
    async fn start(&self, kit: &BridgeKit);

    async fn stop(&self);

    async fn get_room(&self, room_id: &RoomId) -> Option<Room>;

    /// Every room the connector knows about.
    async fn get_all_rooms(&self) -> Vec<Room>;

    /// Look up a local user, creating them when `create` is set.
    async fn get_user(&self, user_id: &UserId, create: bool) -> Option<LogicalUser>;

    async fn is_ghost(&self, user_id: &UserId) -> bool;

    async fn get_ghost(&self, user_id: &UserId) -> Option<Ghost>;

    /// Persist the user's new management room.
    async fn set_management_room(&self, user: &LogicalUser, room_id: &RoomId) -> Result<()>;

    /// Persist a room the bridge changed.
    async fn put_room(&self, _room: Room) {}

    /// Persist a user the bridge changed, e.g. a new double puppet.
    async fn put_user(&self, _user: LogicalUser) {}
}

/// Optional capability of a connector: reacting to local room events.
#[async_trait]
pub trait RoomEventHandler: Send + Sync {
    async fn handle_room_event(&self, room: &Room, user: &LogicalUser, event: &LocalEvent) -> Result<()>;

    async fn handle_mark_encrypted(&self, _room: &Room) -> Result<()> {
        Ok(())
    }
}
