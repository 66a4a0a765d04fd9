//! Demo connector.
//!
//! Keeps users and rooms in the shared in-memory database and registers a
//! `login` command that sets up a test room with one ghost. A real
//! integration replaces this with calls into the remote network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bridgekit_matrix::{DeliveryEngine, GhostRegistry, IdentityResolver};
use bridgekit_shared::types::{ContentUri, PermissionLevel, RoomId, UserId};
use bridgekit_shared::MessageContent;
use bridgekit_store::{Ghost, LogicalUser, MemDb, Room};

use crate::commands::{CommandEvent, CommandHandler};
use crate::connector::{BridgeConnector, RoomEventHandler};
use crate::error::Result;
use crate::events::{LocalEvent, LocalEventKind};
use crate::kit::BridgeKit;

pub const RENAMED_GHOST: &str = "Spooky Spooky Ghost";

pub struct DemoConnector {
    db: Arc<Mutex<MemDb>>,
    registry: Arc<GhostRegistry>,
    resolver: Arc<IdentityResolver>,
    delivery: Arc<DeliveryEngine>,
}

impl DemoConnector {
    pub fn new(kit: &BridgeKit) -> Self {
        Self {
            db: kit.db.clone(),
            registry: kit.registry.clone(),
            resolver: kit.resolver.clone(),
            delivery: kit.delivery.clone(),
        }
    }
}

#[async_trait]
impl BridgeConnector for DemoConnector {
    async fn init(&self, kit: &BridgeKit) -> Result<()> {
        info!("Initializing demo connector");
        kit.commands.register(Arc::new(LoginCommand)).await;
        Ok(())
    }

    async fn start(&self, kit: &BridgeKit) {
        info!(
            bot = %kit.transport.bot_user_id(),
            "Demo connector started. Message the bot and use the login command"
        );
    }

    async fn stop(&self) {
        info!("Stopping demo connector");
    }

    async fn get_room(&self, room_id: &RoomId) -> Option<Room> {
        let db = self.db.lock().await;
        Some(
            db.room(room_id)
                .cloned()
                .unwrap_or_else(|| Room::detached(room_id.clone())),
        )
    }

    async fn get_all_rooms(&self) -> Vec<Room> {
        self.db.lock().await.rooms.values().cloned().collect()
    }

    async fn get_user(&self, user_id: &UserId, create: bool) -> Option<LogicalUser> {
        let mut db = self.db.lock().await;
        if !create {
            return db.user(user_id).cloned();
        }

        let user = db.user_or_insert_with(user_id, || {
            debug!(user = %user_id, "Creating demo user");
            let mut user = LogicalUser::new(user_id.clone(), "demo_remote_id", "demo_user");
            user.remote_name = "Demo Name".to_string();
            user.permission_level = PermissionLevel::Admin;
            user
        });
        Some(user.clone())
    }

    async fn is_ghost(&self, user_id: &UserId) -> bool {
        self.registry.is_ghost(user_id)
    }

    async fn get_ghost(&self, user_id: &UserId) -> Option<Ghost> {
        let db = self.db.lock().await;
        db.rooms
            .values()
            .find_map(|room| room.ghost(user_id))
            .cloned()
    }

    async fn set_management_room(&self, user: &LogicalUser, room_id: &RoomId) -> Result<()> {
        info!(user = %user.user_id(), room = %room_id, "Management room set");
        self.db.lock().await.put_user(user.clone());
        Ok(())
    }

    async fn put_room(&self, room: Room) {
        self.db.lock().await.put_room(room);
    }

    async fn put_user(&self, user: LogicalUser) {
        self.db.lock().await.put_user(user);
    }
}

#[async_trait]
impl RoomEventHandler for DemoConnector {
    async fn handle_room_event(&self, room: &Room, user: &LogicalUser, event: &LocalEvent) -> Result<()> {
        match &event.kind {
            LocalEventKind::Message(content) => {
                let raw = serde_json::to_string(content).unwrap_or_default();
                debug!(room = %event.room_id, user = %user.user_id(), content = %raw, "Got message event");
            }
            other => debug!(room = %event.room_id, event = ?other, "Unhandled event type"),
        }

        if let Err(e) = self
            .delivery
            .mark_read(room, &event.event_id, &self.resolver.as_bot())
            .await
        {
            warn!(room = %event.room_id, error = %e, "Error marking as read");
        }
        Ok(())
    }

    async fn handle_mark_encrypted(&self, room: &Room) -> Result<()> {
        info!(room = ?room.room_id, "Room marked as encrypted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// login
// ---------------------------------------------------------------------------

struct LoginCommand;

#[async_trait]
impl CommandHandler for LoginCommand {
    fn name(&self) -> &'static str {
        "login"
    }

    fn description(&self) -> &'static str {
        "Authenticate with the bridge"
    }

    async fn run(&self, kit: &BridgeKit, cmd: &CommandEvent) -> Result<String> {
        info!(user = %cmd.user.user_id(), "Login called");
        let (room_id, _rename) = create_test_room(kit, &cmd.user).await?;
        Ok(format!("Okay, you logged in! Your test room is {room_id}"))
    }
}

/// Create a room with one ghost, greet from bot and ghost, and schedule the
/// ghost to rename itself.
pub(crate) async fn create_test_room(kit: &BridgeKit, user: &LogicalUser) -> Result<(RoomId, JoinHandle<()>)> {
    let ghost = kit
        .registry
        .new_ghost("SomeUserID", "Test User", "user_name", ContentUri::default());
    let mut room = kit.rooms.new_room("Test Room", "Some Topic", vec![ghost]);

    let created = kit
        .rooms
        .create_room(&mut room, user, &ContentUri::default())
        .await?;
    kit.db.lock().await.put_room(room.clone());

    kit.delivery
        .send_bot_message(&room, &MessageContent::text("Hello, I'm a bot"))
        .await?;
    let actor = kit.resolver.resolve_room_actor(&room);
    kit.delivery
        .send_live(&room, &actor, &MessageContent::text("Hello, I'm a ghost"))
        .await?;

    let rename = tokio::spawn(rename_later(
        room,
        kit.config.demo_rename_delay,
        kit.shutdown.child_token(),
        kit.registry.clone(),
        kit.resolver.clone(),
        kit.delivery.clone(),
        kit.db.clone(),
    ));

    Ok((created.room_id, rename))
}

async fn rename_later(
    mut room: Room,
    delay: Duration,
    cancel: CancellationToken,
    registry: Arc<GhostRegistry>,
    resolver: Arc<IdentityResolver>,
    delivery: Arc<DeliveryEngine>,
    db: Arc<Mutex<MemDb>>,
) {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(room = %room.name, "Demo rename cancelled");
            return;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    if let Some(ghost) = room.ghosts.first_mut() {
        if let Err(e) = registry.update_display_name(ghost, RENAMED_GHOST).await {
            warn!(error = %e, "Error updating ghost name");
        }
    }
    db.lock().await.put_room(room.clone());

    let actor = resolver.resolve_room_actor(&room);
    let content = MessageContent::text("See? I can also update my own name");
    if let Err(e) = delivery.send_live(&room, &actor, &content).await {
        warn!(error = %e, "Error sending rename notice");
    }
}
