//! The bridge facade: lifecycle plus the three entry points through which
//! events reach the core.

use std::sync::Arc;

use tracing::{debug, info, warn};

use bridgekit_matrix::BridgeError;
use bridgekit_shared::types::{ActingHandle, PermissionLevel, RoomId, UserId};
use bridgekit_shared::MessageContent;
use bridgekit_store::{LogicalUser, MemDb, Room};

use crate::commands::CommandEvent;
use crate::connector::{BridgeConnector, RoomEventHandler};
use crate::error::{Result, ServerError};
use crate::events::{LocalEvent, LocalEventKind, RemoteEvent};
use crate::kit::BridgeKit;

const CLOSED_NOTICE: &str = "This conversation was closed on the remote network.";

pub struct Bridge {
    kit: Arc<BridgeKit>,
    connector: Arc<dyn BridgeConnector>,
    room_events: Option<Arc<dyn RoomEventHandler>>,
}

impl Bridge {
    pub fn new(kit: Arc<BridgeKit>, connector: Arc<dyn BridgeConnector>) -> Self {
        Self {
            kit,
            connector,
            room_events: None,
        }
    }

    /// Route non-command room events to `handler`.
    pub fn with_room_event_handler(mut self, handler: Arc<dyn RoomEventHandler>) -> Self {
        self.room_events = Some(handler);
        self
    }

    pub fn kit(&self) -> &Arc<BridgeKit> {
        &self.kit
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Restore the snapshot, then initialise and start the connector.
    pub async fn start(&self) -> Result<()> {
        let kit = &self.kit;
        *kit.db.lock().await = MemDb::load(&kit.config.state_path).await?;

        self.connector.init(kit).await?;
        self.connector.start(kit).await;
        info!(bridge = %kit.config.bridge_name, build = %kit.config.build, "Bridge started");
        Ok(())
    }

    /// Cancel background work, stop the connector and write the snapshot.
    pub async fn stop(&self) -> Result<()> {
        let kit = &self.kit;
        kit.shutdown.cancel();
        self.connector.stop().await;

        kit.db.lock().await.store(&kit.config.state_path).await?;
        info!(path = %kit.config.state_path.display(), "Bridge stopped");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// A room from the connector with its bot handle bound.
    pub async fn get_room(&self, room_id: &RoomId) -> Option<Room> {
        let mut room = self.connector.get_room(room_id).await?;
        self.kit.rooms.load_room(&mut room);
        Some(room)
    }

    /// Every known room with its bot handle bound.
    pub async fn get_all_rooms(&self) -> Vec<Room> {
        let mut rooms = self.connector.get_all_rooms().await;
        for room in &mut rooms {
            self.kit.rooms.load_room(room);
        }
        rooms
    }

    async fn user(&self, user_id: &UserId, create: bool) -> Result<LogicalUser> {
        self.connector
            .get_user(user_id, create)
            .await
            .ok_or_else(|| ServerError::UnknownUser(user_id.clone()))
    }

    async fn room(&self, room_id: &RoomId) -> Result<Room> {
        self.get_room(room_id)
            .await
            .ok_or_else(|| ServerError::UnknownRoom(room_id.clone()))
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Make `room_id` the user's management room, replacing any earlier one.
    pub async fn on_management_room_assigned(&self, user_id: &UserId, room_id: RoomId) -> Result<()> {
        let mut user = self.user(user_id, true).await?;

        if let Some(old) = user.management_room().filter(|old| **old != room_id).cloned() {
            info!(user = %user_id, old = %old, new = %room_id, "Replacing management room");
            user.clear_management_room();
        }
        user.set_management_room(room_id.clone())?;

        self.connector.set_management_room(&user, &room_id).await
    }

    /// Store a new credential for the user and drop the double puppet issued
    /// for the old one. The next action on their behalf sets up again.
    pub async fn switch_credential(&self, user_id: &UserId, token: String) -> Result<()> {
        let mut user = self.user(user_id, false).await?;
        user.switch_credential(user_id, token)?;
        self.kit.resolver.reset(user_id).await;
        self.connector.put_user(user).await;
        info!(user = %user_id, "Credential switched");
        Ok(())
    }

    /// Resolve the acting handle for `user` and persist what was learned.
    async fn act_as(&self, user: &mut LogicalUser) -> ActingHandle {
        let before = (user.double_puppet().cloned(), user.access_token.clone());
        let handle = self.kit.resolver.resolve_and_record(user).await;
        if (user.double_puppet().cloned(), user.access_token.clone()) != before {
            self.connector.put_user(user.clone()).await;
        }
        handle
    }

    /// Handle an event seen in a room on the local chat network.
    pub async fn on_local_room_event(&self, event: LocalEvent) -> Result<()> {
        let kit = &self.kit;
        if event.sender == *kit.transport.bot_user_id() || self.connector.is_ghost(&event.sender).await {
            debug!(sender = %event.sender, "Ignoring event from the bridge side");
            return Ok(());
        }

        let user = self.user(&event.sender, true).await?;
        if user.permission_level < PermissionLevel::Relay {
            debug!(user = %event.sender, "Ignoring event from blocked user");
            return Ok(());
        }
        let mut room = self.room(&event.room_id).await?;

        match &event.kind {
            LocalEventKind::Message(content) => {
                let in_management_room = user.management_room() == Some(&event.room_id);
                if let Some((name, args)) = kit.commands.parse(&content.body, in_management_room) {
                    let cmd = CommandEvent {
                        user,
                        room,
                        event_id: event.event_id.clone(),
                        name,
                        args,
                    };
                    kit.commands.dispatch(kit, cmd).await?;
                    return Ok(());
                }
            }
            LocalEventKind::Encrypted => {
                room.encrypted = true;
                self.connector.put_room(room.clone()).await;
                if let Some(handler) = &self.room_events {
                    if let Err(e) = handler.handle_mark_encrypted(&room).await {
                        warn!(room = %event.room_id, error = %e, "Encryption handler failed");
                    }
                }
                return Ok(());
            }
            LocalEventKind::Other { .. } => {}
        }

        match &self.room_events {
            Some(handler) => {
                if let Err(e) = handler.handle_room_event(&room, &user, &event).await {
                    warn!(room = %event.room_id, user = %event.sender, error = %e, "Room event handler failed");
                }
            }
            None => debug!(room = %event.room_id, "No room event handler, event dropped"),
        }
        Ok(())
    }

    /// Handle an event reported by the connector from the remote network.
    pub async fn on_inbound_remote_event(&self, event: RemoteEvent) -> Result<()> {
        let kit = &self.kit;
        let mut room = self.room(event.room_id()).await?;

        match event {
            RemoteEvent::Message {
                sender,
                content,
                timestamp,
                ..
            } => {
                let handle = match kit.resolver.resolve_room_ghost(&room, &sender) {
                    Some(handle) => handle,
                    None => match self.connector.get_user(&sender, false).await {
                        Some(mut user) => self.act_as(&mut user).await,
                        None => return Err(BridgeError::NoSender(sender).into()),
                    },
                };
                match timestamp {
                    Some(ts) => kit.delivery.send_timestamped(&room, &handle, &content, ts).await?,
                    None => kit.delivery.send_live(&room, &handle, &content).await?,
                };
            }
            RemoteEvent::History {
                owner,
                messages,
                notify,
                ..
            } => {
                let mut owner = self.user(&owner, false).await?;
                self.act_as(&mut owner).await;
                let cancel = kit.shutdown.child_token();
                match kit
                    .delivery
                    .backfill(&room, &owner, &messages, notify, &cancel)
                    .await
                {
                    Ok(report) => info!(
                        room = ?room.room_id,
                        path = ?report.path,
                        delivered = report.delivered.len(),
                        "Backfill finished"
                    ),
                    Err(BridgeError::PartialFailure(report)) => warn!(
                        room = ?room.room_id,
                        path = ?report.path,
                        delivered = report.delivered.len(),
                        failed = ?report.failed,
                        "Backfill finished with undelivered messages"
                    ),
                    Err(e) => return Err(e.into()),
                }
            }
            RemoteEvent::Rename { ghost, name, .. } => {
                let Some(target) = room.ghosts.iter_mut().find(|g| g.user_id == ghost) else {
                    return Err(ServerError::UnknownUser(ghost));
                };
                let renamed = kit.registry.update_display_name(target, &name).await;
                self.connector.put_room(room).await;
                renamed?;
            }
            RemoteEvent::Closed { .. } => {
                kit.rooms.mark_read_only(&room, None).await?;
                kit.delivery
                    .send_bot_message(&room, &MessageContent::notice(CLOSED_NOTICE))
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::demo::DemoConnector;
    use crate::kit::testing;
    use bridgekit_matrix::memory::Call;
    use bridgekit_matrix::{InMemoryTransport, Transport};
    use bridgekit_shared::types::{ContentUri, EventId};
    use bridgekit_shared::BackfillMessage;

    fn wire(kit: &Arc<BridgeKit>) -> (Arc<DemoConnector>, Bridge) {
        let connector = Arc::new(DemoConnector::new(kit));
        let bridge = Bridge::new(kit.clone(), connector.clone()).with_room_event_handler(connector.clone());
        (connector, bridge)
    }

    fn alice() -> UserId {
        UserId::new("alice", "example.org")
    }

    /// A created room with one ghost, stored in the kit's database.
    async fn bridged_room(kit: &BridgeKit) -> Room {
        let owner = LogicalUser::new(alice(), "r-alice", "Alice");
        let ghost = kit
            .registry
            .new_ghost("r-bob", "Bob", "bob", ContentUri::default());
        let mut room = kit.rooms.new_room("Bob", "", vec![ghost]);
        kit.rooms
            .create_room(&mut room, &owner, &ContentUri::default())
            .await
            .unwrap();
        kit.db.lock().await.put_room(room.clone());
        room
    }

    fn message(room: &Room, sender: UserId, body: &str) -> LocalEvent {
        LocalEvent::message(
            EventId(format!("$local-{body}")),
            room.room_id.clone().unwrap(),
            sender,
            MessageContent::text(body),
        )
    }

    fn bodies(transport: &InMemoryTransport, room: &Room) -> Vec<String> {
        transport
            .timeline(room.room_id.as_ref().unwrap())
            .into_iter()
            .map(|e| e.content.body)
            .collect()
    }

    #[tokio::test]
    async fn management_room_is_replaced() {
        let (_, kit) = testing::kit();
        let (connector, bridge) = wire(&kit);
        let first = RoomId("!first:example.org".into());
        let second = RoomId("!second:example.org".into());

        bridge.on_management_room_assigned(&alice(), first.clone()).await.unwrap();
        bridge.on_management_room_assigned(&alice(), first.clone()).await.unwrap();
        bridge.on_management_room_assigned(&alice(), second.clone()).await.unwrap();

        let user = connector.get_user(&alice(), false).await.unwrap();
        assert_eq!(user.management_room(), Some(&second));
    }

    #[tokio::test]
    async fn login_in_management_room_creates_test_room() {
        let (transport, kit) = testing::kit();
        let (connector, bridge) = wire(&kit);
        connector.init(&kit).await.unwrap();

        let room = bridged_room(&kit).await;
        let room_id = room.room_id.clone().unwrap();
        bridge.on_management_room_assigned(&alice(), room_id).await.unwrap();

        bridge.on_local_room_event(message(&room, alice(), "login")).await.unwrap();

        let reply = bodies(&transport, &room).pop().unwrap();
        assert!(reply.starts_with("Okay, you logged in!"), "{reply}");
        assert_eq!(
            transport.count_calls(|c| matches!(c, Call::CreateRoom { name } if name == "Test Room")),
            1
        );
    }

    #[tokio::test]
    async fn prefixed_command_outside_management_room() {
        let (transport, kit) = testing::kit();
        let (_, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;

        bridge
            .on_local_room_event(message(&room, alice(), "!bridge frobnicate"))
            .await
            .unwrap();

        let reply = bodies(&transport, &room).pop().unwrap();
        assert!(reply.contains("Unknown command 'frobnicate'"));
    }

    #[tokio::test]
    async fn plain_messages_reach_the_handler() {
        let (transport, kit) = testing::kit();
        let (_, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;

        bridge.on_local_room_event(message(&room, alice(), "hello")).await.unwrap();

        let bot = transport.bot_user_id().clone();
        let marked = EventId("$local-hello".into());
        assert_eq!(
            transport.count_calls(
                |c| matches!(c, Call::MarkRead { user, event, .. } if *user == bot && *event == marked)
            ),
            1
        );
        assert!(bodies(&transport, &room).is_empty());
    }

    #[tokio::test]
    async fn bridge_side_senders_are_ignored() {
        let (transport, kit) = testing::kit();
        let (connector, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;
        let ghost = room.ghosts[0].user_id.clone();
        let bot = transport.bot_user_id().clone();

        bridge.on_local_room_event(message(&room, ghost.clone(), "!bridge help")).await.unwrap();
        bridge.on_local_room_event(message(&room, bot, "!bridge help")).await.unwrap();

        assert!(bodies(&transport, &room).is_empty());
        assert!(connector.get_user(&ghost, false).await.is_none());
    }

    #[tokio::test]
    async fn blocked_users_are_ignored() {
        let (transport, kit) = testing::kit();
        let (connector, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;

        let mut user = connector.get_user(&alice(), true).await.unwrap();
        user.permission_level = PermissionLevel::Block;
        kit.db.lock().await.users.insert(alice(), user);

        bridge.on_local_room_event(message(&room, alice(), "!bridge help")).await.unwrap();
        assert!(bodies(&transport, &room).is_empty());
    }

    #[tokio::test]
    async fn encryption_event_marks_the_room() {
        let (_, kit) = testing::kit();
        let (connector, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;
        let room_id = room.room_id.clone().unwrap();
        assert!(!room.encrypted);

        let event = LocalEvent {
            event_id: EventId("$enc".into()),
            room_id: room_id.clone(),
            sender: alice(),
            kind: LocalEventKind::Encrypted,
        };
        bridge.on_local_room_event(event).await.unwrap();

        assert!(connector.get_room(&room_id).await.unwrap().encrypted);
    }

    #[tokio::test]
    async fn remote_messages_use_the_room_ghost() {
        let (transport, kit) = testing::kit();
        let (_, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;
        let ghost = room.ghosts[0].user_id.clone();

        bridge
            .on_inbound_remote_event(RemoteEvent::Message {
                room_id: room.room_id.clone().unwrap(),
                sender: ghost.clone(),
                content: MessageContent::text("hi from bob"),
                timestamp: Some(1_000),
            })
            .await
            .unwrap();

        let last = transport.timeline(room.room_id.as_ref().unwrap()).pop().unwrap();
        assert_eq!(last.sender, ghost);
        assert_eq!(last.timestamp, 1_000);
    }

    #[tokio::test]
    async fn remote_messages_record_the_double_puppet() {
        let (transport, kit) = testing::kit();
        let (connector, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;
        connector.get_user(&alice(), true).await.unwrap();

        bridge
            .on_inbound_remote_event(RemoteEvent::Message {
                room_id: room.room_id.clone().unwrap(),
                sender: alice(),
                content: MessageContent::text("from my phone"),
                timestamp: None,
            })
            .await
            .unwrap();

        let last = transport.timeline(room.room_id.as_ref().unwrap()).pop().unwrap();
        assert_eq!(last.sender, alice());
        let stored = connector.get_user(&alice(), false).await.unwrap();
        let puppet = stored.double_puppet().unwrap();
        assert_eq!(stored.access_token, puppet.credential);
        assert!(stored.access_token.as_deref().unwrap().ends_with("fresh"));
    }

    #[tokio::test]
    async fn switched_credential_is_exchanged_on_next_message() {
        let (transport, kit) = testing::kit();
        let (connector, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;
        connector.get_user(&alice(), true).await.unwrap();
        let send = |body: &str| RemoteEvent::Message {
            room_id: room.room_id.clone().unwrap(),
            sender: alice(),
            content: MessageContent::text(body),
            timestamp: None,
        };

        bridge.on_inbound_remote_event(send("one")).await.unwrap();
        bridge.switch_credential(&alice(), "new-token".into()).await.unwrap();

        let stored = connector.get_user(&alice(), false).await.unwrap();
        assert!(stored.double_puppet().is_none());
        assert_eq!(stored.access_token.as_deref(), Some("new-token"));

        bridge.on_inbound_remote_event(send("two")).await.unwrap();
        let stored = connector.get_user(&alice(), false).await.unwrap();
        assert!(stored.access_token.as_deref().unwrap().ends_with("exchanged"));
        assert_eq!(
            transport.count_calls(|c| matches!(c, Call::SetupDoublePuppet { .. })),
            2
        );
    }

    #[tokio::test]
    async fn switching_credential_of_unknown_user_fails() {
        let (_, kit) = testing::kit();
        let (_, bridge) = wire(&kit);

        let err = bridge
            .switch_credential(&alice(), "token".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownUser(_)));
    }

    #[tokio::test]
    async fn remote_messages_from_strangers_have_no_sender() {
        let (_, kit) = testing::kit();
        let (_, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;

        let err = bridge
            .on_inbound_remote_event(RemoteEvent::Message {
                room_id: room.room_id.clone().unwrap(),
                sender: UserId::new("mallory", "example.org"),
                content: MessageContent::text("?"),
                timestamp: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bridge(BridgeError::NoSender(_))));
    }

    #[tokio::test]
    async fn history_is_backfilled_in_order() {
        let (transport, kit) = testing::kit();
        let (connector, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;
        let room_id = room.room_id.clone().unwrap();
        connector.get_user(&alice(), true).await.unwrap();

        let messages = [(100, "a"), (50, "b"), (200, "c")]
            .into_iter()
            .map(|(ts, body)| BackfillMessage {
                sender: room.ghosts[0].user_id.clone(),
                recipient: Some(alice()),
                room_id: room_id.clone(),
                content: MessageContent::text(body),
                timestamp: ts,
            })
            .collect();
        bridge
            .on_inbound_remote_event(RemoteEvent::History {
                room_id: room_id.clone(),
                owner: alice(),
                messages,
                notify: false,
            })
            .await
            .unwrap();

        assert_eq!(bodies(&transport, &room), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn partial_backfill_is_not_an_error() {
        let (transport, kit) = testing::kit();
        let (connector, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;
        let room_id = room.room_id.clone().unwrap();
        connector.get_user(&alice(), true).await.unwrap();
        transport.set_batch_supported(false);
        transport.fail(|f| f.message_sends = HashSet::from([2]));

        let messages = [(100, "a"), (200, "b"), (300, "c")]
            .into_iter()
            .map(|(ts, body)| BackfillMessage {
                sender: room.ghosts[0].user_id.clone(),
                recipient: Some(alice()),
                room_id: room_id.clone(),
                content: MessageContent::text(body),
                timestamp: ts,
            })
            .collect();
        bridge
            .on_inbound_remote_event(RemoteEvent::History {
                room_id: room_id.clone(),
                owner: alice(),
                messages,
                notify: false,
            })
            .await
            .unwrap();

        assert_eq!(bodies(&transport, &room), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn lists_all_rooms_with_bot_bound() {
        let (_, kit) = testing::kit();
        let (_, bridge) = wire(&kit);
        assert!(bridge.get_all_rooms().await.is_empty());

        let room = bridged_room(&kit).await;
        let rooms = bridge.get_all_rooms().await;
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].room_id, room.room_id);
        assert!(rooms[0].bot.is_some());
    }

    #[tokio::test]
    async fn history_for_unknown_owner_fails() {
        let (_, kit) = testing::kit();
        let (_, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;

        let err = bridge
            .on_inbound_remote_event(RemoteEvent::History {
                room_id: room.room_id.clone().unwrap(),
                owner: alice(),
                messages: vec![],
                notify: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownUser(_)));
    }

    #[tokio::test]
    async fn rename_is_stored_even_when_it_fails() {
        let (transport, kit) = testing::kit();
        let (connector, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;
        let room_id = room.room_id.clone().unwrap();
        let ghost = room.ghosts[0].user_id.clone();

        transport.fail(|f| f.display_name = true);
        let err = bridge
            .on_inbound_remote_event(RemoteEvent::Rename {
                room_id: room_id.clone(),
                ghost: ghost.clone(),
                name: "Robert".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bridge(BridgeError::RenameFailed { .. })));

        let stored = connector.get_room(&room_id).await.unwrap();
        assert_eq!(stored.ghost(&ghost).unwrap().display_name, "Robert");
    }

    #[tokio::test]
    async fn closing_makes_the_room_read_only() {
        let (transport, kit) = testing::kit();
        let (_, bridge) = wire(&kit);
        let room = bridged_room(&kit).await;
        let room_id = room.room_id.clone().unwrap();

        bridge
            .on_inbound_remote_event(RemoteEvent::Closed { room_id: room_id.clone() })
            .await
            .unwrap();

        let levels = transport.power_levels(&room_id).unwrap();
        assert!(!levels.can_send(&alice(), bridgekit_shared::constants::EVENT_MESSAGE));
        assert_eq!(bodies(&transport, &room).pop().unwrap(), CLOSED_NOTICE);
    }

    #[tokio::test]
    async fn snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let (_, kit) = testing::kit_with(|c| c.state_path = path.clone());
        let (_, bridge) = wire(&kit);
        bridge.start().await.unwrap();
        let room = bridged_room(&kit).await;
        bridge
            .on_management_room_assigned(&alice(), room.room_id.clone().unwrap())
            .await
            .unwrap();
        bridge.stop().await.unwrap();
        assert!(kit.shutdown.is_cancelled());

        let (_, kit) = testing::kit_with(|c| c.state_path = path.clone());
        let (connector, bridge) = wire(&kit);
        bridge.start().await.unwrap();

        let user = connector.get_user(&alice(), false).await.unwrap();
        assert_eq!(user.management_room(), room.room_id.as_ref());
        let restored = bridge.get_room(room.room_id.as_ref().unwrap()).await.unwrap();
        assert_eq!(restored.ghosts, room.ghosts);
        assert!(restored.bot.is_some());
    }
}
