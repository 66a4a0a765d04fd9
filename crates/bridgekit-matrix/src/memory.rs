//! In-process [`Transport`] implementation.
//!
//! Simulates just enough of a homeserver for the bridge to run without a
//! network: room ids, per-room timelines, membership, power levels, state,
//! profiles and media are all kept in memory. Every call is recorded, and
//! individual operations can be made to fail, which is how the delivery and
//! resolution paths are exercised in tests. The binary uses it for dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use bridgekit_shared::constants::EVENT_MESSAGE;
use bridgekit_shared::protocol::now_millis;
use bridgekit_shared::types::{ActingHandle, ContentUri, EventId, RoomId, UserId};
use bridgekit_shared::{MessageContent, PowerLevels, TransportError};

use crate::transport::{
    BatchSendRequest, CreateRoomRequest, CreatedRoom, StateEvent, Transport, TransportResult,
};

// ---------------------------------------------------------------------------
// Recorded state
// ---------------------------------------------------------------------------

/// A message as it landed in a room timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEvent {
    pub event_id: EventId,
    pub sender: UserId,
    pub content: MessageContent,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct RoomRecord {
    pub request: CreateRoomRequest,
    pub invited: Vec<UserId>,
    pub joined: HashSet<UserId>,
    pub timeline: Vec<TimelineEvent>,
    pub power_levels: PowerLevels,
    pub state: Vec<StateEvent>,
    pub read_markers: HashMap<UserId, EventId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub display_name: Option<String>,
    pub avatar_url: Option<ContentUri>,
}

/// One call made against the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateRoom { name: String },
    Invite { room: RoomId, user: UserId },
    EnsureJoined { room: RoomId, user: UserId },
    SendMessage { room: RoomId, sender: UserId, timestamp: Option<i64> },
    SendBatch { room: RoomId, events: usize },
    SendState { room: RoomId, event_type: &'static str, timestamp: Option<i64> },
    SetPowerLevels { room: RoomId },
    SetDisplayName { user: UserId, name: String },
    SetAvatarUrl { user: UserId },
    UploadMedia { bytes: usize },
    SetupDoublePuppet { user: UserId },
    MarkRead { room: RoomId, event: EventId, user: UserId },
}

/// Operations that should fail on their next invocations.
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    pub create_room: bool,
    pub invite: bool,
    pub batch: bool,
    pub power_levels: bool,
    pub display_name: bool,
    pub upload: bool,
    pub avatar: bool,
    pub mark_read: bool,
    /// Refuse every double-puppet setup.
    pub deny_double_puppet: bool,
    /// 1-based ordinals of `send_message` calls that fail.
    pub message_sends: HashSet<usize>,
}

struct Inner {
    rooms: HashMap<RoomId, RoomRecord>,
    profiles: HashMap<UserId, Profile>,
    media: HashMap<ContentUri, (Vec<u8>, String)>,
    calls: Vec<Call>,
    next_id: u64,
    message_sends: usize,
    batch_supported: bool,
    failures: FailurePlan,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn room_mut(&mut self, room_id: &RoomId) -> TransportResult<&mut RoomRecord> {
        self.rooms
            .get_mut(room_id)
            .ok_or_else(|| TransportError::NotFound(format!("room {room_id}")))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct InMemoryTransport {
    bot: UserId,
    domain: String,
    puppet_delay: Duration,
    inner: Mutex<Inner>,
}

impl InMemoryTransport {
    pub fn new(bot_localpart: &str, domain: &str) -> Self {
        Self {
            bot: UserId::new(bot_localpart, domain),
            domain: domain.to_string(),
            puppet_delay: Duration::ZERO,
            inner: Mutex::new(Inner {
                rooms: HashMap::new(),
                profiles: HashMap::new(),
                media: HashMap::new(),
                calls: Vec::new(),
                next_id: 0,
                message_sends: 0,
                batch_supported: true,
                failures: FailurePlan::default(),
            }),
        }
    }

    /// Make double-puppet setup take this long, widening race windows.
    pub fn with_puppet_delay(mut self, delay: Duration) -> Self {
        self.puppet_delay = delay;
        self
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_batch_supported(&self, supported: bool) {
        self.inner().batch_supported = supported;
    }

    /// Adjust the failure plan in place.
    pub fn fail(&self, f: impl FnOnce(&mut FailurePlan)) {
        f(&mut self.inner().failures);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.inner().calls.iter().filter(|&c| pred(c)).count()
    }

    pub fn room(&self, room_id: &RoomId) -> Option<RoomRecord> {
        self.inner().rooms.get(room_id).cloned()
    }

    pub fn timeline(&self, room_id: &RoomId) -> Vec<TimelineEvent> {
        self.inner()
            .rooms
            .get(room_id)
            .map(|r| r.timeline.clone())
            .unwrap_or_default()
    }

    pub fn power_levels(&self, room_id: &RoomId) -> Option<PowerLevels> {
        self.inner().rooms.get(room_id).map(|r| r.power_levels.clone())
    }

    pub fn profile(&self, user_id: &UserId) -> Profile {
        self.inner().profiles.get(user_id).cloned().unwrap_or_default()
    }

    pub fn media(&self, uri: &ContentUri) -> Option<Vec<u8>> {
        self.inner().media.get(uri).map(|(data, _)| data.clone())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn bot_user_id(&self) -> &UserId {
        &self.bot
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    async fn supports_batch_send(&self) -> TransportResult<bool> {
        Ok(self.inner().batch_supported)
    }

    async fn create_room(&self, request: CreateRoomRequest) -> TransportResult<CreatedRoom> {
        let mut inner = self.inner();
        inner.calls.push(Call::CreateRoom {
            name: request.name.clone(),
        });
        if inner.failures.create_room {
            return Err(TransportError::Unavailable("room creation failed".into()));
        }

        let room_id = RoomId(format!("!room{}:{}", inner.next_id(), self.domain));
        let mut joined = HashSet::from([self.bot.clone()]);
        if request.auto_join_invites {
            joined.extend(request.invite.iter().cloned());
        }

        let record = RoomRecord {
            invited: request.invite.clone(),
            joined,
            timeline: Vec::new(),
            power_levels: request.power_levels.clone(),
            state: request.initial_state.clone(),
            read_markers: HashMap::new(),
            request,
        };
        inner.rooms.insert(room_id.clone(), record);
        debug!(room = %room_id, "In-memory room created");

        Ok(CreatedRoom { room_id })
    }

    async fn invite_user(&self, room_id: &RoomId, user_id: &UserId) -> TransportResult<()> {
        let mut inner = self.inner();
        inner.calls.push(Call::Invite {
            room: room_id.clone(),
            user: user_id.clone(),
        });
        if inner.failures.invite {
            return Err(TransportError::Unavailable("invite failed".into()));
        }
        let room = inner.room_mut(room_id)?;
        if !room.invited.contains(user_id) {
            room.invited.push(user_id.clone());
        }
        Ok(())
    }

    async fn ensure_joined(&self, room_id: &RoomId, handle: &ActingHandle) -> TransportResult<()> {
        let mut inner = self.inner();
        inner.calls.push(Call::EnsureJoined {
            room: room_id.clone(),
            user: handle.user_id.clone(),
        });
        inner.room_mut(room_id)?.joined.insert(handle.user_id.clone());
        Ok(())
    }

    async fn send_message(
        &self,
        room_id: &RoomId,
        handle: &ActingHandle,
        content: &MessageContent,
        timestamp: Option<i64>,
    ) -> TransportResult<EventId> {
        let mut inner = self.inner();
        inner.calls.push(Call::SendMessage {
            room: room_id.clone(),
            sender: handle.user_id.clone(),
            timestamp,
        });
        inner.message_sends += 1;
        let ordinal = inner.message_sends;
        if inner.failures.message_sends.contains(&ordinal) {
            return Err(TransportError::Unavailable(format!(
                "send #{ordinal} failed"
            )));
        }

        let event_id = EventId(format!("$ev{}", inner.next_id()));
        let room = inner.room_mut(room_id)?;
        if !room.power_levels.can_send(&handle.user_id, EVENT_MESSAGE) {
            return Err(TransportError::Denied(format!(
                "{} may not send messages",
                handle.user_id
            )));
        }
        room.timeline.push(TimelineEvent {
            event_id: event_id.clone(),
            sender: handle.user_id.clone(),
            content: content.clone(),
            timestamp: timestamp.unwrap_or_else(now_millis),
        });
        Ok(event_id)
    }

    async fn send_batch(
        &self,
        room_id: &RoomId,
        request: BatchSendRequest,
    ) -> TransportResult<Vec<EventId>> {
        let mut inner = self.inner();
        inner.calls.push(Call::SendBatch {
            room: room_id.clone(),
            events: request.events.len(),
        });
        if inner.failures.batch {
            return Err(TransportError::Unavailable("batch send failed".into()));
        }
        if !inner.batch_supported {
            return Err(TransportError::Rejected("batch send not supported".into()));
        }

        let ids: Vec<EventId> = request
            .events
            .iter()
            .map(|_| EventId(format!("$ev{}", inner.next_id())))
            .collect();

        let room = inner.room_mut(room_id)?;
        for (event, id) in request.events.into_iter().zip(&ids) {
            room.timeline.push(TimelineEvent {
                event_id: id.clone(),
                sender: event.sender,
                content: event.content,
                timestamp: event.timestamp,
            });
        }
        if let (Some(reader), Some(last)) = (request.mark_read_by, ids.last()) {
            room.read_markers.insert(reader, last.clone());
        }
        Ok(ids)
    }

    async fn send_state(
        &self,
        room_id: &RoomId,
        _handle: &ActingHandle,
        event: StateEvent,
        timestamp: Option<i64>,
    ) -> TransportResult<EventId> {
        let mut inner = self.inner();
        inner.calls.push(Call::SendState {
            room: room_id.clone(),
            event_type: event.event_type(),
            timestamp,
        });
        let event_id = EventId(format!("$ev{}", inner.next_id()));
        let room = inner.room_mut(room_id)?;
        if let StateEvent::PowerLevels(levels) = &event {
            room.power_levels = levels.clone();
        }
        room.state.push(event);
        Ok(event_id)
    }

    async fn set_power_levels(
        &self,
        room_id: &RoomId,
        levels: &PowerLevels,
    ) -> TransportResult<EventId> {
        let mut inner = self.inner();
        inner.calls.push(Call::SetPowerLevels {
            room: room_id.clone(),
        });
        if inner.failures.power_levels {
            return Err(TransportError::Denied("power levels rejected".into()));
        }
        let event_id = EventId(format!("$ev{}", inner.next_id()));
        let room = inner.room_mut(room_id)?;
        room.power_levels = levels.clone();
        room.state.push(StateEvent::PowerLevels(levels.clone()));
        Ok(event_id)
    }

    async fn set_display_name(&self, handle: &ActingHandle, name: &str) -> TransportResult<()> {
        let mut inner = self.inner();
        inner.calls.push(Call::SetDisplayName {
            user: handle.user_id.clone(),
            name: name.to_string(),
        });
        if inner.failures.display_name {
            return Err(TransportError::Unavailable("profile update failed".into()));
        }
        inner
            .profiles
            .entry(handle.user_id.clone())
            .or_default()
            .display_name = Some(name.to_string());
        Ok(())
    }

    async fn set_avatar_url(&self, handle: &ActingHandle, url: &ContentUri) -> TransportResult<()> {
        let mut inner = self.inner();
        inner.calls.push(Call::SetAvatarUrl {
            user: handle.user_id.clone(),
        });
        if inner.failures.avatar {
            return Err(TransportError::Unavailable("avatar update failed".into()));
        }
        inner
            .profiles
            .entry(handle.user_id.clone())
            .or_default()
            .avatar_url = Some(url.clone());
        Ok(())
    }

    async fn upload_media(&self, data: Vec<u8>, mime_type: &str) -> TransportResult<ContentUri> {
        let mut inner = self.inner();
        inner.calls.push(Call::UploadMedia { bytes: data.len() });
        if inner.failures.upload {
            return Err(TransportError::Unavailable("media upload failed".into()));
        }
        let uri = ContentUri::new(&self.domain, &Uuid::new_v4().simple().to_string());
        inner
            .media
            .insert(uri.clone(), (data, mime_type.to_string()));
        Ok(uri)
    }

    async fn setup_double_puppet(
        &self,
        user_id: &UserId,
        existing_credential: Option<&str>,
    ) -> TransportResult<(ActingHandle, String)> {
        {
            let mut inner = self.inner();
            inner.calls.push(Call::SetupDoublePuppet {
                user: user_id.clone(),
            });
        }

        if !self.puppet_delay.is_zero() {
            tokio::time::sleep(self.puppet_delay).await;
        }

        let mut inner = self.inner();
        if inner.failures.deny_double_puppet {
            return Err(TransportError::Denied(format!(
                "double puppeting not allowed for {user_id}"
            )));
        }
        if user_id.domain() != self.domain {
            return Err(TransportError::Denied(format!(
                "{user_id} is not on {}",
                self.domain
            )));
        }
        let token = format!(
            "puppet_{}_{}",
            inner.next_id(),
            existing_credential.map(|_| "exchanged").unwrap_or("fresh")
        );
        Ok((
            ActingHandle::double_puppet(user_id.clone(), token.clone()),
            token,
        ))
    }

    async fn mark_read(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
        handle: &ActingHandle,
    ) -> TransportResult<()> {
        let mut inner = self.inner();
        inner.calls.push(Call::MarkRead {
            room: room_id.clone(),
            event: event_id.clone(),
            user: handle.user_id.clone(),
        });
        if inner.failures.mark_read {
            return Err(TransportError::Unavailable("read marker failed".into()));
        }
        inner
            .room_mut(room_id)?
            .read_markers
            .insert(handle.user_id.clone(), event_id.clone());
        Ok(())
    }
}
