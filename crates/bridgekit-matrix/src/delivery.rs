//! Live message delivery and historical backfill.
//!
//! Backfill tries a single batch import first. When the server does not
//! support batch import, or the batch call fails, every message is sent on
//! its own with its original timestamp. Both paths keep the caller's order;
//! timestamps are never used to reorder.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bridgekit_shared::types::{ActingHandle, EventId};
use bridgekit_shared::{BackfillMessage, MessageContent};
use bridgekit_store::{LogicalUser, Room};

use crate::error::{BridgeError, Result};
use crate::resolver::IdentityResolver;
use crate::rooms::require_created;
use crate::transport::{BatchEvent, BatchSendRequest, Transport};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum BackfillPath {
    Batch,
    Manual,
}

/// Outcome of one backfill call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackfillReport {
    pub path: BackfillPath,
    /// Messages handed to the transport.
    pub attempted: usize,
    /// Event ids of delivered messages, in input order.
    pub delivered: Vec<EventId>,
    /// Zero-based input indices of messages that could not be delivered.
    pub failed: Vec<usize>,
    /// Stopped early because the token was cancelled.
    pub cancelled: bool,
}

impl BackfillReport {
    fn new(path: BackfillPath) -> Self {
        Self {
            path,
            attempted: 0,
            delivered: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        }
    }

    fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(BridgeError::PartialFailure(self))
        }
    }
}

// ---------------------------------------------------------------------------
// DeliveryEngine
// ---------------------------------------------------------------------------

pub struct DeliveryEngine {
    transport: Arc<dyn Transport>,
    resolver: Arc<IdentityResolver>,
}

impl DeliveryEngine {
    pub fn new(transport: Arc<dyn Transport>, resolver: Arc<IdentityResolver>) -> Self {
        Self {
            transport,
            resolver,
        }
    }

    pub async fn send_live(&self, room: &Room, handle: &ActingHandle, content: &MessageContent) -> Result<EventId> {
        self.send(room, handle, content, None).await
    }

    /// Send with an explicit origin timestamp.
    pub async fn send_timestamped(
        &self,
        room: &Room,
        handle: &ActingHandle,
        content: &MessageContent,
        timestamp: i64,
    ) -> Result<EventId> {
        self.send(room, handle, content, Some(timestamp)).await
    }

    async fn send(
        &self,
        room: &Room,
        handle: &ActingHandle,
        content: &MessageContent,
        timestamp: Option<i64>,
    ) -> Result<EventId> {
        let room_id = require_created(room)?;
        let event_id = self
            .transport
            .send_message(room_id, handle, content, timestamp)
            .await
            .map_err(|source| BridgeError::SendFailed {
                room: room_id.clone(),
                source,
            })?;
        debug!(room = %room_id, sender = %handle.user_id, event = %event_id, "Message sent");
        Ok(event_id)
    }

    pub async fn send_bot_message(&self, room: &Room, content: &MessageContent) -> Result<EventId> {
        self.send_live(room, &self.resolver.as_bot(), content).await
    }

    /// Send as `user`, through their double puppet or ghost.
    pub async fn send_user_message(
        &self,
        room: &Room,
        user: &LogicalUser,
        content: &MessageContent,
        timestamp: Option<i64>,
    ) -> Result<EventId> {
        let handle = self.resolver.resolve_acting_handle(user).await;
        self.send(room, &handle, content, timestamp).await
    }

    /// Reply to `event` with the error text as a bot notice.
    pub async fn reply_error(
        &self,
        room: &Room,
        event: &EventId,
        error: &dyn std::fmt::Display,
    ) -> Result<EventId> {
        let mut content = MessageContent::notice(error.to_string());
        content.set_reply(event.clone());
        self.send_bot_message(room, &content).await
    }

    pub async fn edit_bot_message(&self, room: &Room, event: &EventId, mut content: MessageContent) -> Result<EventId> {
        content.set_edit(event.clone());
        let edit = self.send_bot_message(room, &content).await?;
        debug!(original = %event, edit = %edit, "Edited bot message");
        Ok(edit)
    }

    pub async fn mark_read(&self, room: &Room, event: &EventId, handle: &ActingHandle) -> Result<()> {
        let room_id = require_created(room)?;
        self.transport
            .mark_read(room_id, event, handle)
            .await
            .map_err(|source| BridgeError::TransportUnavailable {
                action: "mark read",
                source,
            })
    }

    // -----------------------------------------------------------------------
    // Backfill
    // -----------------------------------------------------------------------

    /// Import `messages` into `room` in the given order.
    ///
    /// With `notify` unset the imported history is marked read by `owner`.
    /// Messages that cannot be delivered do not stop the rest; they are
    /// reported through [`BridgeError::PartialFailure`]. Cancelling `cancel`
    /// stops before the next message and returns what was done so far.
    pub async fn backfill(
        &self,
        room: &Room,
        owner: &LogicalUser,
        messages: &[BackfillMessage],
        notify: bool,
        cancel: &CancellationToken,
    ) -> Result<BackfillReport> {
        let room_id = require_created(room)?;

        if cancel.is_cancelled() {
            info!(room = %room_id, "Backfill cancelled before start");
            let mut report = BackfillReport::new(BackfillPath::Batch);
            report.cancelled = true;
            return Ok(report);
        }

        match self.transport.supports_batch_send().await {
            Ok(true) => match self.backfill_batch(room, owner, messages, notify).await {
                Ok(report) => return Ok(report),
                Err(e) => warn!(room = %room_id, error = %e, "Batch backfill failed, sending one by one"),
            },
            Ok(false) => debug!(room = %room_id, "Batch send unsupported"),
            Err(e) => warn!(room = %room_id, error = %e, "Could not query batch support"),
        }

        self.backfill_manual(room, owner, messages, cancel)
            .await
            .into_result()
    }

    async fn backfill_batch(
        &self,
        room: &Room,
        owner: &LogicalUser,
        messages: &[BackfillMessage],
        notify: bool,
    ) -> Result<BackfillReport> {
        let room_id = require_created(room)?;
        let owner_puppeted = self.resolver.has_double_puppet(owner).await;

        let events = messages
            .iter()
            .map(|msg| BatchEvent {
                sender: msg.sender.clone(),
                recipient: msg.recipient.clone(),
                content: msg.content.clone(),
                timestamp: msg.timestamp,
                double_puppeted: owner_puppeted && msg.sender == *owner.user_id(),
            })
            .collect();

        let request = BatchSendRequest {
            forward: true,
            forward_if_no_messages: true,
            send_notification: notify,
            mark_read_by: (!notify).then(|| owner.user_id().clone()),
            events,
        };

        let delivered = self
            .transport
            .send_batch(room_id, request)
            .await
            .map_err(|source| BridgeError::SendFailed {
                room: room_id.clone(),
                source,
            })?;

        info!(room = %room_id, count = delivered.len(), "Batch backfill complete");
        Ok(BackfillReport {
            path: BackfillPath::Batch,
            attempted: messages.len(),
            delivered,
            failed: Vec::new(),
            cancelled: false,
        })
    }

    async fn backfill_manual(
        &self,
        room: &Room,
        owner: &LogicalUser,
        messages: &[BackfillMessage],
        cancel: &CancellationToken,
    ) -> BackfillReport {
        let mut report = BackfillReport::new(BackfillPath::Manual);
        let mut owner_handle: Option<ActingHandle> = None;

        for (index, msg) in messages.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(room = %room.name, attempted = report.attempted, "Backfill cancelled");
                report.cancelled = true;
                break;
            }
            report.attempted += 1;

            let handle = if msg.sender == *owner.user_id() {
                if owner_handle.is_none() {
                    owner_handle = Some(self.resolver.resolve_acting_handle(owner).await);
                }
                owner_handle.clone()
            } else {
                self.resolver.resolve_room_ghost(room, &msg.sender)
            };

            let sent = match handle {
                Some(handle) => {
                    self.send_timestamped(room, &handle, &msg.content, msg.timestamp)
                        .await
                }
                None => Err(BridgeError::NoSender(msg.sender.clone())),
            };

            match sent {
                Ok(event_id) => report.delivered.push(event_id),
                Err(e) => {
                    warn!(room = %room.name, index, sender = %msg.sender, error = %e, "Backfill message failed");
                    report.failed.push(index);
                }
            }
        }

        info!(
            room = %room.name,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Manual backfill complete"
        );
        report
    }
}
