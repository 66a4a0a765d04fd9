use thiserror::Error;

use bridgekit_shared::types::{RoomId, UserId};
use bridgekit_shared::TransportError;

use crate::delivery::BackfillReport;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Transport unavailable during {action}: {source}")]
    TransportUnavailable {
        action: &'static str,
        source: TransportError,
    },

    /// Double-puppet setup was refused. Recovered locally by falling back to
    /// a ghost; only ever logged.
    #[error("Double-puppet setup denied for {user}: {source}")]
    SetupDenied { user: UserId, source: TransportError },

    #[error("Failed to create room '{room}': {source}")]
    CreateFailed { room: String, source: TransportError },

    #[error("Failed to set power levels in {room}: {source}")]
    PermissionsFailed { room: RoomId, source: TransportError },

    #[error("Failed to send message to {room}: {source}")]
    SendFailed { room: RoomId, source: TransportError },

    #[error("Failed to rename {ghost}: {source}")]
    RenameFailed { ghost: UserId, source: TransportError },

    #[error(
        "Backfill partially failed: {} of {} messages not delivered",
        .0.failed.len(),
        .0.attempted
    )]
    PartialFailure(BackfillReport),

    #[error("Failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Failed to upload media: {0}")]
    UploadFailed(TransportError),

    #[error("No handle can act for {0} in this room")]
    NoSender(UserId),

    #[error("Room '{0}' has not been created yet")]
    RoomNotCreated(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
