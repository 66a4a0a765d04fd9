//! # bridgekit-shared
//!
//! Identifiers, message payloads, power-level maps and error types shared by
//! every bridgekit crate.

pub mod constants;
pub mod error;
pub mod power_levels;
pub mod protocol;
pub mod types;

pub use error::{IdentityError, TransportError};
pub use power_levels::PowerLevels;
pub use protocol::{BackfillMessage, MessageContent, MessageType, Relation};
pub use types::{ActingHandle, ContentUri, EventId, HandleKind, PermissionLevel, RoomId, UserId};
