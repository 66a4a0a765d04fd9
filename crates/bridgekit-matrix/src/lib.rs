//! # bridgekit-matrix
//!
//! Identity resolution, room management and message delivery for the chat
//! network side of a bridge. All network access goes through the
//! [`Transport`] trait; [`InMemoryTransport`] implements it in-process.

pub mod delivery;
pub mod error;
pub mod ghost;
pub mod media;
pub mod memory;
pub mod resolver;
pub mod rooms;
pub mod transport;

pub use delivery::{BackfillPath, BackfillReport, DeliveryEngine};
pub use error::{BridgeError, Result};
pub use ghost::GhostRegistry;
pub use media::{HttpFetcher, MediaFetcher};
pub use memory::InMemoryTransport;
pub use resolver::IdentityResolver;
pub use rooms::{EncryptionSettings, RoomController, Rotation};
pub use transport::{
    BatchEvent, BatchSendRequest, CreateRoomRequest, CreatedRoom, StateEvent, Transport,
    TransportResult,
};
