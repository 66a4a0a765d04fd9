//! # bridgekit-store
//!
//! In-memory state of the bridge: the per-user identity bindings consulted
//! on every room action, and the keyed users/rooms database that can be
//! snapshotted to a single JSON document.

pub mod identity;
pub mod models;
pub mod snapshot;

mod error;

pub use error::StoreError;
pub use identity::{IdentityBinding, IdentityStore, ResolutionState, SharedBinding};
pub use models::*;
pub use snapshot::MemDb;
