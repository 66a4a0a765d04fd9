use thiserror::Error;

use bridgekit_matrix::BridgeError;
use bridgekit_shared::types::{RoomId, UserId};
use bridgekit_shared::IdentityError;
use bridgekit_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("State snapshot error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Unknown command '{0}'. Use `help` to list commands.")]
    UnknownCommand(String),

    #[error("You are not allowed to use this command")]
    NotPermitted,

    #[error("Usage: {0}")]
    Usage(String),

    #[error("Unknown room: {0}")]
    UnknownRoom(RoomId),

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),
}

pub type Result<T> = std::result::Result<T, ServerError>;
