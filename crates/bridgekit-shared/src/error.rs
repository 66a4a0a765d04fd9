use thiserror::Error;

/// Failure of a call across the transport boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Remote service unavailable: {0}")]
    Unavailable(String),

    #[error("Request denied: {0}")]
    Denied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("{0} is already set")]
    AlreadySet(&'static str),

    #[error("Mismatching user id: expected {expected}, got {got}")]
    Mismatch { expected: String, got: String },
}
