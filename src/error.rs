//! Error types for assignq.

use thiserror::Error;

use crate::model::{ItemId, ItemState};

#[derive(Debug, Error)]
pub enum Error {
    /// Referenced item, actor, or content key does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Storage-layer failure in the ledger backend.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Constraint violation detected by a ledger backend.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Blob storage failure in the content store.
    #[error("content storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Ledger and content store disagree. Never auto-healed.
    #[error("consistency fault: {0}")]
    ConsistencyFault(String),

    #[error("invalid state transition for item {id}: {from} -> {to}")]
    InvalidTransition {
        id: ItemId,
        from: ItemState,
        to: ItemState,
    },

    /// Caller supplied a value the service refuses outright.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Status code the routing layer reports for this failure.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,
            Error::NotFound(_) => 404,
            Error::Constraint(_) | Error::InvalidTransition { .. } => 409,
            Error::Persistence(_) => 503,
            _ => 500,
        }
    }

    /// Whether the caller may retry the whole operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
