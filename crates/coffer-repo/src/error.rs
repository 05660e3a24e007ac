//! Engine Error Types
//!
//! One discriminant per failure class of the object pipeline. `NotFound` is
//! peeled off storage errors because the dedupe path treats it as an
//! ordinary answer ("not there yet") while every other storage failure
//! leaves the block in an indeterminate state and aborts the write.
//!
//! All operations return `Result<T>`, aliased below, so errors propagate
//! with `?` and none are swallowed along the way.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(object_store::Error),

    #[error("block not found: {block}")]
    NotFound { block: String },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("invalid checksum for block {block}")]
    IntegrityMismatch { block: String },

    #[error(transparent)]
    Malformed(#[from] coffer_core::Error),

    #[error("invalid seek to negative offset")]
    InvalidSeek,

    #[error("repository is already initialized")]
    AlreadyInitialized,

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Maps a raw storage error for `block`, turning the store's NotFound
    /// into the engine's distinguished variant.
    pub(crate) fn from_store(block: &str, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => Error::NotFound {
                block: block.to_string(),
            },
            other => Error::Storage(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
