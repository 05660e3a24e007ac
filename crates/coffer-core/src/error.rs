//! Core Error Types
//!
//! Errors that can occur while parsing object ids or decoding framed record
//! streams. Engine-level errors (storage, crypto, ...) live in `coffer-repo`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed object id: {0}")]
    MalformedObjectId(String),

    #[error("malformed record stream: {0}")]
    MalformedStream(String),
}
