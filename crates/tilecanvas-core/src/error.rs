//! Error types for the tile canvas core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types (canonical encoding, hashing, event validation, normalization)
#[derive(Debug, Error)]
pub enum Error {
    /// JSON parsing or serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value contained a non-finite number (NaN or +/-Infinity)
    #[error("non-finite number in canonical input")]
    NonFinite,

    /// An object contained the same key twice
    #[error("duplicate key in object: {0}")]
    DuplicateKey(String),

    /// A HashRef string did not match `<algo>:<hex>`
    #[error("malformed hash ref: {0}")]
    MalformedHashRef(String),

    /// A HashRef declared an algorithm we don't recognize
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgo(String),

    /// An event failed envelope or payload validation
    #[error("invalid event at {path}: {reason}")]
    InvalidEvent { path: String, reason: String },
}
