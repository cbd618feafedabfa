//! Error taxonomy (spec §7)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("core error: {0}")]
    Core(#[from] tilecanvas_core::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity error: object does not hash to {hash_ref}")]
    IntegrityError { hash_ref: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("tip conflict for {space}/{tile}")]
    TipConflict { space: String, tile: String },
    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),
    #[error("schema version mismatch: expected {expected}, saw {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, StoreError>;
