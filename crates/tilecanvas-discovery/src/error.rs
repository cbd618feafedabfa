//! Error taxonomy (spec §7)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("core error: {0}")]
    Core(#[from] tilecanvas_core::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),
    #[error("advert rejected: {0}")]
    RejectedAdvert(String),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
