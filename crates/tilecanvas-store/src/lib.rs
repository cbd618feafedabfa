//! Tile Canvas Store
//!
//! Filesystem-backed content-addressed object store (§4.4) and the
//! per-tile append/flush/manifest/snapshot pipeline that sits on top of it
//! (§4.5).

pub mod error;
pub mod objects;
pub mod tile;

pub use error::{Result, StoreError};
pub use objects::ObjectStore;
pub use tile::{AppendOutcome, TileStore, TileStoreConfig};
