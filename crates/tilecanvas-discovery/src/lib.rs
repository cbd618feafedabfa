//! Tile Canvas Discovery
//!
//! The gossip-adjacent peer/tile-tip discovery graph (§4.7) and its
//! ingress validation layer (§4.8).

pub mod error;
pub mod graph;
pub mod ingress;
pub mod types;

pub use error::{DiscoveryError, Result};
pub use graph::{DiscoveryConfig, DiscoveryGraph};
pub use types::{GeoHint, Medium, PeerRecord, RssiHint, TileTipRecord, TipAdvert};
