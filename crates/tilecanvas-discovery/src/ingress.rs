//! Tip-Advert ingress (spec §4.8)
//!
//! A thin validation layer in front of the Discovery Graph. It never touches
//! a network transport itself -- that is external to this crate.

use crate::error::{DiscoveryError, Result};
use crate::graph::DiscoveryGraph;
use crate::types::TipAdvert;

/// Forward `advert` to `graph`, unless it is self-originated. Schema
/// validity is already enforced by [`TipAdvert`]'s `Deserialize` impl
/// (a malformed `tip_segment` HashRef fails to parse before this is ever
/// called).
pub fn ingest(graph: &DiscoveryGraph, local_peer_id: &str, advert: TipAdvert) -> Result<()> {
    if advert.peer_id == local_peer_id {
        return Err(DiscoveryError::RejectedAdvert("advert originated from the local peer".to_string()));
    }
    graph.ingest_tip(advert)
}
