//! Core protocol types (spec §3)
//!
//! Field order matters: canonical encoding hashes the JSON serialization of
//! these types directly, so adding or reordering `#[serde]` output changes
//! every downstream hash.

use crate::hashing::HashRef;
use serde::{Deserialize, Serialize};

/// The closed set of root invariants every stored event must preserve.
pub const ROOT_INVARIANTS: &[Invariant] = &[
    Invariant::Adjacency,
    Invariant::Exclusion,
    Invariant::Consistency,
    Invariant::BoundaryDiscipline,
    Invariant::AuthorityNontransfer,
];

/// A symbol from the closed root-invariant set.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Invariant {
    Adjacency,
    Exclusion,
    Consistency,
    BoundaryDiscipline,
    AuthorityNontransfer,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Realm {
    Personal,
    Team,
    Public,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    Source,
    Derived,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    Interior,
    Boundary,
    Exterior,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Public,
    Private,
    Redacted,
}

/// Advisory scope metadata. The core checks only that it is well-formed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    pub realm: Realm,
    pub authority: Authority,
    pub boundary: Boundary,
    pub policy: Policy,
}

/// The layer an event belongs to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Layout,
    Physics,
    Presentation,
    Meta,
}

/// A single `{relation, to}` edge in a node's OR-Set link collection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct NfLink {
    pub relation: String,
    pub to: String,
}

/// A materialized node in a tile's shadow-canvas state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct NfNode {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub transform: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<NfLink>,
    /// Either `true` or absent; a materializer must never serialize `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

/// The materialized view of a tile: `{tile_id, nodes}` canonicalized per §4.3.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct NfTileState {
    pub tile_id: String,
    pub nodes: Vec<NfNode>,
}

/// A content-addressed snapshot of a tile's state at a specific event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub at_event: String,
    pub state: NfTileState,
}

/// The tagged-variant operation payload (DESIGN NOTE: re-architected from the
/// source's loosely-typed event objects into an exhaustive case match).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    CreateNode {
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        transform: serde_json::Value,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        properties: serde_json::Map<String, serde_json::Value>,
    },
    UpdateTransform {
        node_id: String,
        transform: serde_json::Value,
    },
    SetProperties {
        node_id: String,
        properties: serde_json::Map<String, serde_json::Value>,
    },
    LinkNodes {
        from: String,
        to: String,
        relation: String,
    },
    UnlinkNodes {
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relation: Option<String>,
    },
    DeleteNode {
        node_id: String,
    },
    Merge {
        sources: Vec<String>,
        target: String,
    },
}

impl Operation {
    /// The node this operation primarily targets, used by C5's
    /// space/tile-membership and no-op-pruning checks.
    pub fn primary_node_id(&self) -> &str {
        match self {
            Operation::CreateNode { node_id, .. }
            | Operation::UpdateTransform { node_id, .. }
            | Operation::SetProperties { node_id, .. }
            | Operation::DeleteNode { node_id } => node_id,
            Operation::LinkNodes { from, .. } | Operation::UnlinkNodes { from, .. } => from,
            Operation::Merge { target, .. } => target,
        }
    }
}

/// The full event envelope (spec §3 WorldEvent).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorldEvent {
    pub event_id: String,
    pub timestamp: i64,
    pub space_id: String,
    pub tile: String,
    pub layer_id: Layer,
    pub actor_id: String,
    pub scope: Scope,
    pub preserves_invariants: Vec<Invariant>,
    #[serde(default)]
    pub previous_events: Vec<String>,
    #[serde(flatten)]
    pub operation: Operation,
}

/// An immutable, hash-identified, ordered batch of events for a tile.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub hash: HashRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<HashRef>,
    pub events: Vec<WorldEvent>,
    pub created_at_ms: i64,
}

/// Byte image of a segment's events, used to compute [`Segment::hash`] --
/// the hash covers exactly these bytes, excluding the `hash` field itself.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentBody {
    pub events: Vec<WorldEvent>,
}

/// One entry in a tile's append-order manifest.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub segment_hash: HashRef,
    pub first_event_id: String,
    pub last_event_id: String,
    pub event_count: usize,
}

/// The tip index for one (space, tile): `{tip, snapshot?, updated_at_ms}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TileTipIndex {
    /// Latest segment hash, or the `GENESIS` sentinel string.
    pub tip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<HashRef>,
    pub updated_at_ms: i64,
}
