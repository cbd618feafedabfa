//! Normal-Form engine (spec §4.3)
//!
//! Normalizes individual events, imposes deterministic cross-event ordering,
//! prunes conservative no-ops, and produces the trace/state hashes that
//! declare two traces (or two materializations) semantically equivalent.

use crate::canonical::canonical_bytes;
use crate::error::Result;
use crate::hashing::{hash_json, HashRef};
use crate::types::{NfTileState, Operation, WorldEvent, ROOT_INVARIANTS};
use std::collections::BTreeSet;

/// Ensure `preserves_invariants` is the sorted union of the input and the
/// root invariants. Idempotent: `normalize_event(normalize_event(e)) ==
/// normalize_event(e)`.
pub fn normalize_event(mut event: WorldEvent) -> WorldEvent {
    let mut set: BTreeSet<_> = event.preserves_invariants.into_iter().collect();
    set.extend(ROOT_INVARIANTS.iter().copied());
    event.preserves_invariants = set.into_iter().collect();
    event
}

/// Deterministic ordering: primary key `timestamp` ASC, secondary key
/// `event_id` ASC lexicographically. Stable, and invariant under input
/// permutation.
pub fn order_events(mut events: Vec<WorldEvent>) -> Vec<WorldEvent> {
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.event_id.cmp(&b.event_id)));
    events
}

/// Conservative no-op pruning: drop a consecutive `update_transform` when the
/// prior retained event is also `update_transform` for the same `node_id`
/// with a canonical-JSON-equal `transform`. No other operation is pruned.
pub fn prune_noops(events: Vec<WorldEvent>) -> Vec<WorldEvent> {
    let mut out: Vec<WorldEvent> = Vec::with_capacity(events.len());
    for event in events {
        if let Operation::UpdateTransform { node_id, transform } = &event.operation {
            if let Some(prev) = out.last() {
                if let Operation::UpdateTransform {
                    node_id: prev_node,
                    transform: prev_transform,
                } = &prev.operation
                {
                    if prev_node == node_id && transforms_equal(prev_transform, transform) {
                        continue;
                    }
                }
            }
        }
        out.push(event);
    }
    out
}

fn transforms_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (canonical_bytes(a), canonical_bytes(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Normalize, order, and prune a raw event list, then hash the canonical
/// image of the result. Two traces with equal trace hash are declared
/// semantically equivalent.
pub fn trace_hash(events: Vec<WorldEvent>) -> Result<HashRef> {
    let normalized: Vec<WorldEvent> = events.into_iter().map(normalize_event).collect();
    let ordered = order_events(normalized);
    let pruned = prune_noops(ordered);
    hash_json(&pruned)
}

/// Normalize a materialized tile state: sort nodes by `node_id`, sort and
/// dedupe each node's links by `(relation, to)`, and collapse any `deleted:
/// false` to absent.
pub fn normalize_state(mut state: NfTileState) -> NfTileState {
    for node in &mut state.nodes {
        node.links.sort();
        node.links.dedup();
        if node.deleted == Some(false) {
            node.deleted = None;
        }
    }
    state.nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    state
}

/// `state_hash(s) = hash_json(normalize_state(s))`.
pub fn state_hash(state: NfTileState) -> Result<HashRef> {
    hash_json(&normalize_state(state))
}
