//! Shadow-canvas materializer (spec §4.6)
//!
//! Folds an optional base state plus an ordered batch of events into a tile's
//! materialized [`NfTileState`] under Last-Write-Wins (for scalar fields) and
//! OR-Set (for links) semantics, with sticky tombstones for deleted nodes.

use std::collections::BTreeMap;
use tilecanvas_core::normalize::order_events;
use tilecanvas_core::{NfLink, NfNode, NfTileState, Operation, Segment, WorldEvent};

/// LWW tiebreak key: higher `(timestamp, event_id)` wins ties.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Tag {
    ts: i64,
    event_id: String,
}

impl Tag {
    /// The tag assigned to fields carried over from a loaded snapshot. Any
    /// genuine event in this fold has a real `(ts, event_id)` and is
    /// guaranteed to compare greater, so snapshot state is always
    /// superseded by new events touching the same field, the way a
    /// chronologically-later event should be.
    const BASELINE: Tag = Tag { ts: i64::MIN, event_id: String::new() };

    fn from_event(event: &WorldEvent) -> Tag {
        Tag { ts: event.timestamp, event_id: event.event_id.clone() }
    }
}

#[derive(Clone)]
struct WorkingLink {
    relation: String,
    to: String,
    add_tag: Tag,
}

#[derive(Clone)]
struct WorkingNode {
    node_id: String,
    kind: Option<String>,
    transform: serde_json::Value,
    transform_tag: Tag,
    properties: BTreeMap<String, (serde_json::Value, Tag)>,
    links: Vec<WorkingLink>,
    deleted: bool,
}

impl WorkingNode {
    fn bare(node_id: &str) -> Self {
        WorkingNode {
            node_id: node_id.to_string(),
            kind: None,
            transform: serde_json::Value::Null,
            transform_tag: Tag::BASELINE,
            properties: BTreeMap::new(),
            links: Vec::new(),
            deleted: false,
        }
    }

    fn from_snapshot(node: &NfNode) -> Self {
        let mut properties = BTreeMap::new();
        for (key, value) in &node.properties {
            properties.insert(key.clone(), (value.clone(), Tag::BASELINE));
        }
        let links = node
            .links
            .iter()
            .map(|link| WorkingLink {
                relation: link.relation.clone(),
                to: link.to.clone(),
                add_tag: Tag::BASELINE,
            })
            .collect();
        WorkingNode {
            node_id: node.node_id.clone(),
            kind: node.kind.clone(),
            transform: node.transform.clone(),
            transform_tag: Tag::BASELINE,
            properties,
            links,
            deleted: node.deleted.unwrap_or(false),
        }
    }

    fn set_transform(&mut self, transform: serde_json::Value, tag: Tag) {
        if tag >= self.transform_tag {
            self.transform = transform;
            self.transform_tag = tag;
        }
    }

    fn set_property(&mut self, key: String, value: serde_json::Value, tag: Tag) {
        match self.properties.get(&key) {
            Some((_, existing_tag)) if *existing_tag > tag => {}
            _ => {
                self.properties.insert(key, (value, tag));
            }
        }
    }

    fn into_nf_node(self) -> NfNode {
        let mut links: Vec<NfLink> = self
            .links
            .into_iter()
            .map(|l| NfLink { relation: l.relation, to: l.to })
            .collect();
        links.sort();
        links.dedup();
        NfNode {
            node_id: self.node_id,
            kind: self.kind,
            transform: self.transform,
            properties: self.properties.into_iter().map(|(k, (v, _))| (k, v)).collect(),
            links,
            deleted: if self.deleted { Some(true) } else { None },
        }
    }
}

struct Fold {
    nodes: BTreeMap<String, WorkingNode>,
}

impl Fold {
    fn new(base: Option<NfTileState>) -> Self {
        let mut nodes = BTreeMap::new();
        if let Some(state) = base {
            for node in &state.nodes {
                nodes.insert(node.node_id.clone(), WorkingNode::from_snapshot(node));
            }
        }
        Fold { nodes }
    }

    fn get_or_create(&mut self, node_id: &str) -> &mut WorkingNode {
        self.nodes
            .entry(node_id.to_string())
            .or_insert_with(|| WorkingNode::bare(node_id))
    }

    fn apply(&mut self, event: &WorldEvent) {
        let tag = Tag::from_event(event);
        match &event.operation {
            Operation::CreateNode { node_id, kind, transform, properties } => {
                if self.nodes.get(node_id).map(|n| n.deleted).unwrap_or(false) {
                    // Tombstone is sticky: a later create_node never revives a deleted node.
                    return;
                }
                let node = self.get_or_create(node_id);
                if kind.is_some() {
                    node.kind = kind.clone();
                }
                if !transform.is_null() {
                    node.set_transform(transform.clone(), tag.clone());
                }
                for (key, value) in properties {
                    node.set_property(key.clone(), value.clone(), tag.clone());
                }
            }
            Operation::UpdateTransform { node_id, transform } => {
                self.get_or_create(node_id).set_transform(transform.clone(), tag);
            }
            Operation::SetProperties { node_id, properties } => {
                let node = self.get_or_create(node_id);
                for (key, value) in properties {
                    node.set_property(key.clone(), value.clone(), tag.clone());
                }
            }
            Operation::LinkNodes { from, to, relation } => {
                let node = self.get_or_create(from);
                node.links.push(WorkingLink {
                    relation: relation.clone(),
                    to: to.clone(),
                    add_tag: tag,
                });
            }
            Operation::UnlinkNodes { from, to, relation } => {
                if let Some(node) = self.nodes.get_mut(from) {
                    node.links.retain(|link| {
                        let matches_target = &link.to == to;
                        let matches_relation = relation.as_ref().map_or(true, |r| r == &link.relation);
                        let observed = link.add_tag.ts <= event.timestamp;
                        !(matches_target && matches_relation && observed)
                    });
                }
            }
            Operation::DeleteNode { node_id } => {
                self.get_or_create(node_id).deleted = true;
            }
            Operation::Merge { sources, target } => {
                let mut merged_links = Vec::new();
                let mut merged_properties: Vec<(String, serde_json::Value, Tag)> = Vec::new();
                let mut merged_transform: Option<(serde_json::Value, Tag)> = None;
                for source_id in sources {
                    if source_id == target {
                        continue;
                    }
                    if let Some(mut source) = self.nodes.remove(source_id) {
                        merged_links.append(&mut source.links);
                        for (key, (value, tag)) in source.properties {
                            merged_properties.push((key, value, tag));
                        }
                        if source.transform_tag != Tag::BASELINE || !source.transform.is_null() {
                            merged_transform = Some(match merged_transform {
                                Some((v, t)) if t >= source.transform_tag => (v, t),
                                _ => (source.transform, source.transform_tag),
                            });
                        }
                        source.deleted = true;
                        self.nodes.insert(source_id.clone(), source);
                    }
                }
                let node = self.get_or_create(target);
                node.links.append(&mut merged_links);
                for (key, value, prop_tag) in merged_properties {
                    node.set_property(key, value, prop_tag);
                }
                if let Some((value, merge_tag)) = merged_transform {
                    node.set_transform(value, merge_tag);
                }
            }
        }
    }

    fn finish(self, tile_id: String) -> NfTileState {
        let nodes = self.nodes.into_values().map(WorkingNode::into_nf_node).collect();
        NfTileState { tile_id, nodes }
    }
}

/// Fold a base state (if any) plus a batch of events, in C3's deterministic
/// order, into a materialized [`NfTileState`]. `events` need not be
/// pre-sorted; this re-imposes `(timestamp, event_id)` order so callers can
/// pass segments' events directly.
pub fn fold_events(tile_id: &str, base: Option<NfTileState>, events: Vec<WorldEvent>) -> NfTileState {
    let ordered = order_events(events);
    let mut fold = Fold::new(base);
    for event in &ordered {
        fold.apply(event);
    }
    fold.finish(tile_id.to_string())
}

/// Fold a base state plus a list of segments given in root-to-tip (append)
/// order. Equivalent to flattening `segments` and calling [`fold_events`].
pub fn fold_segments(tile_id: &str, base: Option<NfTileState>, segments: &[Segment]) -> NfTileState {
    let events: Vec<WorldEvent> = segments.iter().flat_map(|s| s.events.iter().cloned()).collect();
    fold_events(tile_id, base, events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilecanvas_core::{Authority, Boundary, Layer, Policy, Realm, Scope};

    fn scope() -> Scope {
        Scope {
            realm: Realm::Team,
            authority: Authority::Source,
            boundary: Boundary::Interior,
            policy: Policy::Public,
        }
    }

    fn event(id: &str, ts: i64, op: Operation) -> WorldEvent {
        WorldEvent {
            event_id: id.into(),
            timestamp: ts,
            space_id: "demo".into(),
            tile: "z0/x0/y0".into(),
            layer_id: Layer::Layout,
            actor_id: "actor-1".into(),
            scope: scope(),
            preserves_invariants: vec![],
            previous_events: vec![],
            operation: op,
        }
    }

    fn create(id: &str, ts: i64, node: &str) -> WorldEvent {
        event(
            id,
            ts,
            Operation::CreateNode {
                node_id: node.into(),
                kind: None,
                transform: serde_json::Value::Null,
                properties: serde_json::Map::new(),
            },
        )
    }

    fn delete(id: &str, ts: i64, node: &str) -> WorldEvent {
        event(id, ts, Operation::DeleteNode { node_id: node.into() })
    }

    #[test]
    fn single_create_yields_one_node() {
        let state = fold_events("z0/x0/y0", None, vec![create("01A", 1000, "n1")]);
        assert_eq!(state.nodes.len(), 1);
        assert_eq!(state.nodes[0].node_id, "n1");
        assert_eq!(state.nodes[0].deleted, None);
    }

    #[test]
    fn tombstone_is_sticky_against_later_create() {
        let events = vec![
            create("01A", 1000, "n1"),
            delete("01B", 2000, "n1"),
            create("01C", 3000, "n1"),
        ];
        let state = fold_events("z0/x0/y0", None, events);
        assert_eq!(state.nodes.len(), 1);
        assert_eq!(state.nodes[0].deleted, Some(true));
    }

    #[test]
    fn link_then_unlink_in_either_causal_order_converges() {
        let link = event(
            "01A",
            1000,
            Operation::LinkNodes { from: "n1".into(), to: "n2".into(), relation: "near".into() },
        );
        let unlink = event(
            "01B",
            2000,
            Operation::UnlinkNodes { from: "n1".into(), to: "n2".into(), relation: Some("near".into()) },
        );
        let forward = fold_events("z0/x0/y0", None, vec![link.clone(), unlink.clone()]);
        let backward = fold_events("z0/x0/y0", None, vec![unlink, link]);
        assert_eq!(forward, backward);
        assert!(forward.nodes.iter().find(|n| n.node_id == "n1").unwrap().links.is_empty());
    }

    #[test]
    fn unlink_before_causally_later_add_does_not_remove_it() {
        let unlink = event(
            "01A",
            1000,
            Operation::UnlinkNodes { from: "n1".into(), to: "n2".into(), relation: None },
        );
        let link = event(
            "01B",
            2000,
            Operation::LinkNodes { from: "n1".into(), to: "n2".into(), relation: "near".into() },
        );
        let state = fold_events("z0/x0/y0", None, vec![unlink, link]);
        assert_eq!(state.nodes.iter().find(|n| n.node_id == "n1").unwrap().links.len(), 1);
    }

    #[test]
    fn merge_tombstones_sources_and_unions_links() {
        let events = vec![
            create("01A", 1000, "n1"),
            create("01B", 1001, "n2"),
            event(
                "01C",
                1002,
                Operation::LinkNodes { from: "n1".into(), to: "n3".into(), relation: "near".into() },
            ),
            event(
                "01D",
                1003,
                Operation::LinkNodes { from: "n2".into(), to: "n4".into(), relation: "near".into() },
            ),
            event("01E", 2000, Operation::Merge { sources: vec!["n1".into(), "n2".into()], target: "target".into() }),
        ];
        let state = fold_events("z0/x0/y0", None, events);
        let n1 = state.nodes.iter().find(|n| n.node_id == "n1").unwrap();
        let n2 = state.nodes.iter().find(|n| n.node_id == "n2").unwrap();
        let target = state.nodes.iter().find(|n| n.node_id == "target").unwrap();
        assert_eq!(n1.deleted, Some(true));
        assert_eq!(n2.deleted, Some(true));
        assert_eq!(target.links.len(), 2);
    }

    #[test]
    fn state_hash_is_independent_of_segment_partitioning() {
        use tilecanvas_core::normalize::state_hash;
        let events = vec![create("01A", 1000, "n1"), create("01B", 1001, "n2")];
        let whole = fold_events("z0/x0/y0", None, events.clone());
        let split_a = fold_events("z0/x0/y0", None, vec![events[0].clone()]);
        let split_b = fold_events("z0/x0/y0", Some(split_a), vec![events[1].clone()]);
        assert_eq!(state_hash(whole).unwrap(), state_hash(split_b).unwrap());
    }
}
