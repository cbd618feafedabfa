//! Event validator (spec §4.2)
//!
//! Pure, allocation-cheap checks of envelope shape and operation-payload
//! shape. Validation never inserts root invariants -- that normalization
//! step belongs to [`crate::normalize`].

use crate::error::{Error, Result};
use crate::types::{Operation, WorldEvent};

fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Error {
    Error::InvalidEvent {
        path: path.into(),
        reason: reason.into(),
    }
}

fn require_nonempty(path: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(path, "identifier must be non-empty"));
    }
    Ok(())
}

/// Validate one event's envelope and operation payload. Returns `Ok(())` or
/// the first violation found.
pub fn validate_event(event: &WorldEvent) -> Result<()> {
    require_nonempty("event_id", &event.event_id)?;
    require_nonempty("space_id", &event.space_id)?;
    require_nonempty("tile", &event.tile)?;
    require_nonempty("actor_id", &event.actor_id)?;

    for (i, prev) in event.previous_events.iter().enumerate() {
        require_nonempty(&format!("previous_events[{i}]"), prev)?;
    }

    validate_operation(&event.operation)
}

fn validate_operation(operation: &Operation) -> Result<()> {
    match operation {
        Operation::CreateNode { node_id, .. }
        | Operation::UpdateTransform { node_id, .. }
        | Operation::SetProperties { node_id, .. }
        | Operation::DeleteNode { node_id } => require_nonempty("node_id", node_id),
        Operation::LinkNodes { from, to, relation } => {
            require_nonempty("link.from", from)?;
            require_nonempty("link.to", to)?;
            require_nonempty("link.relation", relation)
        }
        Operation::UnlinkNodes { from, to, relation } => {
            require_nonempty("link.from", from)?;
            require_nonempty("link.to", to)?;
            if let Some(relation) = relation {
                require_nonempty("link.relation", relation)?;
            }
            Ok(())
        }
        Operation::Merge { sources, target } => {
            if sources.is_empty() {
                return Err(invalid("merge.sources", "must name at least one source node"));
            }
            for (i, source) in sources.iter().enumerate() {
                require_nonempty(&format!("merge.sources[{i}]"), source)?;
            }
            require_nonempty("merge.target", target)
        }
    }
}

/// Validate a whole batch; used by the tile store's all-or-nothing append
/// pipeline (spec §4.5 step 1). Returns the index of the first invalid event
/// on failure.
pub fn validate_batch(events: &[WorldEvent]) -> Result<()> {
    for (index, event) in events.iter().enumerate() {
        validate_event(event).map_err(|err| match err {
            Error::InvalidEvent { path, reason } => Error::InvalidEvent {
                path: format!("events[{index}].{path}"),
                reason,
            },
            other => other,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Authority, Boundary, Layer, Policy, Realm, Scope};

    fn scope() -> Scope {
        Scope {
            realm: Realm::Team,
            authority: Authority::Source,
            boundary: Boundary::Interior,
            policy: Policy::Public,
        }
    }

    fn base_event() -> WorldEvent {
        WorldEvent {
            event_id: "01ARZ3".into(),
            timestamp: 1000,
            space_id: "demo".into(),
            tile: "z0/x0/y0".into(),
            layer_id: Layer::Layout,
            actor_id: "actor-1".into(),
            scope: scope(),
            preserves_invariants: vec![],
            previous_events: vec![],
            operation: Operation::CreateNode {
                node_id: "n1".into(),
                kind: None,
                transform: serde_json::Value::Null,
                properties: serde_json::Map::new(),
            },
        }
    }

    #[test]
    fn accepts_well_formed_event() {
        assert!(validate_event(&base_event()).is_ok());
    }

    #[test]
    fn rejects_empty_event_id() {
        let mut event = base_event();
        event.event_id = "".into();
        assert!(validate_event(&event).is_err());
    }

    #[test]
    fn rejects_empty_node_id() {
        let mut event = base_event();
        event.operation = Operation::UpdateTransform {
            node_id: "  ".into(),
            transform: serde_json::Value::Null,
        };
        assert!(validate_event(&event).is_err());
    }

    #[test]
    fn rejects_merge_with_no_sources() {
        let mut event = base_event();
        event.operation = Operation::Merge {
            sources: vec![],
            target: "n1".into(),
        };
        assert!(validate_event(&event).is_err());
    }

    #[test]
    fn batch_error_is_indexed() {
        let mut bad = base_event();
        bad.event_id = "".into();
        let batch = vec![base_event(), bad];
        let err = validate_batch(&batch).unwrap_err();
        match err {
            Error::InvalidEvent { path, .. } => assert!(path.starts_with("events[1]")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
