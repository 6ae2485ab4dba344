//! Reconciliation of a local and a remote session document.
//!
//! Last-write-wins per entity by `updatedAt`, with tombstones taking
//! precedence over any edit they are at least as new as. The result only
//! depends on the two inputs, not on which side is "local":
//!
//! ```text
//! tombstones = max(local, remote) per id
//! candidates = local ∪ remote, minus anything a tombstone covers
//! winner     = greatest updatedAt per id, ties by serialized content
//! edges      = winners minus edges with a tombstoned endpoint
//! ```

use crate::entities::{Edge, Entity, EntityKind};
use crate::session::{SessionState, canonicalize};
use crate::tombstones::Tombstones;
use std::cmp::Ordering;

/// Merge two session documents.
pub fn merge_session_state(local: &SessionState, remote: &SessionState) -> SessionState {
    let tombstones = local.tombstones.merge(&remote.tombstones);

    let edges = merge_items(&local.edges, &remote.edges, &tombstones)
        .into_iter()
        .filter(|edge| !edge_is_dead(edge, &tombstones))
        .collect();

    let mut merged = SessionState {
        nodes: merge_items(&local.nodes, &remote.nodes, &tombstones),
        edges,
        drawings: merge_items(&local.drawings, &remote.drawings, &tombstones),
        text_boxes: merge_items(&local.text_boxes, &remote.text_boxes, &tombstones),
        comments: merge_items(&local.comments, &remote.comments, &tombstones),
        layers: merge_items(&local.layers, &remote.layers, &tombstones),
        stacks: merge_items(&local.stacks, &remote.stacks, &tombstones),
        tombstones,
    };
    merged.ensure_default_layer();

    log::debug!(
        "merged session: {} nodes, {} edges, {} tombstones",
        merged.nodes.len(),
        merged.edges.len(),
        merged.tombstones.len()
    );
    merged
}

fn merge_items<T: Entity>(local: &[T], remote: &[T], tombstones: &Tombstones) -> Vec<T> {
    canonicalize(
        local
            .iter()
            .chain(remote)
            .filter(|item| !tombstones.suppresses(T::KIND, item.id(), item.updated_at()))
            .cloned(),
    )
}

/// An edge is dead once either endpoint was deleted at or after the edge's
/// own last edit. Edges whose endpoints are merely absent are kept.
pub fn edge_is_dead(edge: &Edge, tombstones: &Tombstones) -> bool {
    tombstones.suppresses(EntityKind::Node, &edge.source, edge.updated_at)
        || tombstones.suppresses(EntityKind::Node, &edge.target, edge.updated_at)
}

/// Whether `candidate` should replace `incumbent` (same id).
///
/// Greater `updatedAt` wins. Equal stamps fall back to comparing the
/// serialized JSON so that the choice is a total order independent of which
/// side each copy came from.
pub(crate) fn newer<T: Entity>(candidate: &T, incumbent: &T) -> bool {
    match candidate.updated_at().cmp(&incumbent.updated_at()) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match (serde_json::to_string(candidate), serde_json::to_string(incumbent)) {
            (Ok(a), Ok(b)) => a > b,
            _ => false,
        },
    }
}
