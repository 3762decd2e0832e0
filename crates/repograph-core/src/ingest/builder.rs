//! Graph delta construction.
//!
//! Compares a freshly resolved graph against the last committed snapshot
//! and produces the minimal delta: content hashes decide whether an
//! artifact changed, disappearance produces a tombstone, never a delete.

use std::collections::HashSet;

use crate::ingest::resolve::Resolution;
use crate::models::{Artifact, Edge};
use crate::store::GraphSnapshot;

/// Changes one run applies to the committed graph.
#[derive(Clone, Debug, Default)]
pub struct GraphDelta {
    pub added: Vec<Artifact>,
    pub updated: Vec<Artifact>,
    /// Canonical ids present in the snapshot but absent from this run.
    pub tombstoned: Vec<String>,
    pub edges_added: Vec<Edge>,
    pub edges_removed: Vec<Edge>,
}

impl GraphDelta {
    /// An empty delta means the run observed no change; committing it is a
    /// no-op apart from the run record.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.tombstoned.is_empty()
            && self.edges_added.is_empty()
            && self.edges_removed.is_empty()
    }
}

/// Diff a resolution against the prior snapshot.
///
/// An artifact is `updated` only when its content hash differs; a re-appearing
/// tombstoned id is simply `added` again (the snapshot hides tombstones). A
/// rename shows up as one tombstone plus one add, since identity is the
/// canonical id, not the content.
pub fn diff(resolution: &Resolution, snapshot: &GraphSnapshot) -> GraphDelta {
    let mut delta = GraphDelta::default();

    let mut seen: HashSet<&str> = HashSet::with_capacity(resolution.artifacts.len());
    for artifact in &resolution.artifacts {
        seen.insert(artifact.canonical_id.as_str());
        match snapshot.artifacts.get(&artifact.canonical_id) {
            None => delta.added.push(artifact.clone()),
            Some(prior) if prior.content_hash != artifact.content_hash => {
                delta.updated.push(artifact.clone());
            }
            // Same hash but a moved span still needs its provenance refreshed.
            Some(prior) if prior.provenance != artifact.provenance => {
                delta.updated.push(artifact.clone());
            }
            Some(_) => {}
        }
    }
    for id in snapshot.artifacts.keys() {
        if !seen.contains(id.as_str()) {
            delta.tombstoned.push(id.clone());
        }
    }

    let old_edges: HashSet<&Edge> = snapshot.edges.iter().collect();
    let new_edges: HashSet<&Edge> = resolution.edges.iter().collect();
    for edge in &resolution.edges {
        if !old_edges.contains(edge) {
            delta.edges_added.push(edge.clone());
        }
    }
    for edge in &snapshot.edges {
        if !new_edges.contains(edge) {
            delta.edges_removed.push(edge.clone());
        }
    }

    delta
}
