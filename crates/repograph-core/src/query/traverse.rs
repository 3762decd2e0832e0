//! Bounded breadth-first traversal over a committed snapshot.
//!
//! Traversal is read-only and restartable: each call loads the last
//! committed snapshot and walks it from scratch, so results never observe
//! an in-progress ingestion run. Cycles terminate via a visited set keyed
//! by canonical id.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;

use crate::errors::{GraphResult, RepoGraphError};
use crate::models::{Artifact, EdgeKind, EXTERNAL_PREFIX};
use crate::query::guards::{clamp_depth, MAX_GRAPH_EDGES, MAX_GRAPH_VISITED};
use crate::store::{GraphSnapshot, GraphStore};

/// Which way edges are followed relative to their direction in the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Both,
}

/// One traversal request. An empty `edge_kinds` set means every kind.
#[derive(Clone, Debug)]
pub struct TraverseRequest {
    pub repo_id: String,
    pub start_canonical_id: String,
    pub edge_kinds: Vec<EdgeKind>,
    pub max_depth: i64,
    pub direction: Direction,
}

/// One reached artifact, with the shortest path that reached it.
#[derive(Clone, Debug, PartialEq)]
pub struct TraversalHit {
    pub artifact: Artifact,
    /// Canonical ids from the start node to this artifact, inclusive.
    pub path: Vec<String>,
    pub depth: usize,
}

/// Walk a snapshot breadth-first from a start artifact.
///
/// Hits come back in shortest-path-first order, the start node itself at
/// depth 0. Placeholder targets (`external:*`) terminate their branch: they
/// are never expanded and never produce a hit.
pub fn traverse(snapshot: &GraphSnapshot, request: &TraverseRequest) -> GraphResult<Vec<TraversalHit>> {
    if !snapshot.artifacts.contains_key(&request.start_canonical_id) {
        return Err(RepoGraphError::Query(format!(
            "unknown start artifact: {}",
            request.start_canonical_id
        )));
    }
    let max_depth = clamp_depth(request.max_depth) as usize;

    let adjacency = build_adjacency(snapshot, request);

    let mut hits: Vec<TraversalHit> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<(String, Vec<String>, usize)> = VecDeque::new();
    let mut edges_scanned = 0usize;

    visited.insert(request.start_canonical_id.as_str());
    queue.push_back((
        request.start_canonical_id.clone(),
        vec![request.start_canonical_id.clone()],
        0,
    ));

    while let Some((id, path, depth)) = queue.pop_front() {
        // The id is guaranteed present: only declared artifacts are enqueued.
        if let Some(artifact) = snapshot.artifacts.get(&id) {
            hits.push(TraversalHit {
                artifact: artifact.clone(),
                path: path.clone(),
                depth,
            });
        }
        if depth == max_depth || visited.len() >= MAX_GRAPH_VISITED {
            continue;
        }

        let Some(neighbors) = adjacency.get(id.as_str()) else {
            continue;
        };
        for next in neighbors {
            edges_scanned += 1;
            if edges_scanned > MAX_GRAPH_EDGES {
                tracing::warn!(
                    repo_id = %request.repo_id,
                    start = %request.start_canonical_id,
                    "traversal edge cap reached, truncating"
                );
                return Ok(hits);
            }
            if next.starts_with(EXTERNAL_PREFIX) {
                continue;
            }
            if visited.contains(next.as_str()) {
                continue;
            }
            visited.insert(next.as_str());
            let mut next_path = path.clone();
            next_path.push(next.to_string());
            queue.push_back((next.to_string(), next_path, depth + 1));
        }
    }

    Ok(hits)
}

fn admits(request: &TraverseRequest, kind: EdgeKind) -> bool {
    request.edge_kinds.is_empty() || request.edge_kinds.contains(&kind)
}

/// Adjacency lists for the requested edge kinds and direction, in snapshot
/// edge order so traversal output is deterministic.
fn build_adjacency<'a>(
    snapshot: &'a GraphSnapshot,
    request: &TraverseRequest,
) -> IndexMap<&'a str, Vec<&'a String>> {
    let mut adjacency: IndexMap<&str, Vec<&String>> = IndexMap::new();
    for edge in &snapshot.edges {
        if !admits(request, edge.kind) {
            continue;
        }
        if matches!(request.direction, Direction::Forward | Direction::Both) {
            adjacency
                .entry(edge.source_id.as_str())
                .or_default()
                .push(&edge.target_id);
        }
        if matches!(request.direction, Direction::Backward | Direction::Both) {
            adjacency
                .entry(edge.target_id.as_str())
                .or_default()
                .push(&edge.source_id);
        }
    }
    adjacency
}

/// Read-side facade over a [`GraphStore`].
pub struct QueryEngine<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// Load the committed snapshot for the request's repository and traverse
    /// it. Stateless across calls.
    pub fn traverse(&self, request: &TraverseRequest) -> GraphResult<Vec<TraversalHit>> {
        let snapshot = self.store.load_snapshot(&request.repo_id)?;
        traverse(&snapshot, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtifactKind, Edge, Provenance, Span};
    use indexmap::IndexMap as Map;

    fn artifact(id: &str) -> Artifact {
        Artifact {
            repo_id: "r".to_string(),
            canonical_id: id.to_string(),
            kind: ArtifactKind::Function,
            name: id.to_string(),
            content_hash: "h".to_string(),
            provenance: Provenance {
                file_path: "m.py".to_string(),
                span: Span::default(),
                extractor_version: "1".to_string(),
            },
        }
    }

    fn snapshot(ids: &[&str], edges: Vec<Edge>) -> GraphSnapshot {
        GraphSnapshot {
            artifacts: ids
                .iter()
                .map(|id| (id.to_string(), artifact(id)))
                .collect::<Map<_, _>>(),
            edges,
        }
    }

    fn request(start: &str, depth: i64, direction: Direction) -> TraverseRequest {
        TraverseRequest {
            repo_id: "r".to_string(),
            start_canonical_id: start.to_string(),
            edge_kinds: Vec::new(),
            max_depth: depth,
            direction,
        }
    }

    fn chain() -> GraphSnapshot {
        snapshot(
            &["a", "b", "c"],
            vec![
                Edge::new(EdgeKind::Calls, "a", "b"),
                Edge::new(EdgeKind::Calls, "b", "c"),
            ],
        )
    }

    #[test]
    fn unknown_start_is_an_error() {
        let err = traverse(&chain(), &request("nope", 2, Direction::Forward)).unwrap_err();
        assert!(matches!(err, RepoGraphError::Query(_)));
    }

    #[test]
    fn forward_traversal_is_breadth_first() {
        let hits = traverse(&chain(), &request("a", 6, Direction::Forward)).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.artifact.canonical_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(hits[2].path, vec!["a", "b", "c"]);
        assert_eq!(hits[2].depth, 2);
    }

    #[test]
    fn depth_limits_are_honored() {
        let hits = traverse(&chain(), &request("a", 1, Direction::Forward)).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.artifact.canonical_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn absurd_depth_is_clamped_not_rejected() {
        let hits = traverse(&chain(), &request("a", i64::MAX, Direction::Forward)).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn backward_traversal_reverses_edges() {
        let hits = traverse(&chain(), &request("c", 6, Direction::Backward)).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.artifact.canonical_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn cycles_terminate() {
        let cyclic = snapshot(
            &["a", "b"],
            vec![
                Edge::new(EdgeKind::Calls, "a", "b"),
                Edge::new(EdgeKind::Calls, "b", "a"),
            ],
        );
        let hits = traverse(&cyclic, &request("a", 6, Direction::Both)).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn edge_kind_filter_applies() {
        let mixed = snapshot(
            &["a", "b", "c"],
            vec![
                Edge::new(EdgeKind::Calls, "a", "b"),
                Edge::new(EdgeKind::Imports, "a", "c"),
            ],
        );
        let mut req = request("a", 6, Direction::Forward);
        req.edge_kinds = vec![EdgeKind::Calls];
        let hits = traverse(&mixed, &req).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.artifact.canonical_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn external_placeholders_are_not_expanded() {
        let with_external = snapshot(
            &["a"],
            vec![Edge::new(
                EdgeKind::UnresolvedReference,
                "a",
                "external:requests.get",
            )],
        );
        let hits = traverse(&with_external, &request("a", 6, Direction::Forward)).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn edge_cap_truncates_dense_graphs() {
        let mut artifacts: Map<String, Artifact> = Map::new();
        artifacts.insert("hub".to_string(), artifact("hub"));
        let mut edges = Vec::new();
        for i in 0..=MAX_GRAPH_EDGES {
            let id = format!("n{i}");
            artifacts.insert(id.clone(), artifact(&id));
            edges.push(Edge::new(EdgeKind::Calls, "hub", id));
        }
        let snap = GraphSnapshot { artifacts, edges };
        let hits = traverse(&snap, &request("hub", 6, Direction::Forward)).unwrap();
        // Scanning stops at the cap before any neighbor is popped.
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].artifact.canonical_id, "hub");
    }

    #[test]
    fn visited_cap_stops_expansion() {
        let fanout = MAX_GRAPH_VISITED + 100;
        let mut artifacts: Map<String, Artifact> = Map::new();
        artifacts.insert("root".to_string(), artifact("root"));
        let mut edges = Vec::new();
        for i in 0..fanout {
            let child = format!("c{i}");
            let grandchild = format!("g{i}");
            artifacts.insert(child.clone(), artifact(&child));
            artifacts.insert(grandchild.clone(), artifact(&grandchild));
            edges.push(Edge::new(EdgeKind::Calls, "root", child.clone()));
            edges.push(Edge::new(EdgeKind::Calls, child, grandchild));
        }
        let snap = GraphSnapshot { artifacts, edges };
        let hits = traverse(&snap, &request("root", 6, Direction::Forward)).unwrap();
        // Children land before the cap; grandchildren are never expanded.
        assert_eq!(hits.len(), fanout + 1);
        assert!(hits.iter().all(|h| !h.artifact.canonical_id.starts_with('g')));
    }

    #[test]
    fn traversal_is_restartable() {
        let snap = chain();
        let req = request("a", 6, Direction::Forward);
        let first = traverse(&snap, &req).unwrap();
        let second = traverse(&snap, &req).unwrap();
        assert_eq!(first, second);
    }
}
