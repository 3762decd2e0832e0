//! Graph persistence.
//!
//! The pipeline talks to storage through the [`GraphStore`] trait so tests
//! and embedders can swap the SQLite backend for an in-memory one. A commit
//! applies a whole delta (plus its run record) atomically: readers observe
//! either the previous graph or the new one, never a half-applied run.

pub mod schema;
pub mod sqlite;

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::errors::GraphResult;
use crate::ingest::builder::GraphDelta;
use crate::models::{Artifact, Edge, RunStatus};

pub use sqlite::SqliteStore;

/// Live view of one repository's graph, as of the last committed run.
/// Tombstoned artifacts and their edges are excluded.
#[derive(Clone, Debug, Default)]
pub struct GraphSnapshot {
    /// Keyed by canonical id, in commit order.
    pub artifacts: IndexMap<String, Artifact>,
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.edges.is_empty()
    }
}

/// Summary row persisted per ingestion run, successful or not.
#[derive(Clone, Debug, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub repo_id: String,
    pub status: RunStatus,
    pub file_count: usize,
    pub artifact_count: usize,
    pub edge_count: usize,
    pub added_count: usize,
    pub updated_count: usize,
    pub tombstoned_count: usize,
    pub unresolved_count: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub elapsed_ms: u64,
    /// JSON-encoded errors and warnings, for post-hoc inspection.
    pub detail_json: String,
}

/// Storage backend for committed graphs.
pub trait GraphStore: Send + Sync {
    /// Load the live graph for a repository. An unknown repository yields an
    /// empty snapshot, which is what the first run of a repo diffs against.
    fn load_snapshot(&self, repo_id: &str) -> GraphResult<GraphSnapshot>;

    /// Apply a delta and its run record in one atomic step. On error the
    /// previous graph must remain fully intact.
    fn commit(&self, delta: &GraphDelta, run: &RunRecord) -> GraphResult<()>;

    /// Record a run that committed nothing (aborted or empty). Best-effort
    /// bookkeeping: the graph itself is untouched.
    fn record_run(&self, run: &RunRecord) -> GraphResult<()>;

    /// Physically delete tombstoned artifacts and any edges touching them.
    /// Returns the number of artifacts removed. Never runs implicitly.
    fn prune_tombstones(&self, repo_id: &str) -> GraphResult<usize>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryRepo {
    /// canonical id -> (artifact, tombstoned)
    artifacts: IndexMap<String, (Artifact, bool)>,
    edges: Vec<Edge>,
    runs: Vec<RunRecord>,
}

/// Heap-backed store used by tests and short-lived embedders.
#[derive(Debug, Default)]
pub struct MemoryStore {
    repos: RwLock<HashMap<String, MemoryRepo>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run records for one repository, in commit order.
    pub fn runs(&self, repo_id: &str) -> Vec<RunRecord> {
        self.repos
            .read()
            .get(repo_id)
            .map(|r| r.runs.clone())
            .unwrap_or_default()
    }
}

impl GraphStore for MemoryStore {
    fn load_snapshot(&self, repo_id: &str) -> GraphResult<GraphSnapshot> {
        let repos = self.repos.read();
        let Some(repo) = repos.get(repo_id) else {
            return Ok(GraphSnapshot::default());
        };
        let artifacts: IndexMap<String, Artifact> = repo
            .artifacts
            .iter()
            .filter(|(_, (_, tombstoned))| !tombstoned)
            .map(|(id, (artifact, _))| (id.clone(), artifact.clone()))
            .collect();
        let edges = repo
            .edges
            .iter()
            .filter(|e| {
                live_endpoint(&artifacts, &e.source_id) && live_endpoint(&artifacts, &e.target_id)
            })
            .cloned()
            .collect();
        Ok(GraphSnapshot { artifacts, edges })
    }

    fn commit(&self, delta: &GraphDelta, run: &RunRecord) -> GraphResult<()> {
        let mut repos = self.repos.write();
        let repo = repos.entry(run.repo_id.clone()).or_default();

        for artifact in delta.added.iter().chain(delta.updated.iter()) {
            repo.artifacts
                .insert(artifact.canonical_id.clone(), (artifact.clone(), false));
        }
        for id in &delta.tombstoned {
            if let Some(entry) = repo.artifacts.get_mut(id) {
                entry.1 = true;
            }
        }
        repo.edges.retain(|e| !delta.edges_removed.contains(e));
        for edge in &delta.edges_added {
            if !repo.edges.contains(edge) {
                repo.edges.push(edge.clone());
            }
        }
        repo.runs.push(run.clone());
        Ok(())
    }

    fn record_run(&self, run: &RunRecord) -> GraphResult<()> {
        let mut repos = self.repos.write();
        repos
            .entry(run.repo_id.clone())
            .or_default()
            .runs
            .push(run.clone());
        Ok(())
    }

    fn prune_tombstones(&self, repo_id: &str) -> GraphResult<usize> {
        let mut repos = self.repos.write();
        let Some(repo) = repos.get_mut(repo_id) else {
            return Ok(0);
        };
        let before = repo.artifacts.len();
        let dead: Vec<String> = repo
            .artifacts
            .iter()
            .filter(|(_, (_, tombstoned))| *tombstoned)
            .map(|(id, _)| id.clone())
            .collect();
        repo.artifacts.retain(|_, (_, tombstoned)| !*tombstoned);
        repo.edges
            .retain(|e| !dead.contains(&e.source_id) && !dead.contains(&e.target_id));
        Ok(before - repo.artifacts.len())
    }
}

/// Placeholder targets (`external:*`) have no artifact row; an edge endpoint
/// is live when it is either a live artifact or not an artifact at all.
fn live_endpoint(artifacts: &IndexMap<String, Artifact>, id: &str) -> bool {
    artifacts.contains_key(id) || id.starts_with(crate::models::EXTERNAL_PREFIX)
}
