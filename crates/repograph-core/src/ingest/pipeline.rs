//! Ingestion orchestration: Discover, Extract, Resolve, Build, Commit.
//!
//! Extraction fans out across a Rayon pool (each file's parse is
//! independent) and results are gathered back in walker order, so worker
//! count never affects output. Resolution onward is single-threaded per
//! run. Runs against the same repository are serialized through a per-repo
//! advisory lock; different repositories proceed independently.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::errors::{GraphResult, RepoGraphError};
use crate::ingest::builder::{diff, GraphDelta};
use crate::ingest::extract::{extract_file, SymbolTree};
use crate::ingest::resolve::{resolve, Resolution};
use crate::ingest::walker::{walk, SourceFile, WalkPolicy};
use crate::models::{ExtractionError, RunError, RunStatus, RunWarning};
use crate::store::{GraphStore, RunRecord};

/// One ingestion request from the embedding layer.
#[derive(Clone, Debug)]
pub struct IngestRequest {
    pub repo_id: String,
    pub root_path: PathBuf,
    pub policy: WalkPolicy,
    pub workers: usize,
}

impl IngestRequest {
    pub fn new(repo_id: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_id: repo_id.into(),
            root_path: root_path.into(),
            policy: WalkPolicy::default(),
            workers: 4,
        }
    }
}

/// Final report of one run. Every failure class the run encountered is
/// enumerated here; nothing is silently discarded.
#[derive(Clone, Debug)]
pub struct IngestReport {
    pub run_id: String,
    pub repo_id: String,
    pub status: RunStatus,
    pub file_count: usize,
    pub artifact_count: usize,
    pub edge_count: usize,
    pub added: usize,
    pub updated: usize,
    pub tombstoned: usize,
    pub unresolved_references: usize,
    pub errors: Vec<RunError>,
    pub warnings: Vec<RunWarning>,
    pub elapsed_ms: u64,
}

// Per-repo advisory locks. Two runs against the same repo_id serialize
// here; the map only ever grows by one small mutex per distinct repo.
static REPO_LOCKS: LazyLock<Mutex<HashMap<String, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn repo_lock(repo_id: &str) -> Arc<Mutex<()>> {
    REPO_LOCKS
        .lock()
        .entry(repo_id.to_string())
        .or_default()
        .clone()
}

/// Extract all files on a bounded Rayon pool, preserving walker order.
fn parallel_extract(
    files: &[SourceFile],
    workers: usize,
) -> Vec<Result<SymbolTree, ExtractionError>> {
    if files.is_empty() {
        return vec![];
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();

    match pool {
        Ok(pool) => pool.install(|| files.par_iter().map(extract_file).collect()),
        Err(_) => {
            // Fallback to sequential
            files.iter().map(extract_file).collect()
        }
    }
}

/// Drives runs end to end against a [`GraphStore`].
pub struct Ingestor<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// Execute one run. Recoverable problems land in the report; the
    /// `Err` branch is reserved for caller mistakes (bad root path) and
    /// store read failures.
    pub fn ingest(&self, request: &IngestRequest) -> GraphResult<IngestReport> {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(repo_id = %request.repo_id, run_id = %run_id, "ingestion run started");

        let lock = repo_lock(&request.repo_id);
        let _guard = lock.lock();

        // Discover
        let (files, mut warnings) = walk(&request.root_path, &request.policy)?;
        let file_count = files.len();

        // Extract
        let mut errors: Vec<RunError> = Vec::new();
        let mut trees: Vec<SymbolTree> = Vec::with_capacity(files.len());
        for result in parallel_extract(&files, request.workers) {
            match result {
                Ok(tree) => trees.push(tree),
                Err(err) => {
                    tracing::warn!(path = %err.path, reason = %err.reason, "file skipped");
                    errors.push(RunError::Extraction(err));
                }
            }
        }
        if file_count > 0 && trees.is_empty() {
            tracing::error!(repo_id = %request.repo_id, "every file failed extraction, aborting");
            return Ok(self.finish_aborted(request, run_id, started, file_count, errors, warnings));
        }

        // Resolve
        let resolution = match resolve(&request.repo_id, &trees) {
            Ok(resolution) => resolution,
            Err(RepoGraphError::IdentityConflict {
                canonical_id,
                first_path,
                first_span,
                second_path,
                second_span,
            }) => {
                errors.push(RunError::IdentityConflict {
                    canonical_id,
                    first_path,
                    first_span,
                    second_path,
                    second_span,
                });
                return Ok(self.finish_aborted(
                    request, run_id, started, file_count, errors, warnings,
                ));
            }
            Err(other) => return Err(other),
        };
        warnings.extend(resolution.warnings.iter().cloned());

        // Build
        let snapshot = self.store.load_snapshot(&request.repo_id)?;
        let delta = diff(&resolution, &snapshot);

        // Commit
        let status = if errors.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        let mut report = IngestReport {
            run_id: run_id.clone(),
            repo_id: request.repo_id.clone(),
            status,
            file_count,
            artifact_count: resolution.artifacts.len(),
            edge_count: resolution.edges.len(),
            added: delta.added.len(),
            updated: delta.updated.len(),
            tombstoned: delta.tombstoned.len(),
            unresolved_references: resolution.unresolved_count,
            errors,
            warnings,
            elapsed_ms: 0,
        };
        let record = run_record(&report, &resolution, &delta, started);
        if let Err(err) = self.store.commit(&delta, &record) {
            tracing::error!(repo_id = %request.repo_id, error = %err, "commit failed, aborting");
            report.errors.push(RunError::StoreCommit(err.to_string()));
            report.status = RunStatus::Aborted;
            report.added = 0;
            report.updated = 0;
            report.tombstoned = 0;
            let aborted = run_record(&report, &resolution, &GraphDelta::default(), started);
            let _ = self.store.record_run(&aborted);
        }
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            repo_id = %request.repo_id,
            run_id = %report.run_id,
            status = %report.status,
            artifacts = report.artifact_count,
            edges = report.edge_count,
            added = report.added,
            updated = report.updated,
            tombstoned = report.tombstoned,
            elapsed_ms = report.elapsed_ms,
            "ingestion run finished"
        );
        Ok(report)
    }

    fn finish_aborted(
        &self,
        request: &IngestRequest,
        run_id: String,
        started: Instant,
        file_count: usize,
        errors: Vec<RunError>,
        warnings: Vec<RunWarning>,
    ) -> IngestReport {
        let report = IngestReport {
            run_id,
            repo_id: request.repo_id.clone(),
            status: RunStatus::Aborted,
            file_count,
            artifact_count: 0,
            edge_count: 0,
            added: 0,
            updated: 0,
            tombstoned: 0,
            unresolved_references: 0,
            errors,
            warnings,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        let record = run_record(&report, &Resolution::default(), &GraphDelta::default(), started);
        let _ = self.store.record_run(&record);
        report
    }
}

fn run_record(
    report: &IngestReport,
    resolution: &Resolution,
    delta: &GraphDelta,
    started: Instant,
) -> RunRecord {
    let detail = serde_json::json!({
        "errors": report.errors,
        "warnings": report.warnings,
    });
    RunRecord {
        run_id: report.run_id.clone(),
        repo_id: report.repo_id.clone(),
        status: report.status,
        file_count: report.file_count,
        artifact_count: resolution.artifacts.len(),
        edge_count: resolution.edges.len(),
        added_count: delta.added.len(),
        updated_count: delta.updated.len(),
        tombstoned_count: delta.tombstoned.len(),
        unresolved_count: resolution.unresolved_count,
        error_count: report.errors.len(),
        warning_count: report.warnings.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        detail_json: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, EdgeKind};
    use crate::query::{Direction, QueryEngine, TraverseRequest};
    use crate::store::{GraphSnapshot, MemoryStore, SqliteStore};
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn payments_repo(root: &Path) {
        write(
            root,
            "payments/stripe.py",
            "from payments.utils import validate_amount\n\n\
             class StripeClient:\n    def charge(self, amount):\n        validate_amount(amount)\n",
        );
        write(
            root,
            "payments/utils.py",
            "def validate_amount(amount):\n    return amount > 0\n",
        );
    }

    fn ingest(store: &dyn GraphStore, repo: &str, root: &Path) -> IngestReport {
        let request = IngestRequest::new(repo, root);
        Ingestor::new(store).ingest(&request).unwrap()
    }

    #[test]
    fn end_to_end_payments_example() {
        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());
        let store = MemoryStore::new();
        let report = ingest(&store, "r", dir.path());

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.file_count, 2);
        assert!(report.errors.is_empty());

        let snapshot = store.load_snapshot("r").unwrap();
        for id in [
            "payments/stripe.py",
            "payments/stripe.py#StripeClient",
            "payments/stripe.py#StripeClient.charge",
            "payments/utils.py#validate_amount",
        ] {
            assert!(snapshot.artifacts.contains_key(id), "missing {id}");
        }
        for edge in [
            Edge::new(EdgeKind::Contains, "payments/stripe.py", "payments/stripe.py#StripeClient"),
            Edge::new(
                EdgeKind::Contains,
                "payments/stripe.py#StripeClient",
                "payments/stripe.py#StripeClient.charge",
            ),
            Edge::new(
                EdgeKind::Calls,
                "payments/stripe.py#StripeClient.charge",
                "payments/utils.py#validate_amount",
            ),
        ] {
            assert!(snapshot.edges.contains(&edge), "missing {edge:?}");
        }
    }

    #[test]
    fn rerun_on_unchanged_repo_is_empty_delta() {
        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());
        let store = MemoryStore::new();
        let first = ingest(&store, "r", dir.path());
        assert!(first.added > 0);

        let second = ingest(&store, "r", dir.path());
        assert_eq!(second.status, RunStatus::Success);
        assert_eq!(second.added, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.tombstoned, 0);
    }

    #[test]
    fn ingestion_is_deterministic_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());

        let load = || {
            let store = MemoryStore::new();
            ingest(&store, "r", dir.path());
            let snap = store.load_snapshot("r").unwrap();
            let ids: Vec<String> = snap.artifacts.keys().cloned().collect();
            let hashes: Vec<String> =
                snap.artifacts.values().map(|a| a.content_hash.clone()).collect();
            (ids, hashes, snap.edges)
        };
        assert_eq!(load(), load());
    }

    #[test]
    fn rename_produces_tombstone_plus_add() {
        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());
        let store = MemoryStore::new();
        ingest(&store, "r", dir.path());

        write(
            dir.path(),
            "payments/stripe.py",
            "from payments.utils import validate_amount\n\n\
             class StripeClient:\n    def process_charge(self, amount):\n        validate_amount(amount)\n",
        );
        let report = ingest(&store, "r", dir.path());
        assert_eq!(report.tombstoned, 1);
        assert!(report.added >= 1);

        let snapshot = store.load_snapshot("r").unwrap();
        assert!(!snapshot.artifacts.contains_key("payments/stripe.py#StripeClient.charge"));
        assert!(snapshot
            .artifacts
            .contains_key("payments/stripe.py#StripeClient.process_charge"));
        // Exactly one StripeClient.
        let clients = snapshot
            .artifacts
            .keys()
            .filter(|id| id.ends_with("#StripeClient"))
            .count();
        assert_eq!(clients, 1);
    }

    #[test]
    fn malformed_file_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());
        write(dir.path(), "broken.py", "def broken(:\n");
        let store = MemoryStore::new();
        let report = ingest(&store, "r", dir.path());

        assert_eq!(report.status, RunStatus::Partial);
        let extraction_errors = report
            .errors
            .iter()
            .filter(|e| matches!(e, RunError::Extraction(_)))
            .count();
        assert_eq!(extraction_errors, 1);

        let snapshot = store.load_snapshot("r").unwrap();
        assert!(snapshot.artifacts.contains_key("payments/utils.py#validate_amount"));
        assert!(!snapshot.artifacts.contains_key("broken.py"));
    }

    #[test]
    fn all_files_failing_aborts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "def a(:\n");
        write(dir.path(), "b.py", "class (:\n");
        let store = MemoryStore::new();
        let report = ingest(&store, "r", dir.path());
        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(report.errors.len(), 2);
        assert!(store.load_snapshot("r").unwrap().is_empty());
    }

    #[test]
    fn identity_conflict_aborts_and_preserves_prior_graph() {
        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());
        let store = MemoryStore::new();
        ingest(&store, "r", dir.path());
        let before = store.load_snapshot("r").unwrap();

        write(
            dir.path(),
            "payments/utils.py",
            "def validate_amount(amount):\n    return True\n\ndef validate_amount(amount):\n    return False\n",
        );
        let report = ingest(&store, "r", dir.path());
        assert_eq!(report.status, RunStatus::Aborted);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, RunError::IdentityConflict { .. })));

        let after = store.load_snapshot("r").unwrap();
        let ids = |s: &GraphSnapshot| s.artifacts.keys().cloned().collect::<Vec<_>>();
        assert_eq!(ids(&before), ids(&after));
    }

    #[test]
    fn commit_failure_aborts_with_store_error() {
        struct FailingStore;
        impl GraphStore for FailingStore {
            fn load_snapshot(&self, _repo_id: &str) -> crate::errors::GraphResult<GraphSnapshot> {
                Ok(GraphSnapshot::default())
            }
            fn commit(
                &self,
                _delta: &GraphDelta,
                _run: &RunRecord,
            ) -> crate::errors::GraphResult<()> {
                Err(RepoGraphError::StoreCommit("disk full".to_string()))
            }
            fn record_run(&self, _run: &RunRecord) -> crate::errors::GraphResult<()> {
                Ok(())
            }
            fn prune_tombstones(&self, _repo_id: &str) -> crate::errors::GraphResult<usize> {
                Ok(0)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());
        let report = ingest(&FailingStore, "r", dir.path());
        assert_eq!(report.status, RunStatus::Aborted);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, RunError::StoreCommit(_))));
    }

    #[test]
    fn worker_count_does_not_change_output() {
        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());
        write(dir.path(), "docs/adr/0001-use-sqlite.md", "# ADR\n");
        write(dir.path(), "tests/test_utils.py",
            "from payments.utils import validate_amount\n\ndef test_validate():\n    assert validate_amount(1)\n");

        let run_with = |workers: usize| {
            let store = MemoryStore::new();
            let mut request = IngestRequest::new("r", dir.path());
            request.workers = workers;
            Ingestor::new(&store).ingest(&request).unwrap();
            let snap = store.load_snapshot("r").unwrap();
            (snap.artifacts.keys().cloned().collect::<Vec<_>>(), snap.edges)
        };
        assert_eq!(run_with(1), run_with(8));
    }

    #[test]
    fn committed_graph_is_traversable() {
        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());
        let store = SqliteStore::open(dir.path().join(".repograph").join("graph.db")).unwrap();
        ingest(&store, "r", dir.path());

        let engine = QueryEngine::new(&store);
        let hits = engine
            .traverse(&TraverseRequest {
                repo_id: "r".to_string(),
                start_canonical_id: "payments/stripe.py#StripeClient.charge".to_string(),
                edge_kinds: vec![EdgeKind::Calls],
                max_depth: 3,
                direction: Direction::Forward,
            })
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].artifact.canonical_id, "payments/utils.py#validate_amount");
        assert_eq!(
            hits[1].path,
            vec![
                "payments/stripe.py#StripeClient.charge".to_string(),
                "payments/utils.py#validate_amount".to_string(),
            ]
        );
    }

    #[test]
    fn tests_edges_reach_tested_code() {
        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());
        write(dir.path(), "tests/test_utils.py",
            "from payments.utils import validate_amount\n\ndef test_validate():\n    assert validate_amount(1)\n");
        let store = MemoryStore::new();
        ingest(&store, "r", dir.path());

        let snapshot = store.load_snapshot("r").unwrap();
        assert!(snapshot.edges.contains(&Edge::new(
            EdgeKind::Tests,
            "tests/test_utils.py#test_validate",
            "payments/utils.py#validate_amount",
        )));
    }

    #[test]
    fn run_records_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        payments_repo(dir.path());
        let store = MemoryStore::new();
        let report = ingest(&store, "r", dir.path());

        let runs = store.runs("r");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, report.run_id);
        assert_eq!(runs[0].status, RunStatus::Success);
        assert!(runs[0].detail_json.contains("errors"));
    }
}
