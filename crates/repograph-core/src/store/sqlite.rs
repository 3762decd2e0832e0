//! SQLite-backed graph store.
//!
//! Each public method opens its own connection, so callers never manage
//! connection lifetime. Commits run inside a single IMMEDIATE transaction:
//! the delta, its edges, and the run record land together or not at all.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, TransactionBehavior};

use crate::errors::{GraphResult, RepoGraphError};
use crate::ingest::builder::GraphDelta;
use crate::models::{Artifact, ArtifactKind, Edge, EdgeKind, Provenance, Span, EXTERNAL_PREFIX};
use crate::store::{schema, GraphSnapshot, GraphStore, RunRecord};

/// SQLite graph store. One database file holds any number of repositories,
/// keyed by `repo_id`.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) a store at `db_path`, creating parent directories
    /// and initialising the schema.
    pub fn open(db_path: impl AsRef<Path>) -> GraphResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> GraphResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Set WAL mode, create all tables and indexes, then run pending
    /// migrations.
    fn init_schema(&self) -> GraphResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    /// Run records for one repository, newest last.
    pub fn runs(&self, repo_id: &str) -> GraphResult<Vec<RunRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, repo_id, status, file_count, artifact_count, edge_count, \
                    added_count, updated_count, tombstoned_count, unresolved_count, \
                    error_count, warning_count, elapsed_ms, COALESCE(detail_json, '') \
             FROM runs WHERE repo_id = ?1 ORDER BY created_at, run_id;",
        )?;
        let rows = stmt.query_map(params![repo_id], |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                repo_id: row.get(1)?,
                status: crate::models::RunStatus::parse(&row.get::<_, String>(2)?)
                    .unwrap_or(crate::models::RunStatus::Aborted),
                file_count: row.get::<_, i64>(3)? as usize,
                artifact_count: row.get::<_, i64>(4)? as usize,
                edge_count: row.get::<_, i64>(5)? as usize,
                added_count: row.get::<_, i64>(6)? as usize,
                updated_count: row.get::<_, i64>(7)? as usize,
                tombstoned_count: row.get::<_, i64>(8)? as usize,
                unresolved_count: row.get::<_, i64>(9)? as usize,
                error_count: row.get::<_, i64>(10)? as usize,
                warning_count: row.get::<_, i64>(11)? as usize,
                elapsed_ms: row.get::<_, i64>(12)? as u64,
                detail_json: row.get(13)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn insert_run(conn: &Connection, run: &RunRecord) -> GraphResult<()> {
    conn.execute(
        "INSERT INTO runs(run_id, repo_id, status, file_count, artifact_count, edge_count, \
                          added_count, updated_count, tombstoned_count, unresolved_count, \
                          error_count, warning_count, elapsed_ms, detail_json) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14);",
        params![
            run.run_id,
            run.repo_id,
            run.status.as_str(),
            run.file_count as i64,
            run.artifact_count as i64,
            run.edge_count as i64,
            run.added_count as i64,
            run.updated_count as i64,
            run.tombstoned_count as i64,
            run.unresolved_count as i64,
            run.error_count as i64,
            run.warning_count as i64,
            run.elapsed_ms as i64,
            run.detail_json,
        ],
    )?;
    Ok(())
}

fn upsert_artifact(conn: &Connection, artifact: &Artifact, run_id: &str) -> GraphResult<()> {
    conn.execute(
        "INSERT INTO artifacts(repo_id, canonical_id, kind, name, content_hash, file_path, \
                               byte_start, byte_end, line_start, line_end, extractor_version, \
                               tombstoned, last_run_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12) \
         ON CONFLICT(repo_id, canonical_id) DO UPDATE SET \
             kind = excluded.kind, \
             name = excluded.name, \
             content_hash = excluded.content_hash, \
             file_path = excluded.file_path, \
             byte_start = excluded.byte_start, \
             byte_end = excluded.byte_end, \
             line_start = excluded.line_start, \
             line_end = excluded.line_end, \
             extractor_version = excluded.extractor_version, \
             tombstoned = 0, \
             last_run_id = excluded.last_run_id;",
        params![
            artifact.repo_id,
            artifact.canonical_id,
            artifact.kind.as_str(),
            artifact.name,
            artifact.content_hash,
            artifact.provenance.file_path,
            artifact.provenance.span.byte_start as i64,
            artifact.provenance.span.byte_end as i64,
            artifact.provenance.span.line_start,
            artifact.provenance.span.line_end,
            artifact.provenance.extractor_version,
            run_id,
        ],
    )?;
    Ok(())
}

impl GraphStore for SqliteStore {
    fn load_snapshot(&self, repo_id: &str) -> GraphResult<GraphSnapshot> {
        let conn = self.connect()?;

        let mut snapshot = GraphSnapshot::default();
        {
            let mut stmt = conn.prepare(
                "SELECT canonical_id, kind, name, content_hash, file_path, \
                        byte_start, byte_end, line_start, line_end, extractor_version \
                 FROM artifacts WHERE repo_id = ?1 AND tombstoned = 0 ORDER BY rowid;",
            )?;
            let rows = stmt.query_map(params![repo_id], |row| {
                let canonical_id: String = row.get(0)?;
                let kind_str: String = row.get(1)?;
                Ok((canonical_id, kind_str, row.get::<_, String>(2)?, row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?, row.get::<_, i64>(5)?, row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?, row.get::<_, i64>(8)?, row.get::<_, String>(9)?))
            })?;
            for row in rows {
                let (canonical_id, kind_str, name, content_hash, file_path, byte_start, byte_end, line_start, line_end, extractor_version) = row?;
                let kind = ArtifactKind::parse(&kind_str).ok_or_else(|| {
                    RepoGraphError::StoreCommit(format!("unknown artifact kind in store: {kind_str}"))
                })?;
                snapshot.artifacts.insert(
                    canonical_id.clone(),
                    Artifact {
                        repo_id: repo_id.to_string(),
                        canonical_id,
                        kind,
                        name,
                        content_hash,
                        provenance: Provenance {
                            file_path,
                            span: Span {
                                byte_start: byte_start as usize,
                                byte_end: byte_end as usize,
                                line_start,
                                line_end,
                            },
                            extractor_version,
                        },
                    },
                );
            }
        }

        let mut stmt = conn.prepare(
            "SELECT kind, source_id, target_id FROM edges WHERE repo_id = ?1 ORDER BY rowid;",
        )?;
        let rows = stmt.query_map(params![repo_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (kind_str, source_id, target_id) = row?;
            let kind = EdgeKind::parse(&kind_str).ok_or_else(|| {
                RepoGraphError::StoreCommit(format!("unknown edge kind in store: {kind_str}"))
            })?;
            // Edges touching tombstoned artifacts stay in the table until
            // pruned; hide them from the live view.
            let live = |id: &str| {
                snapshot.artifacts.contains_key(id) || id.starts_with(EXTERNAL_PREFIX)
            };
            if live(&source_id) && live(&target_id) {
                snapshot.edges.push(Edge::new(kind, source_id, target_id));
            }
        }

        Ok(snapshot)
    }

    fn commit(&self, delta: &GraphDelta, run: &RunRecord) -> GraphResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for artifact in delta.added.iter().chain(delta.updated.iter()) {
            upsert_artifact(&tx, artifact, &run.run_id)?;
        }
        for canonical_id in &delta.tombstoned {
            tx.execute(
                "UPDATE artifacts SET tombstoned = 1, last_run_id = ?3 \
                 WHERE repo_id = ?1 AND canonical_id = ?2;",
                params![run.repo_id, canonical_id, run.run_id],
            )?;
        }
        for edge in &delta.edges_removed {
            tx.execute(
                "DELETE FROM edges \
                 WHERE repo_id = ?1 AND kind = ?2 AND source_id = ?3 AND target_id = ?4;",
                params![run.repo_id, edge.kind.as_str(), edge.source_id, edge.target_id],
            )?;
        }
        for edge in &delta.edges_added {
            tx.execute(
                "INSERT INTO edges(repo_id, kind, source_id, target_id, last_run_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(repo_id, kind, source_id, target_id) DO UPDATE SET \
                     last_run_id = excluded.last_run_id;",
                params![run.repo_id, edge.kind.as_str(), edge.source_id, edge.target_id, run.run_id],
            )?;
        }
        insert_run(&tx, run)?;

        tx.commit()?;
        Ok(())
    }

    fn record_run(&self, run: &RunRecord) -> GraphResult<()> {
        let conn = self.connect()?;
        insert_run(&conn, run)
    }

    fn prune_tombstones(&self, repo_id: &str) -> GraphResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM edges WHERE repo_id = ?1 AND ( \
                 source_id IN (SELECT canonical_id FROM artifacts \
                               WHERE repo_id = ?1 AND tombstoned = 1) OR \
                 target_id IN (SELECT canonical_id FROM artifacts \
                               WHERE repo_id = ?1 AND tombstoned = 1));",
            params![repo_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM artifacts WHERE repo_id = ?1 AND tombstoned = 1;",
            params![repo_id],
        )?;

        tx.commit()?;
        Ok(removed)
    }
}
