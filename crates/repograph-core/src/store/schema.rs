//! SQLite schema DDL and migration framework.

use rusqlite::Connection;

use crate::errors::GraphResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 2;

/// Core DDL statements: 5 CREATE TABLE + 6 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (5) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS artifacts (
        repo_id TEXT NOT NULL,
        canonical_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        file_path TEXT NOT NULL,
        byte_start INTEGER NOT NULL,
        byte_end INTEGER NOT NULL,
        line_start INTEGER NOT NULL,
        line_end INTEGER NOT NULL,
        extractor_version TEXT NOT NULL,
        tombstoned INTEGER NOT NULL DEFAULT 0,
        last_run_id TEXT,
        PRIMARY KEY(repo_id, canonical_id)
    );",
    "CREATE TABLE IF NOT EXISTS edges (
        repo_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        last_run_id TEXT,
        PRIMARY KEY(repo_id, kind, source_id, target_id)
    );",
    "CREATE TABLE IF NOT EXISTS runs (
        run_id TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL,
        status TEXT NOT NULL,
        file_count INTEGER NOT NULL,
        artifact_count INTEGER NOT NULL,
        edge_count INTEGER NOT NULL,
        added_count INTEGER NOT NULL,
        updated_count INTEGER NOT NULL,
        tombstoned_count INTEGER NOT NULL,
        unresolved_count INTEGER NOT NULL,
        error_count INTEGER NOT NULL,
        warning_count INTEGER NOT NULL,
        elapsed_ms INTEGER NOT NULL,
        detail_json TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes (6) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_artifacts_repo_kind ON artifacts(repo_id, kind);",
    "CREATE INDEX IF NOT EXISTS idx_artifacts_repo_file ON artifacts(repo_id, file_path);",
    "CREATE INDEX IF NOT EXISTS idx_artifacts_repo_tombstoned ON artifacts(repo_id, tombstoned);",
    "CREATE INDEX IF NOT EXISTS idx_edges_repo_source ON edges(repo_id, source_id);",
    "CREATE INDEX IF NOT EXISTS idx_edges_repo_target ON edges(repo_id, target_id);",
    "CREATE INDEX IF NOT EXISTS idx_runs_repo_created ON runs(repo_id, created_at);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`].  Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> GraphResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT repograph_migrate_step;")?;

        let step_result = (|| -> GraphResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                _ => {} // future versions: no-op until migration is defined
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT repograph_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                // Roll back just this step, then release the savepoint.
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT repograph_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT repograph_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `meta`.
/// Returns 0 when the key is absent or unparseable.
pub(crate) fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

/// Upsert the `schema_version` key in `meta`.
fn set_schema_version(conn: &Connection, version: i32) -> GraphResult<()> {
    conn.execute(
        "INSERT INTO meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

/// Insert one row into `migration_history` (best-effort; never fails the
/// caller).
fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> GraphResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, no-op.
fn migrate_to_v1(_conn: &Connection) -> GraphResult<()> {
    // Intentionally empty -- baseline schema already created by SCHEMA_STATEMENTS.
    Ok(())
}

/// v1 -> v2: add `idx_edges_repo_kind` for kind-filtered traversals.
fn migrate_to_v2(conn: &Connection) -> GraphResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_edges_repo_kind ON edges(repo_id, kind);",
    )?;
    Ok(())
}
