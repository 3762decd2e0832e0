//! Error types for the repograph core library.

use crate::models::Span;

/// Top-level error enum for the repograph core library.
#[derive(Debug, thiserror::Error)]
pub enum RepoGraphError {
    /// A single file failed to parse. Recoverable: the file is skipped and
    /// the failure is recorded in the run report.
    #[error("extraction failed for {path}: {reason}")]
    Extraction { path: String, reason: String },

    /// Two distinct declarations produced the same canonical id within one
    /// run. Fatal for the run; both source spans are named.
    #[error("identity conflict on {canonical_id}: declared at {first_path}:{first_span} and {second_path}:{second_span}")]
    IdentityConflict {
        canonical_id: String,
        first_path: String,
        first_span: Span,
        second_path: String,
        second_span: Span,
    },

    /// The store rejected or failed to apply a delta. Fatal for the run;
    /// the previously committed graph is untouched.
    #[error("store commit failed: {0}")]
    StoreCommit(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("walk error: {0}")]
    Walk(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type GraphResult<T> = Result<T, RepoGraphError>;
