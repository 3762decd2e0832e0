//! Canonical identity assignment.
//!
//! A canonical id is a pure function of `(relative_path, symbol_path)`:
//! `<relative_path>[#<symbol_path>]` with the symbol path dot-joined. It is
//! stable across rebuilds and never derived from insertion order or a
//! generated surrogate key.

use indexmap::IndexMap;

use crate::errors::{GraphResult, RepoGraphError};
use crate::models::Span;

/// Derive the canonical id for a symbol path within a file. An empty symbol
/// path identifies the file itself.
pub fn assign(relative_path: &str, symbol_path: &[String]) -> String {
    if symbol_path.is_empty() {
        relative_path.to_string()
    } else {
        format!("{}#{}", relative_path, symbol_path.join("."))
    }
}

/// Provenance recorded per claimed id, used to report both sides of a
/// collision.
#[derive(Clone, Debug)]
pub struct Claim {
    pub file_path: String,
    pub span: Span,
}

/// Tracks every canonical id claimed during a run and rejects duplicates.
///
/// A collision (e.g. a conditional redefinition of the same top-level name)
/// is fatal for the run: no partial graph is built.
#[derive(Debug, Default)]
pub struct IdentityTable {
    claims: IndexMap<String, Claim>,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, canonical_id: &str, file_path: &str, span: Span) -> GraphResult<()> {
        if let Some(first) = self.claims.get(canonical_id) {
            return Err(RepoGraphError::IdentityConflict {
                canonical_id: canonical_id.to_string(),
                first_path: first.file_path.clone(),
                first_span: first.span,
                second_path: file_path.to_string(),
                second_span: span,
            });
        }
        self.claims.insert(
            canonical_id.to_string(),
            Claim {
                file_path: file_path.to_string(),
                span,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}
