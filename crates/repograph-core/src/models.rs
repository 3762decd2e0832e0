//! Shared typed models used across ingestion, storage, and query layers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ---------------------------------------------------------------------------
// Schema / contract constants
// ---------------------------------------------------------------------------

/// Version stamp written into artifact provenance. Bump when extraction
/// output changes shape so downstream layers can detect stale graphs.
pub const EXTRACTOR_VERSION: &str = "1";

/// Prefix for synthetic placeholder ids targeted by unresolved-reference
/// edges (external or third-party symbols not declared in the run).
pub const EXTERNAL_PREFIX: &str = "external:";

// ---------------------------------------------------------------------------
// Artifact and edge kinds
// ---------------------------------------------------------------------------

/// Closed set of artifact node types. New kinds are deliberate schema
/// additions, handled exhaustively at every stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Document,
    Module,
    Class,
    Function,
    Method,
    Test,
    Adr,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Document => "document",
            ArtifactKind::Module => "module",
            ArtifactKind::Class => "class",
            ArtifactKind::Function => "function",
            ArtifactKind::Method => "method",
            ArtifactKind::Test => "test",
            ArtifactKind::Adr => "adr",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "document" => Some(ArtifactKind::Document),
            "module" => Some(ArtifactKind::Module),
            "class" => Some(ArtifactKind::Class),
            "function" => Some(ArtifactKind::Function),
            "method" => Some(ArtifactKind::Method),
            "test" => Some(ArtifactKind::Test),
            "adr" => Some(ArtifactKind::Adr),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of typed, directed relationship kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Contains,
    Imports,
    Calls,
    Inherits,
    Tests,
    References,
    UnresolvedReference,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "CONTAINS",
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::Calls => "CALLS",
            EdgeKind::Inherits => "INHERITS",
            EdgeKind::Tests => "TESTS",
            EdgeKind::References => "REFERENCES",
            EdgeKind::UnresolvedReference => "UNRESOLVED_REFERENCE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CONTAINS" => Some(EdgeKind::Contains),
            "IMPORTS" => Some(EdgeKind::Imports),
            "CALLS" => Some(EdgeKind::Calls),
            "INHERITS" => Some(EdgeKind::Inherits),
            "TESTS" => Some(EdgeKind::Tests),
            "REFERENCES" => Some(EdgeKind::References),
            "UNRESOLVED_REFERENCE" => Some(EdgeKind::UnresolvedReference),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Spans and provenance
// ---------------------------------------------------------------------------

/// Byte and line extent of an artifact within its source file.
/// Lines are 1-based inclusive; byte offsets are 0-based half-open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub byte_start: usize,
    pub byte_end: usize,
    pub line_start: i64,
    pub line_end: i64,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.line_start, self.line_end)
    }
}

/// Where an artifact came from: file, span, and the extractor version that
/// produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub file_path: String,
    pub span: Span,
    pub extractor_version: String,
}

// ---------------------------------------------------------------------------
// Graph nodes and edges
// ---------------------------------------------------------------------------

/// A node in the committed graph.
///
/// Identity is `(repo_id, canonical_id)`; it never depends on insertion
/// order or a generated surrogate key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub repo_id: String,
    pub canonical_id: String,
    pub kind: ArtifactKind,
    pub name: String,
    pub content_hash: String,
    pub provenance: Provenance,
}

/// A typed, directed relationship between two artifacts of the same repo.
/// Deduplicated by `(kind, source_id, target_id)` within a repo.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub kind: EdgeKind,
    pub source_id: String,
    pub target_id: String,
}

impl Edge {
    pub fn new(kind: EdgeKind, source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run report items
// ---------------------------------------------------------------------------

/// Terminal status of an ingestion run.
///
/// `Partial` means the graph was committed but some files were skipped;
/// `Aborted` means nothing was committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Partial,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(RunStatus::Success),
            "partial" => Some(RunStatus::Partial),
            "aborted" => Some(RunStatus::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file extraction failure. Recoverable: recorded in the run report,
/// the run continues with the remaining files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionError {
    pub path: String,
    pub reason: String,
}

/// Enumerable failure classes surfaced in an ingestion report. No error is
/// ever silently discarded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RunError {
    Extraction(ExtractionError),
    IdentityConflict {
        canonical_id: String,
        first_path: String,
        first_span: Span,
        second_path: String,
        second_span: Span,
    },
    StoreCommit(String),
}

/// Recoverable warnings surfaced in an ingestion report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunWarning {
    SymlinkCycle { path: String },
    UnresolvedReference { name: String, file_path: String },
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a byte slice. Used for artifact content hashes and
/// change detection; identical bytes always produce identical hashes.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
