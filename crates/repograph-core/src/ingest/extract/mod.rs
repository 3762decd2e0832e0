//! AST extraction: source files into language-specific symbol trees.
//!
//! Extraction is pure: identical byte content always yields an identical
//! tree. Backends are polymorphic over {parse, enumerate-definitions,
//! enumerate-references}; files in languages without a backend fall back to
//! a single whole-file document node.

pub mod python;

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::ingest::walker::{Language, SourceFile};
use crate::models::{content_hash, ExtractionError, Span};

// ---------------------------------------------------------------------------
// Raw symbol tree
// ---------------------------------------------------------------------------

/// Closed set of node kinds an extractor may emit. Definition kinds carry a
/// content hash; reference kinds (Import, Call, Inheritance) do not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RawNodeKind {
    Module,
    ClassDef,
    FunctionDef,
    MethodDef,
    TestDef,
    Document,
    Adr,
    Import,
    Call,
    Inheritance,
}

impl RawNodeKind {
    /// Whether this node declares an artifact (as opposed to referencing one).
    pub fn is_definition(&self) -> bool {
        !matches!(
            self,
            RawNodeKind::Import | RawNodeKind::Call | RawNodeKind::Inheritance
        )
    }
}

/// One typed node of a symbol tree.
///
/// `scope_path` is the chain of enclosing named scopes. For definitions it
/// includes the node's own name as the last element; for references it is
/// the chain of the enclosing definition (empty at module level).
#[derive(Clone, Debug)]
pub struct RawNode {
    pub kind: RawNodeKind,
    /// Symbol name for definitions; dotted target text for references.
    pub name: String,
    pub scope_path: Vec<String>,
    pub span: Span,
    /// SHA-256 of the node's source span. Present for definitions only.
    pub content_hash: Option<String>,
    pub docstring: Option<String>,
    /// Dotted module path, for Import nodes only.
    pub import_module: Option<String>,
    /// Local binding name introduced by an `as` alias, for Import nodes.
    pub alias: Option<String>,
}

impl RawNode {
    pub(crate) fn reference(kind: RawNodeKind, name: String, scope: &[String], span: Span) -> Self {
        Self {
            kind,
            name,
            scope_path: scope.to_vec(),
            span,
            content_hash: None,
            docstring: None,
            import_module: None,
            alias: None,
        }
    }
}

/// All nodes extracted from one file, in source order.
#[derive(Clone, Debug)]
pub struct SymbolTree {
    pub relative_path: String,
    pub language: Language,
    pub nodes: Vec<RawNode>,
}

// ---------------------------------------------------------------------------
// Backend trait and dispatch
// ---------------------------------------------------------------------------

/// A language backend: parse one file into a symbol tree.
///
/// Implementations must be pure functions of `(relative_path, bytes)` —
/// no timestamps, no filesystem metadata, no randomized iteration.
pub trait LanguageBackend: Send + Sync {
    fn language(&self) -> Language;
    fn extract(&self, file: &SourceFile) -> Result<SymbolTree, ExtractionError>;
}

/// ADR file names like `0001-use-sqlite.md`.
static ADR_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-.+\.md$").unwrap());

/// Test modules: `test_*.py` or `*_test.py` anywhere in the tree.
pub(crate) static TEST_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|/)(test_[^/]*\.py|[^/]*_test\.py)$").unwrap());

fn is_adr_path(rel_path: &str) -> bool {
    if rel_path.split('/').any(|seg| seg == "adr" || seg == "adrs") {
        return rel_path.ends_with(".md");
    }
    Path::new(rel_path)
        .file_name()
        .map(|n| ADR_FILENAME_RE.is_match(&n.to_string_lossy()))
        .unwrap_or(false)
}

/// Whole-file fallback for languages without a structural backend: one
/// Document (or ADR) node spanning the entire file.
fn extract_document(file: &SourceFile) -> SymbolTree {
    let kind = if is_adr_path(&file.relative_path) {
        RawNodeKind::Adr
    } else {
        RawNodeKind::Document
    };
    let line_count = file.bytes.iter().filter(|&&b| b == b'\n').count() as i64 + 1;
    let name = Path::new(&file.relative_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.relative_path.clone());
    let node = RawNode {
        kind,
        name,
        scope_path: Vec::new(),
        span: Span {
            byte_start: 0,
            byte_end: file.bytes.len(),
            line_start: 1,
            line_end: line_count,
        },
        content_hash: Some(content_hash(&file.bytes)),
        docstring: None,
        import_module: None,
        alias: None,
    };
    SymbolTree {
        relative_path: file.relative_path.clone(),
        language: file.language,
        nodes: vec![node],
    }
}

/// Extract one file, dispatching on detected language.
///
/// Parse failures are per-file: the caller records the `ExtractionError`
/// and continues with the remaining files.
pub fn extract_file(file: &SourceFile) -> Result<SymbolTree, ExtractionError> {
    match file.language {
        Language::Python => python::PythonBackend.extract(file),
        Language::Markdown | Language::Unknown => Ok(extract_document(file)),
    }
}
