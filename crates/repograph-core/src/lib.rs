//! repograph core library — deterministic, content-addressed code graphs.
//!
//! This crate ingests a repository into a typed artifact/edge graph
//! (modules, classes, functions, methods, tests, documents, ADRs) keyed by
//! canonical ids, persists it behind an abstract store with an SQLite
//! backend, and serves bounded breadth-first traversals over the committed
//! snapshot. It is a library contract: transports (HTTP, CLI, MCP) live in
//! the embedding layer.

pub mod errors;
pub mod ingest;
pub mod models;
pub mod query;
pub mod store;

pub use errors::{GraphResult, RepoGraphError};
pub use ingest::{IngestReport, IngestRequest, Ingestor, WalkPolicy};
pub use models::{Artifact, ArtifactKind, Edge, EdgeKind, RunStatus};
pub use query::{Direction, QueryEngine, TraverseRequest};
pub use store::{GraphStore, MemoryStore, SqliteStore};
