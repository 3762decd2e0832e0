//! Ingestion pipeline: deterministic walk, parallel extraction, two-pass
//! resolution, delta build, atomic commit.

pub mod builder;
pub mod extract;
pub mod identity;
pub mod pipeline;
pub mod resolve;
pub mod walker;

pub use pipeline::{IngestReport, IngestRequest, Ingestor};
pub use walker::WalkPolicy;
