//! Read-only query surface over committed graphs.

pub mod guards;
pub mod traverse;

pub use traverse::{traverse, Direction, QueryEngine, TraversalHit, TraverseRequest};
