//! Shared guardrails for traversal bounds.
//!
//! Every traversal is clamped: depth, visited nodes, and scanned edges all
//! have hard caps so a dense or cyclic graph can never produce unbounded
//! work.

/// Hard ceiling on traversal depth; requests above it are clamped down.
pub const MAX_TRAVERSAL_DEPTH: i64 = 6;

/// Maximum distinct canonical ids one traversal may visit.
pub const MAX_GRAPH_VISITED: usize = 2000;

/// Maximum edges one traversal may scan.
pub const MAX_GRAPH_EDGES: usize = 5000;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

/// Clamp a requested depth into `[1, MAX_TRAVERSAL_DEPTH]`.
pub fn clamp_depth(value: i64) -> i64 {
    clamp_int(value, 1, MAX_TRAVERSAL_DEPTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_depth_bounds() {
        assert_eq!(clamp_depth(0), 1);
        assert_eq!(clamp_depth(-5), 1);
        assert_eq!(clamp_depth(3), 3);
        assert_eq!(clamp_depth(999), MAX_TRAVERSAL_DEPTH);
    }

    #[test]
    fn clamp_int_bounds() {
        assert_eq!(clamp_int(50, 1, 10), 10);
        assert_eq!(clamp_int(-50, 1, 10), 1);
        assert_eq!(clamp_int(5, 1, 10), 5);
    }
}
