//! Process-wide safety limits.
//!
//! These are immutable configuration, set once here. Per-call overrides
//! (`max_nodes`) loosen the node limit for a single handler call; nothing
//! loosens the depth cap.

use std::time::Duration;

use crate::error::{GraphError, Result};

/// Hard cap on traversal depth; per-call `max_depth` is clamped to this.
pub const MAX_DEPTH: usize = 50;

/// Default cap on visited nodes per call, overridable per call.
pub const MAX_NODES: usize = 10_000;

/// Cap on rows hydrated in a single result; excess input is truncated.
pub const MAX_RESULTS: usize = 100_000;

/// Per-statement database timeout.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Layer-boundary runtime check. `depth` is the layer about to be expanded.
pub(crate) fn check_limits(depth: usize, visited: usize, max_nodes: usize) -> Result<()> {
    if depth >= MAX_DEPTH {
        return Err(GraphError::SafetyLimitExceeded(format!(
            "traversal reached depth {depth}, hard cap is {MAX_DEPTH}"
        )));
    }
    if visited > max_nodes {
        return Err(GraphError::SafetyLimitExceeded(format!(
            "traversal visited {visited} nodes, limit is {max_nodes} \
             (raise with max_nodes=N)"
        )));
    }
    Ok(())
}
