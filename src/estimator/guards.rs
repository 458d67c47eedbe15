//! Runtime guards for traversal safety.
//!
//! One decision point with a clear action per call: the traversal handlers
//! run the sampler, read the table bound, and let [`check_guards`] decide
//! whether to proceed.

use tracing::{info, warn};

use crate::estimator::bounds::TableStats;
use crate::estimator::estimate::{estimate, EstimationConfig};
use crate::estimator::sampler::SampleResult;

/// What the guard recommends doing with the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    /// Safe to proceed with frontier-batched BFS.
    Traverse,
    /// A counting aggregation would serve better than traversal.
    Aggregate,
    /// Load the subgraph and run the algorithm in memory.
    SwitchToInMemory,
    /// Too large; the caller must narrow the scope.
    Abort,
    /// Over the estimate but bounded below the limit; proceed with caution.
    WarnAndProceed,
}

/// Result of the guard checks.
#[derive(Debug, Clone)]
pub struct GuardResult {
    pub safe_to_proceed: bool,
    pub recommended_action: GuardAction,
    pub reason: String,
    pub estimated_nodes: usize,
    pub warnings: Vec<String>,
}

/// Decision logic, in priority order: hub scout check, structural warnings
/// (junction shape, inferred cycles), exact-size short circuit, then the
/// volume check against the node limit.
pub fn check_guards(
    sample: &SampleResult,
    max_depth: usize,
    max_nodes: usize,
    stats: Option<&TableStats>,
    table_bound: Option<usize>,
    config: &EstimationConfig,
) -> GuardResult {
    let mut warnings: Vec<String> = Vec::new();
    // The raw (unclamped) estimate drives the volume decision: clamping it
    // by the table bound up front would make the bounded-below-limit branch
    // unreachable. Reported `estimated_nodes` is always clamped.
    let estimated = estimate(sample, max_depth, None, config);
    let clamped = |value: usize| match table_bound {
        Some(bound) => value.min(bound),
        None => value,
    };

    if sample.hub_detected {
        let reason = format!(
            "hub node detected with expansion factor {:.1}x; \
             add filters to reduce scope or raise the hub threshold",
            sample.max_expansion_factor
        );
        warn!(%reason, "guard abort");
        return GuardResult {
            safe_to_proceed: false,
            recommended_action: GuardAction::Abort,
            reason,
            estimated_nodes: clamped(estimated),
            warnings,
        };
    }

    if stats.is_some_and(|s| s.is_junction) {
        warnings.push(
            "junction-table shape (composite primary key); \
             aggregation is usually preferable to traversal"
                .to_string(),
        );
    }

    if sample.has_cycles {
        warnings.push(
            "cycles inferred from convergence; the bounded visited set still applies"
                .to_string(),
        );
    }

    for w in &warnings {
        warn!("{w}");
    }

    if sample.terminated {
        let reason = format!(
            "graph terminated at depth {} with {} nodes",
            sample.level_sizes.len() - 1,
            sample.visited_count
        );
        info!(%reason, "guard traverse");
        return GuardResult {
            safe_to_proceed: true,
            recommended_action: GuardAction::Traverse,
            reason,
            estimated_nodes: sample.visited_count,
            warnings,
        };
    }

    if estimated > max_nodes {
        if let Some(bound) = table_bound {
            if bound <= max_nodes {
                warnings.push(format!(
                    "estimate ({estimated}) exceeds the limit but the table bound ({bound}) is smaller"
                ));
                let reason = format!(
                    "table bound ({bound}) is below the limit of {max_nodes} despite the inflated estimate"
                );
                info!(%reason, "guard warn-and-proceed");
                return GuardResult {
                    safe_to_proceed: true,
                    recommended_action: GuardAction::WarnAndProceed,
                    reason,
                    estimated_nodes: estimated.min(bound),
                    warnings,
                };
            }
        }

        let reason = format!(
            "estimated {estimated} nodes exceeds the limit of {max_nodes}; \
             raise the limit with max_nodes=N or bypass with skip_estimation=true"
        );
        warn!(%reason, "guard abort");
        return GuardResult {
            safe_to_proceed: false,
            recommended_action: GuardAction::Abort,
            reason,
            estimated_nodes: clamped(estimated),
            warnings,
        };
    }

    let reason = format!("estimated {estimated} nodes within the limit of {max_nodes}");
    info!(%reason, "guard traverse");
    GuardResult {
        safe_to_proceed: true,
        recommended_action: GuardAction::Traverse,
        reason,
        estimated_nodes: clamped(estimated),
        warnings,
    }
}

/// Whether the requested work needs the whole structure in memory instead of
/// layer-by-layer relational traversal.
pub fn should_switch_to_inmemory(
    sample: &SampleResult,
    stats: Option<&TableStats>,
    algorithm: Option<&str>,
) -> (bool, Option<String>) {
    const GLOBAL_ALGORITHMS: [&str; 4] =
        ["shortest_path", "centrality", "pagerank", "betweenness"];

    if let Some(name) = algorithm {
        if GLOBAL_ALGORITHMS.contains(&name.to_ascii_lowercase().as_str()) {
            return (
                true,
                Some(format!("algorithm '{name}' requires global structure")),
            );
        }
    }

    if sample.has_cycles {
        return (
            true,
            Some("cycles inferred; in-memory traversal handles them directly".to_string()),
        );
    }

    if let Some(density) = stats.and_then(|s| s.density) {
        if density > 0.5 {
            return (
                true,
                Some(format!("high density ({density:.2}) favors in-memory analysis")),
            );
        }
    }

    (false, None)
}
