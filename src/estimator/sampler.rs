//! Graph sampling with automatic property detection.
//!
//! A bounded frontier-batched BFS that records level sizes and edge counts,
//! then derives structural signals: growth trend, convergence (shared
//! ancestry), inferred cycles, and hub nodes. The sampler never aborts on
//! adverse structure; it reports, and the guards decide.

use rusqlite::Connection;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::db::access::{fetch_edges, EdgeFilters};
use crate::error::Result;
use crate::model::{Direction, GraphSchema, NodeId};

/// Expansion factor above which a node counts as a hub.
pub const DEFAULT_HUB_THRESHOLD: f64 = 50.0;

/// Layer-over-layer growth behavior observed while sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// Results from graph sampling with auto-detected properties.
#[derive(Debug, Clone)]
pub struct SampleResult {
    /// Nodes reached during sampling (start included).
    pub visited_count: usize,
    /// Frontier size per layer, starting with `[1]` for the start node.
    pub level_sizes: Vec<usize>,
    /// The frontier emptied before the depth cap: the count is exact.
    pub terminated: bool,
    /// First-half vs second-half growth comparison.
    pub growth_trend: GrowthTrend,
    /// `visited / (edges_seen + 1)`: ~1.0 for a tree, materially lower for
    /// shared ancestry.
    pub convergence_ratio: f64,
    /// Inferred from convergence without termination; a heuristic, not a
    /// path-tracking proof.
    pub has_cycles: bool,
    /// Largest layer-to-layer expansion observed.
    pub max_expansion_factor: f64,
    /// `max_expansion_factor` crossed the hub threshold.
    pub hub_detected: bool,
    /// Total edges encountered during sampling.
    pub edges_seen: usize,
}

/// Samples a graph structure and detects properties automatically.
///
/// Use this to make an informed decision about traversal strategy before
/// committing to a full traversal.
pub struct GraphSampler<'a> {
    conn: &'a Connection,
    schema: &'a GraphSchema,
    direction: Direction,
    hub_threshold: f64,
}

impl<'a> GraphSampler<'a> {
    pub fn new(conn: &'a Connection, schema: &'a GraphSchema, direction: Direction) -> Self {
        Self {
            conn,
            schema,
            direction,
            hub_threshold: DEFAULT_HUB_THRESHOLD,
        }
    }

    /// Overrides the hub detection threshold for this sampler.
    pub fn with_hub_threshold(mut self, threshold: f64) -> Self {
        self.hub_threshold = threshold;
        self
    }

    /// BFS up to `depth` layers from `start`, collecting structural metrics.
    pub fn sample(&self, start: &NodeId, depth: usize) -> Result<SampleResult> {
        self.schema.check_id(start)?;

        let mut frontier: Vec<NodeId> = vec![start.clone()];
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        visited.insert(start.clone());

        let mut level_sizes = vec![1usize];
        let mut edges_seen = 0usize;
        let mut expansion_factors: Vec<f64> = Vec::new();
        let mut terminated = false;

        for _ in 0..depth {
            if frontier.is_empty() {
                terminated = true;
                break;
            }

            let edges = fetch_edges(
                self.conn,
                self.schema,
                &frontier,
                self.direction,
                None,
                &EdgeFilters::default(),
            )?;
            edges_seen += edges.len();

            let frontier_set: FxHashSet<&NodeId> = frontier.iter().collect();
            let mut next_frontier: Vec<NodeId> = Vec::new();
            for edge in &edges {
                let target = match self.direction {
                    Direction::Outbound => Some(&edge.to),
                    Direction::Inbound => Some(&edge.from),
                    Direction::Both => {
                        if frontier_set.contains(&edge.from) {
                            Some(&edge.to)
                        } else if frontier_set.contains(&edge.to) {
                            Some(&edge.from)
                        } else {
                            None
                        }
                    }
                };
                if let Some(target) = target {
                    if !visited.contains(target) {
                        visited.insert(target.clone());
                        next_frontier.push(target.clone());
                    }
                }
            }

            expansion_factors.push(next_frontier.len() as f64 / frontier.len() as f64);
            level_sizes.push(next_frontier.len());
            frontier = next_frontier;
        }

        if frontier.is_empty() {
            terminated = true;
        }

        let growth_trend = detect_growth_trend(&level_sizes);
        let convergence_ratio = convergence_ratio(visited.len(), edges_seen);
        let max_expansion = expansion_factors.iter().copied().fold(0.0_f64, f64::max);
        let hub_detected = max_expansion > self.hub_threshold;
        let has_cycles = convergence_ratio < 0.9 && !terminated;

        debug!(
            visited = visited.len(),
            edges_seen,
            terminated,
            convergence_ratio,
            max_expansion,
            "sample complete"
        );

        Ok(SampleResult {
            visited_count: visited.len(),
            level_sizes,
            terminated,
            growth_trend,
            convergence_ratio,
            has_cycles,
            max_expansion_factor: max_expansion,
            hub_detected,
            edges_seen,
        })
    }
}

/// Compares averaged growth of the first half of observed layers to the
/// second half; 1.2x up is increasing, 0.8x down is decreasing.
fn detect_growth_trend(level_sizes: &[usize]) -> GrowthTrend {
    if level_sizes.len() < 3 {
        return GrowthTrend::Stable;
    }

    // Level 0 is always 1; growth rates start from level 1.
    let sizes = &level_sizes[1..];
    let mut growth_rates: Vec<f64> = Vec::new();
    for i in 1..sizes.len() {
        if sizes[i - 1] > 0 {
            growth_rates.push(sizes[i] as f64 / sizes[i - 1] as f64);
        } else {
            growth_rates.push(0.0);
        }
    }
    if growth_rates.is_empty() {
        return GrowthTrend::Stable;
    }

    let mid = growth_rates.len() / 2;
    if mid == 0 {
        return GrowthTrend::Stable;
    }
    let early_avg: f64 = growth_rates[..mid].iter().sum::<f64>() / mid as f64;
    let late_avg: f64 =
        growth_rates[mid..].iter().sum::<f64>() / (growth_rates.len() - mid) as f64;

    if late_avg > early_avg * 1.2 {
        GrowthTrend::Increasing
    } else if late_avg < early_avg * 0.8 {
        GrowthTrend::Decreasing
    } else {
        GrowthTrend::Stable
    }
}

/// For a tree, `visited == edges + 1`, so the ratio sits at 1.0. Shared
/// ancestry pushes it below.
fn convergence_ratio(visited: usize, edges_seen: usize) -> f64 {
    if edges_seen == 0 {
        return 1.0;
    }
    visited as f64 / (edges_seen + 1) as f64
}
