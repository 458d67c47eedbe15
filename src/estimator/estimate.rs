//! Damped size estimation from sampling results.
//!
//! The model deliberately rejects naive `branching ^ depth` growth: it
//! extrapolates from the most recent layer's rate, damped by structural
//! signals (convergence, shrinking frontiers), and is always clamped by the
//! table bound when one is known. The bias runs toward under-estimation in
//! divergent trees and tight-but-safe estimates in convergent DAGs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::estimator::sampler::{GrowthTrend, SampleResult};

/// Tuning knobs for the estimation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationConfig {
    /// Universal damping baseline.
    pub base_damping: f64,
    /// Extra damping weight for convergent graphs.
    pub convergence_multiplier: f64,
    /// Extra damping for shrinking frontiers.
    pub decreasing_trend_multiplier: f64,
    /// Multiplied onto every extrapolated estimate.
    pub safety_margin: f64,
    /// Margin applied even when sampling terminated with an exact count.
    pub min_safety_margin: f64,
    /// Layers to sample before estimating.
    pub sample_depth: usize,
    /// Convergence ratios below this trigger convergence damping.
    pub convergence_threshold: f64,
    /// Growth-rate change below this counts as "stable".
    pub stable_growth_threshold: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            base_damping: 0.85,
            convergence_multiplier: 0.8,
            decreasing_trend_multiplier: 0.7,
            safety_margin: 1.2,
            min_safety_margin: 1.05,
            sample_depth: 5,
            convergence_threshold: 0.95,
            stable_growth_threshold: 0.2,
        }
    }
}

/// Estimates the nodes a traversal to `max_depth` would visit.
///
/// A terminated sample short-circuits: the count is exact and only the
/// minimal margin applies. Otherwise the most recent layer growth rate is
/// damped and extrapolated, the safety margin is applied, and the result is
/// clamped to `table_bound` when supplied.
pub fn estimate(
    sample: &SampleResult,
    max_depth: usize,
    table_bound: Option<usize>,
    config: &EstimationConfig,
) -> usize {
    let clamp = |value: usize| match table_bound {
        Some(bound) => value.min(bound),
        None => value,
    };

    if sample.terminated {
        let exact = (sample.visited_count as f64 * config.min_safety_margin).ceil() as usize;
        return clamp(exact);
    }

    let damping = compute_damping(sample, config);
    let extrapolated = damped_extrapolation(
        &sample.level_sizes,
        max_depth,
        damping,
        sample.visited_count,
    );
    let with_margin = (extrapolated as f64 * config.safety_margin) as usize;
    let result = clamp(with_margin);
    debug!(
        damping,
        extrapolated,
        result,
        ?table_bound,
        "size estimate"
    );
    result
}

/// Estimate plus a limit verdict in one call.
pub fn estimate_with_limit_check(
    sample: &SampleResult,
    max_depth: usize,
    max_nodes: usize,
    table_bound: Option<usize>,
    config: &EstimationConfig,
) -> (usize, bool) {
    let estimated = estimate(sample, max_depth, table_bound, config);
    (estimated, estimated <= max_nodes)
}

/// Adaptive damping from detected properties, clamped to `[0.3, 1.0]`.
fn compute_damping(sample: &SampleResult, config: &EstimationConfig) -> f64 {
    let mut damping = config.base_damping;

    if sample.convergence_ratio < config.convergence_threshold {
        // More sharing means more damping: a ratio of 0.5 means half the
        // frontier targets were already visited.
        damping *= config.convergence_multiplier * sample.convergence_ratio
            + (1.0 - config.convergence_multiplier);
    }

    if sample.growth_trend == GrowthTrend::Decreasing {
        damping *= config.decreasing_trend_multiplier;
    }

    damping.clamp(0.3, 1.0)
}

/// Extrapolates from sampled levels using the damped recent growth rate.
fn damped_extrapolation(
    level_sizes: &[usize],
    max_depth: usize,
    damping: f64,
    visited_so_far: usize,
) -> usize {
    if level_sizes.len() < 2 {
        return visited_so_far;
    }

    // The rate between the two most recent non-empty layers is more
    // predictive than the average in convergent graphs.
    let mut recent_rate = 0.0;
    for i in (1..level_sizes.len()).rev() {
        if level_sizes[i] > 0 && level_sizes[i - 1] > 0 {
            recent_rate = level_sizes[i] as f64 / level_sizes[i - 1] as f64;
            break;
        }
    }
    if recent_rate <= 0.0 {
        return visited_so_far;
    }

    let last_size = *level_sizes.last().expect("level_sizes is non-empty");
    let mut damped_rate = recent_rate * damping;

    if damped_rate <= 1.0 {
        // Growth dies out on its own: finite geometric tail, linear
        // continuation at exactly 1.
        let remaining = if damped_rate < 1.0 {
            (last_size as f64 * damped_rate / (1.0 - damped_rate)) as usize
        } else {
            last_size * max_depth.saturating_sub(level_sizes.len() - 1)
        };
        return visited_so_far + remaining;
    }

    let sampled_depth = level_sizes.len() - 1;
    if max_depth <= sampled_depth {
        return visited_so_far;
    }

    let mut estimated = visited_so_far;
    let mut current = last_size as f64;
    for _ in 0..(max_depth - sampled_depth) {
        current = (current * damped_rate).floor();
        if current < 1.0 {
            break;
        }
        estimated += current as usize;
        // Deeper layers converge harder, so the rate keeps shrinking.
        damped_rate *= damping;
    }
    estimated
}
