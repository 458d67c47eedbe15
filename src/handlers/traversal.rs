//! Frontier-batched breadth-first traversal.
//!
//! Schema-parameterized: the handler knows nothing about the domain behind
//! the tables, only columns and keys. One edge query per layer regardless of
//! frontier size, a visited set as the sole cycle guard, and paths committed
//! to the first discoverer of each node.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::db::access::{self, EdgeFilters};
use crate::error::{GraphError, Result};
use crate::estimator::{check_guards, table_bound, EstimationConfig, GraphSampler};
use crate::estimator::sampler::DEFAULT_HUB_THRESHOLD;
use crate::handlers::{projection_with_ids, record_node_id, GraphView};
use crate::model::{Direction, NodeId, NodeRecord, PropertyValue};
use crate::safety::{check_limits, MAX_DEPTH, MAX_NODES};

/// Per-call traversal options.
#[derive(Debug, Clone)]
pub struct TraverseOptions {
    pub direction: Direction,
    /// Clamped to the process-wide depth cap.
    pub max_depth: usize,
    /// Predicate fragment marking terminal nodes: matches are returned but
    /// never expanded.
    pub stop_condition: Option<String>,
    /// Columns to hydrate (`None` = all). Id columns are always included.
    pub collect_columns: Option<Vec<String>>,
    /// Whether the start node appears in `nodes` and `paths`.
    pub include_start: bool,
    /// Override for the visited-node limit.
    pub max_nodes: Option<usize>,
    /// Bypass sampling and guards; the caller takes responsibility and the
    /// runtime limit checks still apply.
    pub skip_estimation: bool,
    pub estimation: EstimationConfig,
    /// Expansion factor above which the sampler flags a hub.
    pub hub_threshold: f64,
    /// Point in time for temporal edge filtering; requires the schema's
    /// validity-window columns.
    pub valid_at: Option<PropertyValue>,
    /// Trusted predicate fragment applied to edge fetches (`e.` alias).
    pub edge_filter: Option<String>,
    /// ORDER BY fragment for the hydration query.
    pub order_by: Option<String>,
}

impl Default for TraverseOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Outbound,
            max_depth: 10,
            stop_condition: None,
            collect_columns: None,
            include_start: true,
            max_nodes: None,
            skip_estimation: false,
            estimation: EstimationConfig::default(),
            hub_threshold: DEFAULT_HUB_THRESHOLD,
            valid_at: None,
            edge_filter: None,
            order_by: None,
        }
    }
}

/// Everything a traversal found.
#[derive(Debug, Clone)]
pub struct TraverseResult {
    /// Hydrated records for the visited nodes.
    pub nodes: Vec<NodeRecord>,
    /// Breadth-first spanning-tree path from the start to each node.
    pub paths: FxHashMap<NodeId, Vec<NodeId>>,
    /// Edges actually traversed, as stored `(from, to)` pairs.
    pub edges: Vec<(NodeId, NodeId)>,
    /// Deepest layer expanded.
    pub depth_reached: usize,
    /// Total unique nodes visited, start included.
    pub nodes_visited: usize,
    /// Nodes where the stop condition halted expansion.
    pub terminated_at: Vec<NodeId>,
}

/// Result of [`GraphView::traverse_collecting`].
#[derive(Debug, Clone)]
pub struct CollectResult {
    pub matching_nodes: Vec<NodeRecord>,
    pub matching_paths: FxHashMap<NodeId, Vec<NodeId>>,
    pub total_traversed: usize,
    pub depth_reached: usize,
}

impl GraphView<'_> {
    /// Breadth-first traversal from `start`.
    ///
    /// Unless estimation is skipped, a bounded sample and the table bound
    /// feed the guard first; a guard abort surfaces as
    /// [`GraphError::SubgraphTooLarge`] before any traversal work. During
    /// the run, depth and visited-count limits are re-checked at every
    /// layer boundary.
    ///
    /// # Errors
    /// * [`GraphError::SubgraphTooLarge`] when the guard refuses the call.
    /// * [`GraphError::SafetyLimitExceeded`] on a runtime limit breach.
    /// * [`GraphError::Backend`] for database failures, timeouts included.
    pub fn traverse(&self, start: &NodeId, opts: &TraverseOptions) -> Result<TraverseResult> {
        self.schema.check_id(start)?;
        let max_depth = opts.max_depth.min(MAX_DEPTH);
        let max_nodes = opts.max_nodes.unwrap_or(MAX_NODES);
        let filters = EdgeFilters {
            valid_at: opts.valid_at.as_ref(),
            sql_filter: opts.edge_filter.as_deref(),
        };

        if !opts.skip_estimation {
            self.guard_or_reject(start, opts.direction, max_depth, max_nodes, opts)?;
        }

        let mut frontier: Vec<NodeId> = vec![start.clone()];
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        visited.insert(start.clone());
        let mut paths: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        paths.insert(start.clone(), vec![start.clone()]);
        let mut edges_traversed: Vec<(NodeId, NodeId)> = Vec::new();
        let mut terminated_at: FxHashSet<NodeId> = FxHashSet::default();
        let mut depth_reached = 0usize;

        if let Some(condition) = &opts.stop_condition {
            if access::matches_predicate(self.conn, &self.schema, start, condition)? {
                terminated_at.insert(start.clone());
            }
        }

        for depth in 0..max_depth {
            if frontier.is_empty() {
                break;
            }
            check_limits(depth, visited.len(), max_nodes)?;

            let expandable: Vec<NodeId> = frontier
                .iter()
                .filter(|n| !terminated_at.contains(*n))
                .cloned()
                .collect();
            if expandable.is_empty() {
                break;
            }

            let edges = access::fetch_edges(
                self.conn,
                &self.schema,
                &expandable,
                opts.direction,
                None,
                &filters,
            )?;

            let expandable_set: FxHashSet<&NodeId> = expandable.iter().collect();
            let mut next_frontier: Vec<NodeId> = Vec::new();
            for edge in &edges {
                let (source, target) = match opts.direction {
                    Direction::Outbound => (&edge.from, &edge.to),
                    Direction::Inbound => (&edge.to, &edge.from),
                    Direction::Both => {
                        // The endpoint still in the expandable frontier is
                        // the source; edges with both ends visited (or
                        // neither end expandable) are dropped.
                        if expandable_set.contains(&edge.from) && !visited.contains(&edge.to) {
                            (&edge.from, &edge.to)
                        } else if expandable_set.contains(&edge.to)
                            && !visited.contains(&edge.from)
                        {
                            (&edge.to, &edge.from)
                        } else {
                            continue;
                        }
                    }
                };

                if !visited.contains(target) {
                    visited.insert(target.clone());
                    next_frontier.push(target.clone());
                    edges_traversed.push((edge.from.clone(), edge.to.clone()));
                    let mut path = paths
                        .get(source)
                        .cloned()
                        .unwrap_or_else(|| vec![source.clone()]);
                    path.push(target.clone());
                    paths.insert(target.clone(), path);
                }
            }

            if let Some(condition) = &opts.stop_condition {
                if !next_frontier.is_empty() {
                    let matches = access::filter_matching(
                        self.conn,
                        &self.schema,
                        &next_frontier,
                        condition,
                    )?;
                    terminated_at.extend(matches);
                }
            }

            debug!(
                depth,
                frontier = next_frontier.len(),
                visited = visited.len(),
                "layer expanded"
            );
            frontier = next_frontier;
            depth_reached = depth + 1;
        }

        let nodes_visited = visited.len();

        let mut to_hydrate: Vec<NodeId> = visited.into_iter().collect();
        if !opts.include_start {
            to_hydrate.retain(|n| n != start);
            paths.remove(start);
        }
        let projection = projection_with_ids(&self.schema, opts.collect_columns.as_deref());
        let nodes = access::fetch_nodes(
            self.conn,
            &self.schema,
            &to_hydrate,
            projection.as_deref(),
            opts.order_by.as_deref(),
        )?;

        Ok(TraverseResult {
            nodes,
            paths,
            edges: edges_traversed,
            depth_reached,
            nodes_visited,
            terminated_at: terminated_at.into_iter().collect(),
        })
    }

    /// Full traversal post-filtered to the nodes matching a predicate.
    ///
    /// Never short-circuits on the first match; the caller asked for all of
    /// them. The start node is excluded.
    pub fn traverse_collecting(
        &self,
        start: &NodeId,
        target_condition: &str,
        opts: &TraverseOptions,
    ) -> Result<CollectResult> {
        let mut traverse_opts = opts.clone();
        traverse_opts.stop_condition = None;
        traverse_opts.include_start = false;
        let result = self.traverse(start, &traverse_opts)?;

        let reached: Vec<NodeId> = result.paths.keys().cloned().collect();
        if reached.is_empty() {
            return Ok(CollectResult {
                matching_nodes: Vec::new(),
                matching_paths: FxHashMap::default(),
                total_traversed: result.nodes_visited,
                depth_reached: result.depth_reached,
            });
        }

        let matching =
            access::filter_matching(self.conn, &self.schema, &reached, target_condition)?;

        let mut matching_nodes = Vec::new();
        for record in result.nodes {
            if matching.contains(&record_node_id(&self.schema, &record)?) {
                matching_nodes.push(record);
            }
        }
        let matching_paths = result
            .paths
            .into_iter()
            .filter(|(id, _)| matching.contains(id))
            .collect();

        Ok(CollectResult {
            matching_nodes,
            matching_paths,
            total_traversed: result.nodes_visited,
            depth_reached: result.depth_reached,
        })
    }

    /// Samples, reads the table bound, and asks the guard; an unsafe verdict
    /// becomes [`GraphError::SubgraphTooLarge`].
    pub(crate) fn guard_or_reject(
        &self,
        start: &NodeId,
        direction: Direction,
        max_depth: usize,
        max_nodes: usize,
        opts: &TraverseOptions,
    ) -> Result<()> {
        let sample_depth = opts.estimation.sample_depth.min(max_depth);
        let sampler = GraphSampler::new(self.conn, &self.schema, direction)
            .with_hub_threshold(opts.hub_threshold);
        let sample = sampler.sample(start, sample_depth)?;
        let bound = table_bound(self.conn, &self.schema)?;
        let guard = check_guards(
            &sample,
            max_depth,
            max_nodes,
            None,
            Some(bound),
            &opts.estimation,
        );
        if !guard.safe_to_proceed {
            return Err(GraphError::SubgraphTooLarge(guard.reason));
        }
        Ok(())
    }
}
