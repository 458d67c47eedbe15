//! Bounded bidirectional pathfinding.
//!
//! Loads only the relevant subgraph: a forward frontier from the start and a
//! backward frontier from the end grow until they meet, the depth cap is
//! hit, or the combined load crosses the node limit. The shortest path (and
//! optionally all equal-cost paths) is then computed in memory. "No path" is
//! a normal result, not an error.

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::db::access::{self, EdgeFilters};
use crate::error::{GraphError, Result};
use crate::graph::DiGraph;
use crate::handlers::{projection_with_ids, GraphView};
use crate::model::{Direction, NodeId, NodeRecord, PropertyValue};
use crate::safety::{MAX_DEPTH, MAX_NODES};

/// Per-call options for the pathfinding handlers.
#[derive(Debug, Clone)]
pub struct PathOptions {
    /// Edge weight column; `None` means hop count. Weights must be
    /// non-negative.
    pub weight_column: Option<String>,
    pub max_depth: usize,
    /// Override for the subgraph-load node limit.
    pub max_nodes: Option<usize>,
    /// Nodes to route around: edges touching them are never loaded.
    pub excluded_nodes: Vec<NodeId>,
    /// Trusted predicate fragment applied to edge fetches (`e.` alias).
    pub edge_filter: Option<String>,
    /// Point in time for temporal edge filtering.
    pub valid_at: Option<PropertyValue>,
    /// Cap for `all_shortest_paths`.
    pub max_paths: usize,
    /// Columns to hydrate for path nodes (`None` = all).
    pub collect_columns: Option<Vec<String>>,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            weight_column: None,
            max_depth: 20,
            max_nodes: None,
            excluded_nodes: Vec::new(),
            edge_filter: None,
            valid_at: None,
            max_paths: 10,
            collect_columns: None,
        }
    }
}

/// An edge along a returned path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub weight: f64,
}

/// Result of [`GraphView::shortest_path`].
#[derive(Debug, Clone)]
pub struct ShortestPathResult {
    /// Node keys from start to end; `None` when no path exists.
    pub path: Option<Vec<NodeId>>,
    pub path_nodes: Vec<NodeRecord>,
    /// Total weight, or hop count when unweighted; `None` without a path.
    pub distance: Option<f64>,
    pub edges: Vec<PathEdge>,
    /// Nodes loaded into the search graph.
    pub nodes_explored: usize,
    pub excluded_nodes: Vec<NodeId>,
    /// Why no path came back, when one didn't.
    pub error: Option<String>,
}

impl ShortestPathResult {
    fn not_found(explored: usize, excluded: &[NodeId], error: String) -> Self {
        Self {
            path: None,
            path_nodes: Vec::new(),
            distance: None,
            edges: Vec::new(),
            nodes_explored: explored,
            excluded_nodes: excluded.to_vec(),
            error: Some(error),
        }
    }
}

/// Result of [`GraphView::all_shortest_paths`].
#[derive(Debug, Clone)]
pub struct AllShortestPathsResult {
    /// Every minimum-cost path, capped at `max_paths`; all share `distance`.
    pub paths: Vec<Vec<NodeId>>,
    pub distance: Option<f64>,
    pub path_count: usize,
    pub nodes_explored: usize,
    pub excluded_nodes: Vec<NodeId>,
    pub error: Option<String>,
}

impl GraphView<'_> {
    /// Cheapest (weighted) or fewest-hop path between two nodes.
    ///
    /// # Errors
    /// * [`GraphError::SubgraphTooLarge`] when the bidirectional load
    ///   crosses the node limit.
    /// * [`GraphError::InvalidArgument`] on a negative edge weight.
    ///
    /// An unreachable endpoint is not an error: the result carries
    /// `path: None` and an explanation.
    pub fn shortest_path(
        &self,
        start: &NodeId,
        end: &NodeId,
        opts: &PathOptions,
    ) -> Result<ShortestPathResult> {
        self.schema.check_id(start)?;
        self.schema.check_id(end)?;
        let max_depth = opts.max_depth.min(MAX_DEPTH);
        let excluded: FxHashSet<NodeId> = opts.excluded_nodes.iter().cloned().collect();

        let (graph, explored) =
            self.load_bidirectional(start, end, max_depth, &excluded, opts)?;

        if !graph.contains(end) {
            return Ok(ShortestPathResult::not_found(
                explored,
                &opts.excluded_nodes,
                format!("no path found: target node {end} not reachable within depth {max_depth}"),
            ));
        }
        if !graph.contains(start) {
            return Ok(ShortestPathResult::not_found(
                explored,
                &opts.excluded_nodes,
                format!("no path found: start node {start} not in the loaded subgraph"),
            ));
        }

        let weighted = opts.weight_column.is_some();
        let s = graph.index_of(start).expect("checked above");
        let e = graph.index_of(end).expect("checked above");
        let Some((index_path, distance)) = graph.shortest_path(s, e, weighted) else {
            return Ok(ShortestPathResult::not_found(
                explored,
                &opts.excluded_nodes,
                "no path found between the start and end nodes".to_string(),
            ));
        };

        let path: Vec<NodeId> = index_path.iter().map(|&i| graph.node(i).clone()).collect();
        let mut edges = Vec::with_capacity(path.len().saturating_sub(1));
        for pair in index_path.windows(2) {
            edges.push(PathEdge {
                from: graph.node(pair[0]).clone(),
                to: graph.node(pair[1]).clone(),
                weight: graph.edge_weight(pair[0], pair[1]).unwrap_or(1.0),
            });
        }

        let projection = projection_with_ids(&self.schema, opts.collect_columns.as_deref());
        let path_nodes =
            access::fetch_nodes(self.conn, &self.schema, &path, projection.as_deref(), None)?;

        debug!(
            hops = path.len() - 1,
            distance,
            explored,
            "shortest path found"
        );
        Ok(ShortestPathResult {
            path: Some(path),
            path_nodes,
            distance: Some(distance),
            edges,
            nodes_explored: explored,
            excluded_nodes: opts.excluded_nodes.clone(),
            error: None,
        })
    }

    /// Every minimum-cost path between two nodes, sharing one distance.
    ///
    /// A first [`GraphView::shortest_path`] call establishes reachability and
    /// the distance; the forward subgraph is then reloaded and equal-cost
    /// paths enumerated, truncated to `max_paths`.
    pub fn all_shortest_paths(
        &self,
        start: &NodeId,
        end: &NodeId,
        opts: &PathOptions,
    ) -> Result<AllShortestPathsResult> {
        let excluded: FxHashSet<NodeId> = opts.excluded_nodes.iter().cloned().collect();
        let first = self.shortest_path(start, end, opts)?;
        if first.path.is_none() {
            return Ok(AllShortestPathsResult {
                paths: Vec::new(),
                distance: None,
                path_count: 0,
                nodes_explored: first.nodes_explored,
                excluded_nodes: opts.excluded_nodes.clone(),
                error: first.error,
            });
        }

        let max_depth = opts.max_depth.min(MAX_DEPTH);
        let (graph, explored) = self.load_forward(start, end, max_depth, &excluded, opts)?;

        let weighted = opts.weight_column.is_some();
        let (Some(s), Some(e)) = (graph.index_of(start), graph.index_of(end)) else {
            return Ok(AllShortestPathsResult {
                paths: Vec::new(),
                distance: None,
                path_count: 0,
                nodes_explored: explored,
                excluded_nodes: opts.excluded_nodes.clone(),
                error: Some("no path found".to_string()),
            });
        };
        let index_paths = graph.all_shortest_paths(s, e, weighted, opts.max_paths);
        if index_paths.is_empty() {
            return Ok(AllShortestPathsResult {
                paths: Vec::new(),
                distance: None,
                path_count: 0,
                nodes_explored: explored,
                excluded_nodes: opts.excluded_nodes.clone(),
                error: Some("no path found".to_string()),
            });
        }

        let paths: Vec<Vec<NodeId>> = index_paths
            .iter()
            .map(|p| p.iter().map(|&i| graph.node(i).clone()).collect())
            .collect();

        Ok(AllShortestPathsResult {
            path_count: paths.len(),
            paths,
            distance: first.distance,
            nodes_explored: explored,
            excluded_nodes: opts.excluded_nodes.clone(),
            error: None,
        })
    }

    /// Grows forward and backward frontiers until they meet, the depth cap
    /// is reached, or the combined load breaches the node limit. Edges
    /// touching excluded nodes are dropped at insertion time.
    fn load_bidirectional(
        &self,
        start: &NodeId,
        end: &NodeId,
        max_depth: usize,
        excluded: &FxHashSet<NodeId>,
        opts: &PathOptions,
    ) -> Result<(DiGraph, usize)> {
        let max_nodes = opts.max_nodes.unwrap_or(MAX_NODES);
        let filters = EdgeFilters {
            valid_at: opts.valid_at.as_ref(),
            sql_filter: opts.edge_filter.as_deref(),
        };
        let weight_col = opts.weight_column.as_deref();

        let mut graph = DiGraph::new();
        let mut forward_frontier: Vec<NodeId> = vec![start.clone()];
        let mut forward_visited: FxHashSet<NodeId> = FxHashSet::default();
        forward_visited.insert(start.clone());
        let mut backward_frontier: Vec<NodeId> = vec![end.clone()];
        let mut backward_visited: FxHashSet<NodeId> = FxHashSet::default();
        backward_visited.insert(end.clone());

        for _depth in 0..max_depth {
            if forward_frontier.is_empty() && backward_frontier.is_empty() {
                break;
            }
            if forward_visited
                .iter()
                .any(|n| backward_visited.contains(n))
            {
                break;
            }

            if !forward_frontier.is_empty() {
                let edges = access::fetch_edges(
                    self.conn,
                    &self.schema,
                    &forward_frontier,
                    Direction::Outbound,
                    weight_col,
                    &filters,
                )?;
                let mut next = Vec::new();
                for edge in edges {
                    if excluded.contains(&edge.from) || excluded.contains(&edge.to) {
                        continue;
                    }
                    let weight = self.checked_weight(&edge.from, &edge.to, edge.weight)?;
                    graph.add_edge(&edge.from, &edge.to, weight);
                    if forward_visited.insert(edge.to.clone()) {
                        next.push(edge.to);
                    }
                }
                forward_frontier = next;
            }

            if !backward_frontier.is_empty() {
                let edges = access::fetch_edges(
                    self.conn,
                    &self.schema,
                    &backward_frontier,
                    Direction::Inbound,
                    weight_col,
                    &filters,
                )?;
                let mut next = Vec::new();
                for edge in edges {
                    if excluded.contains(&edge.from) || excluded.contains(&edge.to) {
                        continue;
                    }
                    let weight = self.checked_weight(&edge.from, &edge.to, edge.weight)?;
                    graph.add_edge(&edge.from, &edge.to, weight);
                    if backward_visited.insert(edge.from.clone()) {
                        next.push(edge.from);
                    }
                }
                backward_frontier = next;
            }

            let combined = forward_visited.len() + backward_visited.len()
                - forward_visited
                    .iter()
                    .filter(|n| backward_visited.contains(*n))
                    .count();
            if combined > max_nodes {
                return Err(GraphError::SubgraphTooLarge(format!(
                    "path search loaded {combined} nodes, exceeds the limit of {max_nodes} \
                     (raise with max_nodes=N or add filters)"
                )));
            }

            if forward_visited
                .iter()
                .any(|n| backward_visited.contains(n))
            {
                break;
            }
        }

        let explored = forward_visited.len() + backward_visited.len()
            - forward_visited
                .iter()
                .filter(|n| backward_visited.contains(*n))
                .count();
        Ok((graph, explored))
    }

    /// Forward-only load from the start until the end is reached or depth
    /// runs out; used for equal-cost path enumeration.
    fn load_forward(
        &self,
        start: &NodeId,
        end: &NodeId,
        max_depth: usize,
        excluded: &FxHashSet<NodeId>,
        opts: &PathOptions,
    ) -> Result<(DiGraph, usize)> {
        let filters = EdgeFilters {
            valid_at: opts.valid_at.as_ref(),
            sql_filter: opts.edge_filter.as_deref(),
        };
        let weight_col = opts.weight_column.as_deref();

        let mut graph = DiGraph::new();
        let mut frontier: Vec<NodeId> = vec![start.clone()];
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        visited.insert(start.clone());

        for _depth in 0..max_depth {
            if frontier.is_empty() || visited.contains(end) {
                break;
            }
            let edges = access::fetch_edges(
                self.conn,
                &self.schema,
                &frontier,
                Direction::Outbound,
                weight_col,
                &filters,
            )?;
            let mut next = Vec::new();
            for edge in edges {
                if excluded.contains(&edge.from) || excluded.contains(&edge.to) {
                    continue;
                }
                let weight = self.checked_weight(&edge.from, &edge.to, edge.weight)?;
                graph.add_edge(&edge.from, &edge.to, weight);
                if visited.insert(edge.to.clone()) {
                    next.push(edge.to);
                }
            }
            frontier = next;
        }

        let explored = visited.len();
        Ok((graph, explored))
    }

    fn checked_weight(&self, from: &NodeId, to: &NodeId, weight: Option<f64>) -> Result<f64> {
        let weight = weight.unwrap_or(1.0);
        if weight < 0.0 {
            return Err(GraphError::InvalidArgument(format!(
                "negative edge weight {weight} on ({from} -> {to}); \
                 shortest-path search requires non-negative weights"
            )));
        }
        Ok(weight)
    }
}
