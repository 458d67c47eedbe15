//! Whole-subgraph network analytics.
//!
//! Centrality, connected components, density, and resilience all need
//! global structure, so these handlers load the full edge table into an
//! in-memory directed graph and refuse to run past the node limit. The
//! graph is directed throughout; component work uses the weak-connectivity
//! variant.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::db::access::{self, EdgeFilters};
use crate::error::{GraphError, Result};
use crate::graph::DiGraph;
use crate::handlers::{projection_with_ids, record_node_id, GraphView};
use crate::model::{Direction, NodeId, NodeRecord, PropertyValue};
use crate::safety::{MAX_NODES, MAX_RESULTS};

/// Records hydrated per component as a preview.
const COMPONENT_SAMPLE_SIZE: usize = 5;

/// Which centrality measure to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentralityKind {
    /// Connection count (fast).
    Degree,
    /// Bridge nodes between clusters (slowest; weight-aware).
    Betweenness,
    /// Average distance from all nodes (over incoming paths).
    Closeness,
    /// Importance from incoming links (weight-aware).
    Pagerank,
}

/// Per-call options shared by the network handlers.
#[derive(Debug, Clone, Default)]
pub struct NetworkOptions {
    /// Edge weight column, honored by betweenness and pagerank.
    pub weight_column: Option<String>,
    /// Trusted predicate fragment applied to the edge load (`e.` alias).
    pub edge_filter: Option<String>,
    /// Point in time for temporal edge filtering.
    pub valid_at: Option<PropertyValue>,
    /// Override for the whole-graph node limit.
    pub max_nodes: Option<usize>,
    /// Columns to hydrate (`None` = all).
    pub collect_columns: Option<Vec<String>>,
}

/// Basic statistics of a loaded graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphStatsSummary {
    pub nodes: usize,
    pub edges: usize,
    pub density: f64,
    /// Weak connectivity for the directed case.
    pub is_connected: bool,
}

/// One scored node in a centrality ranking.
#[derive(Debug, Clone)]
pub struct CentralityEntry {
    pub node_id: NodeId,
    /// Hydrated record; absent when the key never resolves in the nodes
    /// table.
    pub node: Option<NodeRecord>,
    pub score: f64,
}

/// Result of [`GraphView::centrality`].
#[derive(Debug, Clone)]
pub struct CentralityResult {
    /// Top-N entries, highest score first.
    pub results: Vec<CentralityEntry>,
    pub kind: CentralityKind,
    pub graph_stats: GraphStatsSummary,
    pub nodes_loaded: usize,
}

/// One weakly-connected component.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub node_ids: Vec<NodeId>,
    pub size: usize,
    pub sample_nodes: Vec<NodeRecord>,
}

/// Result of [`GraphView::connected_components`].
#[derive(Debug, Clone)]
pub struct ComponentsResult {
    /// Components of at least `min_size`, largest first.
    pub components: Vec<ComponentInfo>,
    pub component_count: usize,
    pub largest_component_size: usize,
    pub isolated_nodes: Vec<NodeId>,
    pub graph_stats: GraphStatsSummary,
}

/// Result of [`GraphView::graph_density`].
#[derive(Debug, Clone)]
pub struct DensityResult {
    pub nodes: usize,
    pub edges: usize,
    pub density: f64,
    pub is_directed: bool,
    pub is_weakly_connected: bool,
    /// Only computed when the graph is weakly connected.
    pub is_strongly_connected: Option<bool>,
    pub avg_degree: f64,
    pub max_degree: usize,
    pub min_degree: usize,
}

/// Result of [`GraphView::neighbors`].
#[derive(Debug, Clone)]
pub struct NeighborsResult {
    pub neighbors: Vec<NodeRecord>,
    pub outbound_count: usize,
    pub inbound_count: usize,
    /// Unique neighbors across both directions.
    pub total_degree: usize,
}

/// Result of [`GraphView::resilience_analysis`].
#[derive(Debug, Clone)]
pub struct ResilienceResult {
    pub node_removed: NodeId,
    pub node_removed_info: Option<NodeRecord>,
    /// Former neighbors that land in different components after removal.
    pub disconnected_pairs: Vec<(NodeId, NodeId)>,
    pub components_before: usize,
    pub components_after: usize,
    pub component_increase: usize,
    /// Nodes left with no edges at all.
    pub isolated_nodes: Vec<NodeId>,
    pub affected_node_count: usize,
    /// Removal split the graph or stranded nodes.
    pub is_critical: bool,
    /// Set when the node was absent from the graph.
    pub error: Option<String>,
}

impl GraphView<'_> {
    /// Top-N most central nodes with hydrated records and graph statistics.
    ///
    /// Loads the entire edge table into memory; refuses graphs past the node
    /// limit with [`GraphError::SubgraphTooLarge`].
    pub fn centrality(
        &self,
        kind: CentralityKind,
        top_n: usize,
        opts: &NetworkOptions,
    ) -> Result<CentralityResult> {
        let graph = self.load_full_graph(opts)?;
        let weighted = opts.weight_column.is_some();

        let scores = match kind {
            CentralityKind::Degree => graph.degree_centrality(),
            CentralityKind::Betweenness => graph.betweenness_centrality(weighted),
            CentralityKind::Closeness => graph.closeness_centrality(),
            CentralityKind::Pagerank => graph.pagerank(0.85, weighted),
        };

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| graph.node(a.0).cmp(graph.node(b.0)))
        });
        ranked.truncate(top_n.min(MAX_RESULTS));

        let ids: Vec<NodeId> = ranked.iter().map(|&(i, _)| graph.node(i).clone()).collect();
        let lookup = self.hydrate_lookup(&ids, opts)?;

        let results = ranked
            .into_iter()
            .map(|(idx, score)| {
                let node_id = graph.node(idx).clone();
                let node = lookup.get(&node_id).cloned();
                CentralityEntry {
                    node_id,
                    node,
                    score,
                }
            })
            .collect();

        Ok(CentralityResult {
            results,
            kind,
            graph_stats: summarize(&graph),
            nodes_loaded: graph.node_count(),
        })
    }

    /// Weakly-connected components of at least `min_size`, largest first.
    pub fn connected_components(
        &self,
        min_size: usize,
        opts: &NetworkOptions,
    ) -> Result<ComponentsResult> {
        let graph = self.load_full_graph(opts)?;

        let mut components = graph.weakly_connected_components();
        components.retain(|c| c.len() >= min_size);
        components.sort_by_key(|c| std::cmp::Reverse(c.len()));

        let largest = components.first().map(Vec::len).unwrap_or(0);
        let component_count = components.len();

        let mut infos = Vec::new();
        for component in components.into_iter().take(MAX_RESULTS) {
            let node_ids: Vec<NodeId> =
                component.iter().map(|&i| graph.node(i).clone()).collect();
            let sample_ids: Vec<NodeId> =
                node_ids.iter().take(COMPONENT_SAMPLE_SIZE).cloned().collect();
            let projection =
                projection_with_ids(&self.schema, opts.collect_columns.as_deref());
            let sample_nodes = access::fetch_nodes(
                self.conn,
                &self.schema,
                &sample_ids,
                projection.as_deref(),
                None,
            )?;
            infos.push(ComponentInfo {
                size: node_ids.len(),
                node_ids,
                sample_nodes,
            });
        }

        let isolated_nodes = graph
            .isolates()
            .into_iter()
            .map(|i| graph.node(i).clone())
            .collect();

        Ok(ComponentsResult {
            components: infos,
            component_count,
            largest_component_size: largest,
            isolated_nodes,
            graph_stats: summarize(&graph),
        })
    }

    /// Density and degree statistics without hydrating any nodes.
    pub fn graph_density(&self, opts: &NetworkOptions) -> Result<DensityResult> {
        let graph = self.load_full_graph(opts)?;
        let n = graph.node_count();

        let degrees: Vec<usize> = (0..n).map(|i| graph.degree(i)).collect();
        let (avg, max, min) = if degrees.is_empty() {
            (0.0, 0, 0)
        } else {
            (
                degrees.iter().sum::<usize>() as f64 / n as f64,
                *degrees.iter().max().expect("non-empty"),
                *degrees.iter().min().expect("non-empty"),
            )
        };

        let weak = graph.is_weakly_connected();
        Ok(DensityResult {
            nodes: n,
            edges: graph.edge_count(),
            density: graph.density(),
            is_directed: true,
            is_weakly_connected: weak,
            is_strongly_connected: weak.then(|| graph.is_strongly_connected()),
            avg_degree: avg,
            max_degree: max,
            min_degree: min,
        })
    }

    /// Hydrated 1-hop neighbors with per-direction edge counts.
    pub fn neighbors(
        &self,
        node_id: &NodeId,
        direction: Direction,
        opts: &NetworkOptions,
    ) -> Result<NeighborsResult> {
        self.schema.check_id(node_id)?;
        let filters = EdgeFilters {
            valid_at: opts.valid_at.as_ref(),
            sql_filter: opts.edge_filter.as_deref(),
        };
        let frontier = [node_id.clone()];

        let mut outbound_ids: Vec<NodeId> = Vec::new();
        let mut inbound_ids: Vec<NodeId> = Vec::new();
        if matches!(direction, Direction::Outbound | Direction::Both) {
            let edges = access::fetch_edges(
                self.conn,
                &self.schema,
                &frontier,
                Direction::Outbound,
                None,
                &filters,
            )?;
            outbound_ids = edges.into_iter().map(|e| e.to).collect();
        }
        if matches!(direction, Direction::Inbound | Direction::Both) {
            let edges = access::fetch_edges(
                self.conn,
                &self.schema,
                &frontier,
                Direction::Inbound,
                None,
                &filters,
            )?;
            inbound_ids = edges.into_iter().map(|e| e.from).collect();
        }

        let mut unique: Vec<NodeId> = Vec::new();
        let mut seen: FxHashSet<&NodeId> = FxHashSet::default();
        for id in outbound_ids.iter().chain(inbound_ids.iter()) {
            if seen.insert(id) {
                unique.push(id.clone());
            }
        }

        let projection = projection_with_ids(&self.schema, opts.collect_columns.as_deref());
        let neighbors = access::fetch_nodes(
            self.conn,
            &self.schema,
            &unique,
            projection.as_deref(),
            None,
        )?;

        Ok(NeighborsResult {
            neighbors,
            outbound_count: outbound_ids.len(),
            inbound_count: inbound_ids.len(),
            total_degree: unique.len(),
        })
    }

    /// Simulates removing one node and reports the connectivity fallout.
    ///
    /// An absent node is a soft error carried in the result, not an
    /// exception.
    pub fn resilience_analysis(
        &self,
        node_to_remove: &NodeId,
        opts: &NetworkOptions,
    ) -> Result<ResilienceResult> {
        self.schema.check_id(node_to_remove)?;
        let graph = self.load_full_graph(opts)?;

        if !graph.contains(node_to_remove) {
            return Ok(ResilienceResult {
                node_removed: node_to_remove.clone(),
                node_removed_info: None,
                disconnected_pairs: Vec::new(),
                components_before: 0,
                components_after: 0,
                component_increase: 0,
                isolated_nodes: Vec::new(),
                affected_node_count: 0,
                is_critical: false,
                error: Some(format!("node {node_to_remove} not found in graph")),
            });
        }

        let node_removed_info = access::fetch_nodes(
            self.conn,
            &self.schema,
            &[node_to_remove.clone()],
            None,
            None,
        )?
        .into_iter()
        .next();

        let components_before = graph.weakly_connected_components().len();
        let removed_idx = graph.index_of(node_to_remove).expect("checked above");

        let mut former_neighbors: Vec<NodeId> = Vec::new();
        let mut seen: FxHashSet<usize> = FxHashSet::default();
        for &n in graph
            .out_neighbors(removed_idx)
            .iter()
            .chain(graph.in_neighbors(removed_idx).iter())
        {
            if seen.insert(n) {
                former_neighbors.push(graph.node(n).clone());
            }
        }

        let reduced = graph.without_node(removed_idx);
        let after_components = reduced.weakly_connected_components();
        let components_after = after_components.len();
        let component_increase = components_after.saturating_sub(components_before);

        let mut disconnected_pairs: Vec<(NodeId, NodeId)> = Vec::new();
        if component_increase > 0 && former_neighbors.len() > 1 {
            let mut component_of: FxHashMap<NodeId, usize> = FxHashMap::default();
            for (comp_idx, component) in after_components.iter().enumerate() {
                for &i in component {
                    component_of.insert(reduced.node(i).clone(), comp_idx);
                }
            }
            for (i, a) in former_neighbors.iter().enumerate() {
                for b in former_neighbors.iter().skip(i + 1) {
                    if let (Some(ca), Some(cb)) = (component_of.get(a), component_of.get(b)) {
                        if ca != cb {
                            disconnected_pairs.push((a.clone(), b.clone()));
                        }
                    }
                }
            }
        }

        let isolated_nodes: Vec<NodeId> = reduced
            .isolates()
            .into_iter()
            .map(|i| reduced.node(i).clone())
            .collect();

        let mut affected: FxHashSet<&NodeId> = FxHashSet::default();
        for (a, b) in &disconnected_pairs {
            affected.insert(a);
            affected.insert(b);
        }
        for id in &isolated_nodes {
            affected.insert(id);
        }

        let is_critical = component_increase > 0 || !isolated_nodes.is_empty();
        debug!(
            components_before,
            components_after,
            isolated = isolated_nodes.len(),
            is_critical,
            "resilience analysis complete"
        );

        Ok(ResilienceResult {
            node_removed: node_to_remove.clone(),
            node_removed_info,
            affected_node_count: affected.len(),
            disconnected_pairs,
            components_before,
            components_after,
            component_increase,
            isolated_nodes,
            is_critical,
            error: None,
        })
    }

    /// Loads the full edge table, enforcing the whole-graph node limit.
    fn load_full_graph(&self, opts: &NetworkOptions) -> Result<DiGraph> {
        let filters = EdgeFilters {
            valid_at: opts.valid_at.as_ref(),
            sql_filter: opts.edge_filter.as_deref(),
        };
        let edges = access::fetch_all_edges(
            self.conn,
            &self.schema,
            opts.weight_column.as_deref(),
            &filters,
        )?;

        let mut graph = DiGraph::new();
        for edge in edges {
            graph.add_edge(&edge.from, &edge.to, edge.weight.unwrap_or(1.0));
        }

        let max_nodes = opts.max_nodes.unwrap_or(MAX_NODES);
        if graph.node_count() > max_nodes {
            return Err(GraphError::SubgraphTooLarge(format!(
                "graph has {} nodes, exceeds the limit of {max_nodes}; \
                 filter to a subgraph or raise max_nodes",
                graph.node_count()
            )));
        }
        Ok(graph)
    }

    fn hydrate_lookup(
        &self,
        ids: &[NodeId],
        opts: &NetworkOptions,
    ) -> Result<FxHashMap<NodeId, NodeRecord>> {
        let projection = projection_with_ids(&self.schema, opts.collect_columns.as_deref());
        let records =
            access::fetch_nodes(self.conn, &self.schema, ids, projection.as_deref(), None)?;
        let mut lookup = FxHashMap::default();
        for record in records {
            let id = record_node_id(&self.schema, &record)?;
            lookup.insert(id, record);
        }
        Ok(lookup)
    }
}

fn summarize(graph: &DiGraph) -> GraphStatsSummary {
    GraphStatsSummary {
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        density: graph.density(),
        is_connected: graph.is_weakly_connected(),
    }
}
