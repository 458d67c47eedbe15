//! # Relgraph - Graph Queries over Relational Tables
//!
//! Relgraph executes graph-style queries (traversal, shortest paths,
//! centrality, resilience, path aggregation) directly over a relational
//! store, without materializing a separate graph database. Any table pair
//! `(nodes_table, edges_table)` becomes a directed, optionally weighted,
//! optionally temporal graph; entities are identified by single or
//! composite keys.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relgraph::{GraphSchema, GraphView, TraverseOptions};
//!
//! let conn = rusqlite::Connection::open("supply_chain.db")?;
//! let schema = GraphSchema::new("suppliers", "supplier_links", "seller_id", "buyer_id");
//! let view = GraphView::new(&conn, schema)?;
//!
//! let result = view.traverse(&42.into(), &TraverseOptions::default())?;
//! println!("reached {} suppliers", result.nodes_visited);
//! # Ok::<(), relgraph::GraphError>(())
//! ```
//!
//! ## Safety model
//!
//! Every traversal-shaped call is guarded: a bounded sample of the graph
//! around the start node feeds a damped size estimate, capped by a hard
//! bound read from the catalog, and a guard decides whether to proceed.
//! Runaway structures (hub nodes, unbounded growth) are refused before any
//! heavy work with an error naming the override knobs. During execution the
//! process-wide depth and node limits are re-checked at every layer.
//!
//! ## Architecture
//!
//! - **Access layer** ([`db`]): batched parameterized queries per frontier,
//!   never one query per node; per-statement timeouts.
//! - **Estimator** ([`estimator`]): sampler, catalog bounds, damped
//!   extrapolation, guards.
//! - **In-memory graph** ([`graph`]): loaded subgraphs for pathfinding and
//!   whole-graph analytics.
//! - **Handlers** ([`handlers`]): the public operation surface on
//!   [`GraphView`].
//!
//! A handler call is one synchronous logical task owning its connection;
//! the engine keeps no mutable state across calls.

pub mod db;
pub mod error;
pub mod estimator;
pub mod graph;
pub mod handlers;
pub mod logging;
pub mod model;
pub mod safety;

pub use crate::error::{GraphError, Result};
pub use crate::estimator::{
    CardinalityStats, EstimationConfig, GraphSampler, GrowthTrend, GuardAction, GuardResult,
    SampleResult, TableStats,
};
pub use crate::graph::DiGraph;
pub use crate::handlers::{
    AggregateOp, AggregateOptions, AllShortestPathsResult, CentralityEntry, CentralityKind,
    CentralityResult, CollectResult, ComponentInfo, ComponentsResult, DensityResult,
    GraphStatsSummary, GraphView, NeighborsResult, NetworkOptions, PathAggregateResult,
    PathEdge, PathOptions, ResilienceResult, ShortestPathResult, TraverseOptions,
    TraverseResult,
};
pub use crate::model::{
    Direction, GraphSchema, KeyValue, NodeId, NodeRecord, PropertyValue,
};
pub use crate::safety::{MAX_DEPTH, MAX_NODES, MAX_RESULTS, QUERY_TIMEOUT};
