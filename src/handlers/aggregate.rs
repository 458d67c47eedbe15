//! Path aggregation through one recursive relational query.
//!
//! Computes an accumulated numeric value for every node reachable from the
//! start: the value composes edge-by-edge along each path, then reduces
//! across alternative paths per operation. Bill-of-materials explosion is
//! the canonical use (`multiply` along the path, sum across parents).

use std::fmt;

use rusqlite::types::Value;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::db::deadline::StatementDeadline;
use crate::error::{GraphError, Result};
use crate::estimator::EstimationConfig;
use crate::estimator::sampler::DEFAULT_HUB_THRESHOLD;
use crate::handlers::{record_node_id, GraphView, TraverseOptions};
use crate::model::{Direction, KeyValue, NodeId, NodeRecord, PropertyValue};
use crate::safety::{MAX_DEPTH, QUERY_TIMEOUT};

/// How values compose along a path and reduce across paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    /// Add along the path; sum across paths.
    Sum,
    /// Largest value on any path.
    Max,
    /// Smallest value on any path.
    Min,
    /// Product along the path; sum of products across paths.
    Multiply,
    /// Edges on the path; minimum across paths (shortest distance).
    Count,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Max => "max",
            AggregateOp::Min => "min",
            AggregateOp::Multiply => "multiply",
            AggregateOp::Count => "count",
        }
    }

    /// Along-path accumulation expression for the recursive arm.
    fn accumulate(&self, value_col: &str) -> String {
        match self {
            AggregateOp::Sum => format!("w.path_value + e.{value_col}"),
            AggregateOp::Max => format!("MAX(w.path_value, e.{value_col})"),
            AggregateOp::Min => format!("MIN(w.path_value, e.{value_col})"),
            AggregateOp::Multiply => format!("w.path_value * e.{value_col}"),
            AggregateOp::Count => "w.path_value + 1".to_string(),
        }
    }

    /// Across-paths reduction for the final projection.
    fn reduce(&self) -> &'static str {
        match self {
            AggregateOp::Sum | AggregateOp::Multiply => "SUM(path_value)",
            AggregateOp::Max => "MAX(path_value)",
            AggregateOp::Min | AggregateOp::Count => "MIN(path_value)",
        }
    }

    fn initial(&self, value_col: &str) -> String {
        match self {
            AggregateOp::Count => "1".to_string(),
            _ => format!("e.{value_col}"),
        }
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call options for [`GraphView::path_aggregate`].
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// `Outbound` or `Inbound`; `Both` is rejected (paths need an
    /// orientation).
    pub direction: Direction,
    pub max_depth: usize,
    pub max_nodes: Option<usize>,
    pub skip_estimation: bool,
    pub estimation: EstimationConfig,
    pub hub_threshold: f64,
    pub valid_at: Option<PropertyValue>,
    pub edge_filter: Option<String>,
    pub collect_columns: Option<Vec<String>>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Outbound,
            max_depth: 20,
            max_nodes: None,
            skip_estimation: false,
            estimation: EstimationConfig::default(),
            hub_threshold: DEFAULT_HUB_THRESHOLD,
            valid_at: None,
            edge_filter: None,
            collect_columns: None,
        }
    }
}

/// Aggregated values for every reachable node.
#[derive(Debug, Clone)]
pub struct PathAggregateResult {
    /// Hydrated records, each carrying an `aggregated_value` column. The
    /// start node is excluded.
    pub nodes: Vec<NodeRecord>,
    pub aggregated_values: FxHashMap<NodeId, f64>,
    pub operation: AggregateOp,
    pub value_column: String,
    /// Deepest layer the structural traversal reached.
    pub max_depth: usize,
    pub nodes_visited: usize,
}

impl GraphView<'_> {
    /// Aggregates `value_column` along all paths from `start`.
    ///
    /// Estimation guards this call exactly like [`GraphView::traverse`]; the
    /// aggregation itself runs as a single recursive query with a
    /// path-membership cycle guard. Values accumulate in the database's
    /// widest numeric representation (64-bit floating point on this
    /// backend, never a 32-bit truncation) and surface as `f64`; `multiply`
    /// on deep chains can exceed that range, and an accumulation that
    /// overflows is an error, never a silently returned non-finite value.
    ///
    /// # Errors
    /// * [`GraphError::InvalidArgument`] for composite-key schemas (the
    ///   recursive query walks single-column keys), `direction: Both`, or
    ///   an accumulated value overflowing double precision.
    /// * [`GraphError::SubgraphTooLarge`] when the guard refuses the call.
    pub fn path_aggregate(
        &self,
        start: &NodeId,
        value_column: &str,
        operation: AggregateOp,
        opts: &AggregateOptions,
    ) -> Result<PathAggregateResult> {
        if self.schema.is_composite() {
            return Err(GraphError::InvalidArgument(
                "path_aggregate requires single-column keys".into(),
            ));
        }
        if opts.direction == Direction::Both {
            return Err(GraphError::InvalidArgument(
                "path_aggregate needs an oriented direction (outbound or inbound)".into(),
            ));
        }
        self.schema.check_id(start)?;
        let max_depth = opts.max_depth.min(MAX_DEPTH);

        // The structural traversal supplies node data, visited counts, and
        // the estimation guard.
        let traverse_opts = TraverseOptions {
            direction: opts.direction,
            max_depth,
            collect_columns: opts.collect_columns.clone(),
            include_start: true,
            max_nodes: opts.max_nodes,
            skip_estimation: opts.skip_estimation,
            estimation: opts.estimation.clone(),
            hub_threshold: opts.hub_threshold,
            valid_at: opts.valid_at.clone(),
            edge_filter: opts.edge_filter.clone(),
            ..TraverseOptions::default()
        };
        let traversed = self.traverse(start, &traverse_opts)?;

        let aggregated_values =
            self.aggregate_paths(start, value_column, operation, max_depth, opts)?;

        let mut nodes = Vec::with_capacity(traversed.nodes.len());
        for mut record in traversed.nodes {
            let node_id = record_node_id(&self.schema, &record)?;
            if &node_id == start {
                continue;
            }
            let value = aggregated_values.get(&node_id).copied().unwrap_or(0.0);
            record.insert(
                "aggregated_value".to_string(),
                PropertyValue::Float(value),
            );
            nodes.push(record);
        }

        Ok(PathAggregateResult {
            nodes,
            aggregated_values,
            operation,
            value_column: value_column.to_string(),
            max_depth: traversed.depth_reached,
            nodes_visited: traversed.nodes_visited,
        })
    }

    /// One recursive query: anchor on the start node's edges, grow paths
    /// while accumulating, refuse to revisit a node already on the path,
    /// then reduce per reached node.
    fn aggregate_paths(
        &self,
        start: &NodeId,
        value_column: &str,
        operation: AggregateOp,
        max_depth: usize,
        opts: &AggregateOptions,
    ) -> Result<FxHashMap<NodeId, f64>> {
        let schema = &self.schema;
        let (anchor_col, next_col) = match opts.direction {
            Direction::Outbound => (&schema.from_columns[0], &schema.to_columns[0]),
            Direction::Inbound => (&schema.to_columns[0], &schema.from_columns[0]),
            Direction::Both => unreachable!("rejected above"),
        };

        let mut edge_conditions = String::new();
        let temporal = match (
            &schema.temporal_start_column,
            &schema.temporal_end_column,
            &opts.valid_at,
        ) {
            (Some(ts), Some(te), Some(_)) => {
                edge_conditions.push_str(&format!(
                    " AND (e.{ts} IS NULL OR e.{ts} <= ?) AND (e.{te} IS NULL OR e.{te} >= ?)"
                ));
                true
            }
            _ => false,
        };
        if let Some(filter) = &opts.edge_filter {
            edge_conditions.push_str(&format!(" AND ({filter})"));
        }

        let initial = operation.initial(value_column);
        let accumulate = operation.accumulate(value_column);
        let reduce = operation.reduce();

        // Path keys ride along as delimited text for the cycle guard.
        let sql = format!(
            "WITH RECURSIVE walk(node_key, path_value, depth, path) AS (
                 SELECT e.{next_col},
                        CAST({initial} AS REAL),
                        1,
                        ',' || CAST(? AS TEXT) || ',' || CAST(e.{next_col} AS TEXT) || ','
                 FROM {edges} e
                 WHERE e.{anchor_col} = ?{edge_conditions}
                 UNION ALL
                 SELECT e.{next_col},
                        CAST(({accumulate}) AS REAL),
                        w.depth + 1,
                        w.path || CAST(e.{next_col} AS TEXT) || ','
                 FROM walk w
                 JOIN {edges} e ON e.{anchor_col} = w.node_key
                 WHERE w.depth < ?
                   AND instr(w.path, ',' || CAST(e.{next_col} AS TEXT) || ',') = 0\
                   {edge_conditions}
             )
             SELECT node_key, {reduce} FROM walk GROUP BY node_key",
            edges = schema.edges_table,
        );

        // Parameters in order of appearance: anchor path key, anchor match,
        // anchor temporal pair, recursion depth, recursive temporal pair.
        let start_key = start.parts()[0].clone();
        let mut params: Vec<Value> = vec![start_key.to_sql_value(), start_key.to_sql_value()];
        if temporal {
            if let Some(at) = &opts.valid_at {
                let v = at.to_sql_value();
                params.push(v.clone());
                params.push(v);
            }
        }
        params.push(Value::Integer(max_depth as i64));
        if temporal {
            if let Some(at) = &opts.valid_at {
                let v = at.to_sql_value();
                params.push(v.clone());
                params.push(v);
            }
        }

        let _deadline = StatementDeadline::install(self.conn, QUERY_TIMEOUT);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        let mut values = FxHashMap::default();
        while let Some(row) = rows.next()? {
            let key: Value = row.get(0)?;
            let node_id = NodeId::from(KeyValue::from_sql_value(key)?);
            let value: Value = row.get(1)?;
            let value = match value {
                Value::Null => 0.0,
                Value::Integer(i) => i as f64,
                Value::Real(f) => f,
                _ => {
                    return Err(GraphError::InvalidArgument(
                        "aggregated value column must be numeric".into(),
                    ))
                }
            };
            // Accumulation runs in the backend's 64-bit floats; overflow
            // lands here as inf/NaN and is refused, not returned.
            if !value.is_finite() {
                return Err(GraphError::InvalidArgument(format!(
                    "{operation} aggregation of column '{value_column}' overflowed double \
                     precision at node {node_id}; reduce max_depth or filter edges to a \
                     smaller subgraph"
                )));
            }
            values.insert(node_id, value);
        }
        debug!(
            nodes = values.len(),
            operation = %operation,
            "path aggregation complete"
        );
        Ok(values)
    }
}
