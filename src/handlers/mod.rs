//! Graph operation handlers.
//!
//! [`GraphView`] binds a database connection to a [`GraphSchema`] and
//! exposes the handler surface: frontier-batched traversal, recursive path
//! aggregation, bounded pathfinding, and whole-subgraph network analysis.
//! Handlers hold no state across calls; every result is a fresh allocation
//! and the connection is the only thing that outlives a call.

pub mod aggregate;
pub mod network;
pub mod pathfinding;
pub mod traversal;

use rusqlite::Connection;

use crate::error::{GraphError, Result};
use crate::model::{GraphSchema, KeyValue, NodeId, NodeRecord, PropertyValue};

pub use aggregate::{AggregateOp, AggregateOptions, PathAggregateResult};
pub use network::{
    CentralityEntry, CentralityKind, CentralityResult, ComponentInfo, ComponentsResult,
    DensityResult, GraphStatsSummary, NeighborsResult, NetworkOptions, ResilienceResult,
};
pub use pathfinding::{AllShortestPathsResult, PathEdge, PathOptions, ShortestPathResult};
pub use traversal::{CollectResult, TraverseOptions, TraverseResult};

/// A directed graph view over one `(nodes_table, edges_table)` pair.
///
/// The view borrows its connection for the duration of a call and presents a
/// synchronous full-result contract; callers drive cancellation by
/// interrupting the connection from another handle.
pub struct GraphView<'conn> {
    pub(crate) conn: &'conn Connection,
    pub(crate) schema: GraphSchema,
}

impl<'conn> GraphView<'conn> {
    /// Binds a connection to a schema, validating column arities up front.
    pub fn new(conn: &'conn Connection, schema: GraphSchema) -> Result<Self> {
        schema.validate()?;
        Ok(Self { conn, schema })
    }

    pub fn schema(&self) -> &GraphSchema {
        &self.schema
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }
}

/// Reads the node key back out of a hydrated record, in id-column order.
pub(crate) fn record_node_id(schema: &GraphSchema, record: &NodeRecord) -> Result<NodeId> {
    let mut parts = Vec::with_capacity(schema.id_columns.len());
    for col in &schema.id_columns {
        let value = record.get(col).ok_or_else(|| {
            GraphError::InvalidArgument(format!(
                "hydrated record is missing id column '{col}'"
            ))
        })?;
        let key = match value {
            PropertyValue::Null => KeyValue::Null,
            PropertyValue::Int(i) => KeyValue::Int(*i),
            PropertyValue::Text(s) => KeyValue::Text(s.clone()),
            PropertyValue::Bytes(b) => KeyValue::Bytes(b.clone()),
            PropertyValue::Float(_) => {
                return Err(GraphError::InvalidArgument(
                    "floating-point key columns are not supported".into(),
                ))
            }
        };
        parts.push(key);
    }
    Ok(NodeId::from_iter(parts))
}

/// Hydration projections must carry the id columns so records can be keyed
/// back to nodes.
pub(crate) fn projection_with_ids(
    schema: &GraphSchema,
    columns: Option<&[String]>,
) -> Option<Vec<String>> {
    columns.map(|cols| {
        let mut cols = cols.to_vec();
        for id_col in &schema.id_columns {
            if !cols.contains(id_col) {
                cols.push(id_col.clone());
            }
        }
        cols
    })
}
