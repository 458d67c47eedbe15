//! Data model for schema-parameterized graph queries.
//!
//! The engine never owns entities: nodes and edges live in the caller's
//! relational tables, and every type here is a reference into them.
//!
//! # Key Types
//!
//! - [`GraphSchema`] - Names the table pair and key columns that form a graph
//! - [`NodeId`] - Ordered tuple of key values identifying one node
//! - [`KeyValue`] - A single scalar component of a [`NodeId`]
//! - [`PropertyValue`] - A hydrated column value
//! - [`Direction`] - Edge-following direction for traversal and sampling
//!
//! # Examples
//!
//! ```rust
//! use relgraph::{GraphSchema, NodeId};
//!
//! let schema = GraphSchema::new("suppliers", "supplier_links", "seller_id", "buyer_id")
//!     .with_soft_delete("deleted_at");
//!
//! let simple: NodeId = 42.into();
//! let composite = NodeId::composite([100.into(), "A".into()]);
//! assert_eq!(composite.arity(), 2);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{GraphError, Result};

/// One scalar component of a node key.
///
/// Key columns must hold integer, text, or blob values: keys are hashed and
/// compared structurally, which rules out floating-point columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    /// SQL NULL (edges with NULL endpoints hash like any other key)
    Null,
    /// 64-bit signed integer
    Int(i64),
    /// UTF-8 string
    Text(String),
    /// Arbitrary byte array
    Bytes(Vec<u8>),
}

impl KeyValue {
    pub(crate) fn from_sql_value(value: Value) -> Result<KeyValue> {
        match value {
            Value::Null => Ok(KeyValue::Null),
            Value::Integer(i) => Ok(KeyValue::Int(i)),
            Value::Text(s) => Ok(KeyValue::Text(s)),
            Value::Blob(b) => Ok(KeyValue::Bytes(b)),
            Value::Real(_) => Err(GraphError::InvalidArgument(
                "floating-point key columns are not supported".into(),
            )),
        }
    }

    pub(crate) fn to_sql_value(&self) -> Value {
        match self {
            KeyValue::Null => Value::Null,
            KeyValue::Int(i) => Value::Integer(*i),
            KeyValue::Text(s) => Value::Text(s.clone()),
            KeyValue::Bytes(b) => Value::Blob(b.clone()),
        }
    }
}

impl ToSql for KeyValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(self.to_sql_value()))
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => write!(f, "NULL"),
            KeyValue::Int(i) => write!(f, "{i}"),
            KeyValue::Text(s) => write!(f, "{s}"),
            KeyValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Text(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Text(v)
    }
}

/// Ordered tuple of key values identifying one node.
///
/// A single-column key is a 1-tuple; callers may build it from a scalar via
/// `From`. Equality and hashing are component-wise. The arity must match the
/// schema's `id_columns` or the handler rejects the call before any database
/// work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(SmallVec<[KeyValue; 2]>);

impl NodeId {
    /// Builds a single-component key.
    pub fn single(value: impl Into<KeyValue>) -> Self {
        NodeId(SmallVec::from_iter([value.into()]))
    }

    /// Builds a composite key from components in column order.
    pub fn composite(values: impl IntoIterator<Item = KeyValue>) -> Self {
        NodeId(SmallVec::from_iter(values))
    }

    /// Number of key components.
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Key components in column order.
    pub fn parts(&self) -> &[KeyValue] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "{}", self.0[0]);
        }
        write!(f, "(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, ")")
    }
}

impl From<i64> for NodeId {
    fn from(v: i64) -> Self {
        NodeId::single(v)
    }
}

impl From<&str> for NodeId {
    fn from(v: &str) -> Self {
        NodeId::single(v)
    }
}

impl From<KeyValue> for NodeId {
    fn from(v: KeyValue) -> Self {
        NodeId(SmallVec::from_iter([v]))
    }
}

impl FromIterator<KeyValue> for NodeId {
    fn from_iter<T: IntoIterator<Item = KeyValue>>(iter: T) -> Self {
        NodeId(SmallVec::from_iter(iter))
    }
}

/// A hydrated column value.
///
/// Arbitrary-precision NUMERIC columns are normalized to [`PropertyValue::Int`]
/// or [`PropertyValue::Float`] on the way out; nothing wider crosses the API.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// SQL NULL
    Null,
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point number
    Float(f64),
    /// UTF-8 string
    Text(String),
    /// Arbitrary byte array
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub(crate) fn to_sql_value(&self) -> Value {
        match self {
            PropertyValue::Null => Value::Null,
            PropertyValue::Int(i) => Value::Integer(*i),
            PropertyValue::Float(f) => Value::Real(*f),
            PropertyValue::Text(s) => Value::Text(s.clone()),
            PropertyValue::Bytes(b) => Value::Blob(b.clone()),
        }
    }

    pub(crate) fn from_sql_value(value: Value) -> PropertyValue {
        match value {
            Value::Null => PropertyValue::Null,
            Value::Integer(i) => PropertyValue::Int(i),
            Value::Real(f) => PropertyValue::Float(f),
            Value::Text(s) => PropertyValue::Text(s),
            Value::Blob(b) => PropertyValue::Bytes(b),
        }
    }

    /// Converts to a JSON value for callers exporting results.
    ///
    /// Byte arrays become JSON arrays of numbers; non-finite floats become
    /// JSON null (JSON has no representation for them).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::Null => serde_json::Value::Null,
            PropertyValue::Int(i) => serde_json::Value::Number((*i).into()),
            PropertyValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            PropertyValue::Text(s) => serde_json::Value::String(s.clone()),
            PropertyValue::Bytes(b) => {
                serde_json::Value::Array(b.iter().map(|&x| serde_json::Value::from(x)).collect())
            }
        }
    }

    /// Numeric view of the value, when it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl ToSql for PropertyValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(match self {
            PropertyValue::Null => Value::Null,
            PropertyValue::Int(i) => Value::Integer(*i),
            PropertyValue::Float(f) => Value::Real(*f),
            PropertyValue::Text(s) => Value::Text(s.clone()),
            PropertyValue::Bytes(b) => Value::Blob(b.clone()),
        }))
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

/// A hydrated node row, keyed by column name.
pub type NodeRecord = BTreeMap<String, PropertyValue>;

/// Converts a hydrated record to a JSON object.
pub fn record_to_json(record: &NodeRecord) -> serde_json::Value {
    serde_json::Value::Object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Edge-following direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Follow edges away from the frontier (`from_columns` match).
    Outbound,
    /// Follow edges toward the frontier (`to_columns` match).
    Inbound,
    /// Follow edges adjacent on either side.
    Both,
}

/// Names the table pair and columns that the engine treats as a graph.
///
/// Column arities must line up: `from_columns`, `to_columns`, and
/// `id_columns` all describe the same key shape. [`GraphSchema::validate`]
/// enforces this and every handler calls it first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSchema {
    /// Table containing nodes.
    pub nodes_table: String,
    /// Table containing edges.
    pub edges_table: String,
    /// Key column(s) in the nodes table.
    pub id_columns: Vec<String>,
    /// Edge source column(s).
    pub from_columns: Vec<String>,
    /// Edge target column(s).
    pub to_columns: Vec<String>,
    /// Tombstone column on the nodes table; rows with a non-null value are
    /// treated as absent.
    #[serde(default)]
    pub soft_delete_column: Option<String>,
    /// Edge validity window start column (NULL = open).
    #[serde(default)]
    pub temporal_start_column: Option<String>,
    /// Edge validity window end column (NULL = open).
    #[serde(default)]
    pub temporal_end_column: Option<String>,
}

impl GraphSchema {
    /// Builds a schema over single-column keys, with the node key column
    /// named `id`.
    pub fn new(
        nodes_table: impl Into<String>,
        edges_table: impl Into<String>,
        from_column: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            nodes_table: nodes_table.into(),
            edges_table: edges_table.into(),
            id_columns: vec!["id".to_string()],
            from_columns: vec![from_column.into()],
            to_columns: vec![to_column.into()],
            soft_delete_column: None,
            temporal_start_column: None,
            temporal_end_column: None,
        }
    }

    /// Builds a schema over composite keys. All three column lists must have
    /// the same arity.
    pub fn composite(
        nodes_table: impl Into<String>,
        edges_table: impl Into<String>,
        id_columns: Vec<String>,
        from_columns: Vec<String>,
        to_columns: Vec<String>,
    ) -> Self {
        Self {
            nodes_table: nodes_table.into(),
            edges_table: edges_table.into(),
            id_columns,
            from_columns,
            to_columns,
            soft_delete_column: None,
            temporal_start_column: None,
            temporal_end_column: None,
        }
    }

    /// Renames the node key column (single-column schemas).
    pub fn with_id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_columns = vec![id_column.into()];
        self
    }

    /// Enables soft-delete filtering via a tombstone column.
    pub fn with_soft_delete(mut self, column: impl Into<String>) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }

    /// Enables temporal filtering via a validity window column pair.
    pub fn with_temporal(
        mut self,
        start_column: impl Into<String>,
        end_column: impl Into<String>,
    ) -> Self {
        self.temporal_start_column = Some(start_column.into());
        self.temporal_end_column = Some(end_column.into());
        self
    }

    /// Key arity shared by endpoints and node ids.
    pub fn key_arity(&self) -> usize {
        self.id_columns.len()
    }

    /// Whether keys span more than one column.
    pub fn is_composite(&self) -> bool {
        self.key_arity() > 1
    }

    /// Checks column-arity agreement.
    pub fn validate(&self) -> Result<()> {
        let arity = self.id_columns.len();
        if arity == 0 {
            return Err(GraphError::InvalidArgument(
                "schema must name at least one id column".into(),
            ));
        }
        if self.from_columns.len() != arity || self.to_columns.len() != arity {
            return Err(GraphError::InvalidArgument(format!(
                "key arity mismatch: {} id column(s), {} from column(s), {} to column(s)",
                arity,
                self.from_columns.len(),
                self.to_columns.len()
            )));
        }
        Ok(())
    }

    /// Checks that a node id matches the schema's key arity.
    pub fn check_id(&self, id: &NodeId) -> Result<()> {
        if id.arity() != self.key_arity() {
            return Err(GraphError::InvalidArgument(format!(
                "node id {} has arity {}, schema expects {}",
                id,
                id.arity(),
                self.key_arity()
            )));
        }
        Ok(())
    }
}
