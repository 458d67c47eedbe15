//! Batched relational queries over a [`GraphSchema`].
//!
//! Frontier membership uses inlined parameter tuples: single-column keys
//! become `col IN (?, ...)`, composite keys become row-value membership
//! `(c1, c2) IN (VALUES (?, ?), ...)`. Large id sets are split into chunks
//! that stay under the backend's bound-parameter limit; results are the
//! union of the chunks.

use std::collections::BTreeMap;

use rusqlite::types::Value;
use rusqlite::Connection;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::db::deadline::StatementDeadline;
use crate::error::{GraphError, Result};
use crate::model::{Direction, GraphSchema, KeyValue, NodeId, NodeRecord, PropertyValue};
use crate::safety::{MAX_RESULTS, QUERY_TIMEOUT};

/// Keep comfortably under SQLITE_MAX_VARIABLE_NUMBER.
const MAX_PARAMS_PER_STATEMENT: usize = 30_000;

/// An edge row as it comes off the wire: endpoint keys plus the optional
/// weight column, already coerced to `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub weight: Option<f64>,
}

/// Per-call edge filters, composed with AND in a fixed order: soft-delete
/// join on both endpoints (from the schema), temporal window, then the
/// caller-supplied predicate fragment.
///
/// The `sql_filter` fragment is trusted caller input; integrations are
/// responsible for supplying safe SQL. Edge columns can be referenced
/// through the `e.` alias.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeFilters<'a> {
    pub valid_at: Option<&'a PropertyValue>,
    pub sql_filter: Option<&'a str>,
}

fn qualified(cols: &[String], alias: &str) -> String {
    cols.iter()
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn plain(cols: &[String]) -> String {
    cols.join(", ")
}

/// `col IN (?, ...)` or `(c1, c2) IN (VALUES (?, ?), ...)` for `rows` ids.
/// `alias` may be empty for unaliased tables.
fn membership_clause(cols: &[String], alias: &str, rows: usize) -> String {
    let prefix = if alias.is_empty() {
        String::new()
    } else {
        format!("{alias}.")
    };
    if cols.len() == 1 {
        let marks = vec!["?"; rows].join(", ");
        format!("{prefix}{} IN ({marks})", cols[0])
    } else {
        let col_tuple = cols
            .iter()
            .map(|c| format!("{prefix}{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let row_marks = vec!["?"; cols.len()].join(", ");
        let value_rows = vec![format!("({row_marks})"); rows].join(", ");
        format!("({col_tuple}) IN (VALUES {value_rows})")
    }
}

fn push_id_params(params: &mut Vec<Value>, id: &NodeId) {
    for part in id.parts() {
        params.push(part.to_sql_value());
    }
}

/// JOINs that hide soft-deleted endpoints. Empty when the schema carries no
/// tombstone column.
fn soft_delete_join(schema: &GraphSchema) -> String {
    let Some(del) = &schema.soft_delete_column else {
        return String::new();
    };
    let from_conds = schema
        .from_columns
        .iter()
        .zip(&schema.id_columns)
        .map(|(fc, ic)| format!("e.{fc} = n_from.{ic}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let to_conds = schema
        .to_columns
        .iter()
        .zip(&schema.id_columns)
        .map(|(tc, ic)| format!("e.{tc} = n_to.{ic}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        " JOIN {nodes} n_from ON {from_conds} AND n_from.{del} IS NULL\
         \n JOIN {nodes} n_to ON {to_conds} AND n_to.{del} IS NULL",
        nodes = schema.nodes_table,
    )
}

/// Validity-window condition; NULL bounds are open ends.
fn temporal_clause(schema: &GraphSchema, filters: &EdgeFilters<'_>) -> Option<String> {
    let (Some(start), Some(end)) = (
        &schema.temporal_start_column,
        &schema.temporal_end_column,
    ) else {
        return None;
    };
    filters.valid_at?;
    Some(format!(
        "(e.{start} IS NULL OR e.{start} <= ?) AND (e.{end} IS NULL OR e.{end} >= ?)"
    ))
}

fn push_temporal_params(params: &mut Vec<Value>, schema: &GraphSchema, filters: &EdgeFilters<'_>) {
    if schema.temporal_start_column.is_some() && schema.temporal_end_column.is_some() {
        if let Some(at) = filters.valid_at {
            let value = at.to_sql_value();
            params.push(value.clone());
            params.push(value);
        }
    }
}

fn node_id_from_row(row: &rusqlite::Row<'_>, offset: usize, arity: usize) -> Result<NodeId> {
    let mut parts = Vec::with_capacity(arity);
    for i in 0..arity {
        let value: Value = row.get(offset + i)?;
        parts.push(KeyValue::from_sql_value(value)?);
    }
    Ok(NodeId::from_iter(parts))
}

fn weight_from_row(row: &rusqlite::Row<'_>, index: usize) -> Result<Option<f64>> {
    let value: Value = row.get(index)?;
    match value {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(i as f64)),
        Value::Real(f) => Ok(Some(f)),
        _ => Err(GraphError::InvalidArgument(
            "weight column must be numeric".into(),
        )),
    }
}

/// Fetches every edge adjacent to the frontier in the given direction.
///
/// `outbound` matches rows whose from-columns are in the frontier, `inbound`
/// matches to-columns, and `both` takes the union (an edge adjacent on either
/// side qualifies exactly once). When `weight_column` is set the edge weight
/// rides along, coerced to `f64`.
pub fn fetch_edges(
    conn: &Connection,
    schema: &GraphSchema,
    frontier: &[NodeId],
    direction: Direction,
    weight_column: Option<&str>,
    filters: &EdgeFilters<'_>,
) -> Result<Vec<WireEdge>> {
    if frontier.is_empty() {
        return Ok(Vec::new());
    }

    let arity = schema.key_arity();
    let sides = if direction == Direction::Both { 2 } else { 1 };
    let chunk_rows = (MAX_PARAMS_PER_STATEMENT / (arity * sides)).max(1);

    let select_cols = format!(
        "{}, {}{}",
        qualified(&schema.from_columns, "e"),
        qualified(&schema.to_columns, "e"),
        weight_column
            .map(|w| format!(", e.{w}"))
            .unwrap_or_default()
    );
    let join = soft_delete_join(schema);
    let temporal = temporal_clause(schema, filters);

    let mut edges = Vec::new();
    for chunk in frontier.chunks(chunk_rows) {
        let frontier_cond = match direction {
            Direction::Outbound => membership_clause(&schema.from_columns, "e", chunk.len()),
            Direction::Inbound => membership_clause(&schema.to_columns, "e", chunk.len()),
            Direction::Both => format!(
                "({} OR {})",
                membership_clause(&schema.from_columns, "e", chunk.len()),
                membership_clause(&schema.to_columns, "e", chunk.len())
            ),
        };

        let mut conditions = vec![frontier_cond];
        if let Some(t) = &temporal {
            conditions.push(t.clone());
        }
        if let Some(f) = filters.sql_filter {
            conditions.push(format!("({f})"));
        }

        let sql = format!(
            "SELECT {select_cols} FROM {edges} e{join} WHERE {conds}",
            edges = schema.edges_table,
            conds = conditions.join(" AND "),
        );

        let mut params: Vec<Value> = Vec::with_capacity(chunk.len() * arity * sides + 2);
        for id in chunk {
            push_id_params(&mut params, id);
        }
        if direction == Direction::Both {
            for id in chunk {
                push_id_params(&mut params, id);
            }
        }
        push_temporal_params(&mut params, schema, filters);

        let _deadline = StatementDeadline::install(conn, QUERY_TIMEOUT);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        while let Some(row) = rows.next()? {
            let from = node_id_from_row(row, 0, arity)?;
            let to = node_id_from_row(row, arity, arity)?;
            let weight = match weight_column {
                Some(_) => weight_from_row(row, arity * 2)?,
                None => None,
            };
            edges.push(WireEdge { from, to, weight });
        }
    }

    debug!(
        frontier = frontier.len(),
        edges = edges.len(),
        ?direction,
        "fetched frontier edges"
    );
    Ok(edges)
}

/// Fetches the entire edge table (for whole-graph analytics).
pub fn fetch_all_edges(
    conn: &Connection,
    schema: &GraphSchema,
    weight_column: Option<&str>,
    filters: &EdgeFilters<'_>,
) -> Result<Vec<WireEdge>> {
    let arity = schema.key_arity();
    let select_cols = format!(
        "{}, {}{}",
        qualified(&schema.from_columns, "e"),
        qualified(&schema.to_columns, "e"),
        weight_column
            .map(|w| format!(", e.{w}"))
            .unwrap_or_default()
    );
    let join = soft_delete_join(schema);

    let mut conditions = Vec::new();
    if let Some(t) = temporal_clause(schema, filters) {
        conditions.push(t);
    }
    if let Some(f) = filters.sql_filter {
        conditions.push(format!("({f})"));
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT {select_cols} FROM {edges} e{join}{where_clause}",
        edges = schema.edges_table,
    );

    let mut params: Vec<Value> = Vec::new();
    push_temporal_params(&mut params, schema, filters);

    let _deadline = StatementDeadline::install(conn, QUERY_TIMEOUT);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
    let mut edges = Vec::new();
    while let Some(row) = rows.next()? {
        let from = node_id_from_row(row, 0, arity)?;
        let to = node_id_from_row(row, arity, arity)?;
        let weight = match weight_column {
            Some(_) => weight_from_row(row, arity * 2)?,
            None => None,
        };
        edges.push(WireEdge { from, to, weight });
    }
    debug!(edges = edges.len(), "loaded full edge table");
    Ok(edges)
}

/// Hydrates node records for an id set.
///
/// Input beyond [`MAX_RESULTS`] ids is silently truncated. Soft-deleted rows
/// are excluded when the schema carries a tombstone column. `order_by`
/// applies per statement; id sets large enough to be chunked come back in
/// chunk order.
pub fn fetch_nodes(
    conn: &Connection,
    schema: &GraphSchema,
    ids: &[NodeId],
    columns: Option<&[String]>,
    order_by: Option<&str>,
) -> Result<Vec<NodeRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = &ids[..ids.len().min(MAX_RESULTS)];

    let arity = schema.key_arity();
    let chunk_rows = (MAX_PARAMS_PER_STATEMENT / arity).max(1);
    let projection = match columns {
        Some(cols) => plain(cols),
        None => "*".to_string(),
    };

    let mut records = Vec::new();
    for chunk in ids.chunks(chunk_rows) {
        let mut conditions = vec![membership_clause(&schema.id_columns, "", chunk.len())];
        if let Some(del) = &schema.soft_delete_column {
            conditions.push(format!("{del} IS NULL"));
        }
        let order = order_by
            .map(|o| format!(" ORDER BY {o}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {projection} FROM {nodes} WHERE {conds}{order}",
            nodes = schema.nodes_table,
            conds = conditions.join(" AND "),
        );

        let mut params: Vec<Value> = Vec::with_capacity(chunk.len() * arity);
        for id in chunk {
            push_id_params(&mut params, id);
        }

        let _deadline = StatementDeadline::install(conn, QUERY_TIMEOUT);
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        while let Some(row) = rows.next()? {
            let mut record: NodeRecord = BTreeMap::new();
            for (i, name) in names.iter().enumerate() {
                let value: Value = row.get(i)?;
                record.insert(name.clone(), PropertyValue::from_sql_value(value));
            }
            records.push(record);
        }
    }
    Ok(records)
}

/// Tests one node against a predicate fragment.
pub fn matches_predicate(
    conn: &Connection,
    schema: &GraphSchema,
    id: &NodeId,
    predicate: &str,
) -> Result<bool> {
    schema.check_id(id)?;
    let id_cond = schema
        .id_columns
        .iter()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!(
        "SELECT 1 FROM {nodes} WHERE {id_cond} AND ({predicate}) LIMIT 1",
        nodes = schema.nodes_table,
    );
    let mut params: Vec<Value> = Vec::with_capacity(id.arity());
    push_id_params(&mut params, id);

    let _deadline = StatementDeadline::install(conn, QUERY_TIMEOUT);
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.exists(rusqlite::params_from_iter(params))?)
}

/// Returns the subset of `ids` whose node rows satisfy a predicate fragment.
/// One batched statement per chunk, regardless of the id count.
pub fn filter_matching(
    conn: &Connection,
    schema: &GraphSchema,
    ids: &[NodeId],
    predicate: &str,
) -> Result<FxHashSet<NodeId>> {
    if ids.is_empty() {
        return Ok(FxHashSet::default());
    }
    let arity = schema.key_arity();
    let chunk_rows = (MAX_PARAMS_PER_STATEMENT / arity).max(1);

    let mut matching = FxHashSet::default();
    for chunk in ids.chunks(chunk_rows) {
        let sql = format!(
            "SELECT {cols} FROM {nodes} WHERE {membership} AND ({predicate})",
            cols = plain(&schema.id_columns),
            nodes = schema.nodes_table,
            membership = membership_clause(&schema.id_columns, "", chunk.len()),
        );
        let mut params: Vec<Value> = Vec::with_capacity(chunk.len() * arity);
        for id in chunk {
            push_id_params(&mut params, id);
        }

        let _deadline = StatementDeadline::install(conn, QUERY_TIMEOUT);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        while let Some(row) = rows.next()? {
            matching.insert(node_id_from_row(row, 0, arity)?);
        }
    }
    Ok(matching)
}
