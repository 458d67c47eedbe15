//! Catalog introspection and table statistics for estimation bounds.
//!
//! Hard bounds on graph size come from database metadata, independent of
//! sampling, so a runaway extrapolation can always be capped. Row counts
//! prefer the analyzer's statistics (`sqlite_stat1`) and fall back to an
//! exact count when none have been collected.

use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::debug;

use crate::db::deadline::StatementDeadline;
use crate::error::Result;
use crate::model::GraphSchema;
use crate::safety::QUERY_TIMEOUT;

/// Catalog-derived table statistics.
#[derive(Debug, Clone)]
pub struct TableStats {
    pub row_count: usize,
    /// Composite primary key: the many-to-many junction shape.
    pub is_junction: bool,
    /// A foreign key referencing the table itself.
    pub has_self_ref: bool,
    pub indexed_columns: Vec<String>,
    /// Distinct values in the from column(s), when supplied.
    pub unique_from_nodes: Option<usize>,
    /// Distinct values in the to column(s), when supplied.
    pub unique_to_nodes: Option<usize>,
    /// `edges / (|from| x |to|)` when both endpoint counts are known.
    pub density: Option<f64>,
}

/// Average and maximum degree per edge direction. Advisory; the guards do
/// not require it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CardinalityStats {
    pub avg_out_degree: f64,
    pub max_out_degree: f64,
    pub avg_in_degree: f64,
    pub max_in_degree: f64,
}

fn analyzer_row_count(conn: &Connection, table: &str) -> Result<Option<usize>> {
    let has_stats: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE name = 'sqlite_stat1' LIMIT 1")?
        .exists([])?;
    if !has_stats {
        return Ok(None);
    }
    let mut stmt = conn.prepare("SELECT stat FROM sqlite_stat1 WHERE tbl = ?1 LIMIT 1")?;
    let mut rows = stmt.query([table])?;
    if let Some(row) = rows.next()? {
        let stat: Value = row.get(0)?;
        if let Value::Text(text) = stat {
            if let Some(first) = text.split_whitespace().next() {
                if let Ok(n) = first.parse::<usize>() {
                    return Ok(Some(n));
                }
            }
        }
    }
    Ok(None)
}

fn count_distinct(conn: &Connection, table: &str, cols: &[String]) -> Result<usize> {
    let sql = if cols.len() == 1 {
        format!("SELECT COUNT(DISTINCT {col}) FROM {table}", col = cols[0])
    } else {
        format!(
            "SELECT COUNT(*) FROM (SELECT DISTINCT {cols} FROM {table})",
            cols = cols.join(", "),
        )
    };
    let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(n as usize)
}

/// Introspects the catalog and statistics views for one table.
///
/// When `from_columns`/`to_columns` are supplied, distinct endpoint counts
/// and density are computed as well.
pub fn table_stats(
    conn: &Connection,
    table: &str,
    from_columns: Option<&[String]>,
    to_columns: Option<&[String]>,
) -> Result<TableStats> {
    let _deadline = StatementDeadline::install(conn, QUERY_TIMEOUT);

    // Analyzer statistics are approximate but free; an empty answer means
    // ANALYZE has not run, so fall back to the exact count.
    let row_count = match analyzer_row_count(conn, table)? {
        Some(n) if n > 0 => n,
        _ => {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
            n as usize
        }
    };

    let pk_columns: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE pk > 0",
        [table],
        |row| row.get(0),
    )?;
    let is_junction = pk_columns >= 2;

    let has_self_ref: bool = conn
        .prepare("SELECT 1 FROM pragma_foreign_key_list(?1) WHERE \"table\" = ?1 LIMIT 1")?
        .exists([table])?;

    let mut indexed_columns = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT ii.name
             FROM pragma_index_list(?1) il, pragma_index_info(il.name) ii
             WHERE ii.name IS NOT NULL",
        )?;
        let mut rows = stmt.query([table])?;
        while let Some(row) = rows.next()? {
            indexed_columns.push(row.get::<_, String>(0)?);
        }
    }

    let mut unique_from = None;
    let mut unique_to = None;
    let mut density = None;
    if let (Some(from_cols), Some(to_cols)) = (from_columns, to_columns) {
        let uf = count_distinct(conn, table, from_cols)?;
        let ut = count_distinct(conn, table, to_cols)?;
        if uf > 0 && ut > 0 {
            density = Some(row_count as f64 / (uf as f64 * ut as f64));
        }
        unique_from = Some(uf);
        unique_to = Some(ut);
    }

    debug!(table, row_count, is_junction, has_self_ref, "table stats");

    Ok(TableStats {
        row_count,
        is_junction,
        has_self_ref,
        indexed_columns,
        unique_from_nodes: unique_from,
        unique_to_nodes: unique_to,
        density,
    })
}

/// Absolute upper bound on reachable nodes: the distinct keys appearing on
/// either end of any edge in the table.
pub fn table_bound(conn: &Connection, schema: &GraphSchema) -> Result<usize> {
    let from_cols = schema.from_columns.join(", ");
    let to_cols = schema.to_columns.join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM (
             SELECT {from_cols} FROM {edges}
             UNION
             SELECT {to_cols} FROM {edges}
         )",
        edges = schema.edges_table,
    );
    let _deadline = StatementDeadline::install(conn, QUERY_TIMEOUT);
    let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(n as usize)
}

/// Average and maximum out-/in-degree over the edge table.
pub fn cardinality_stats(conn: &Connection, schema: &GraphSchema) -> Result<CardinalityStats> {
    let _deadline = StatementDeadline::install(conn, QUERY_TIMEOUT);

    let degree_query = |cols: &str| {
        format!(
            "SELECT COALESCE(AVG(cnt), 0.0), COALESCE(MAX(cnt), 0)
             FROM (SELECT COUNT(*) AS cnt FROM {edges} GROUP BY {cols})",
            edges = schema.edges_table,
        )
    };

    let (avg_out, max_out): (f64, i64) = conn.query_row(
        &degree_query(&schema.from_columns.join(", ")),
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let (avg_in, max_in): (f64, i64) = conn.query_row(
        &degree_query(&schema.to_columns.join(", ")),
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(CardinalityStats {
        avg_out_degree: avg_out,
        max_out_degree: max_out as f64,
        avg_in_degree: avg_in,
        max_in_degree: max_in as f64,
    })
}
