use relgraph::{
    AggregateOp, AggregateOptions, Direction, GraphError, GraphSchema, GraphView, NodeId,
    PropertyValue, Result, TraverseOptions,
};
use rusqlite::Connection;

fn open_bom_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE parts (
             id INTEGER PRIMARY KEY,
             name TEXT,
             lead_time_days INTEGER NOT NULL DEFAULT 0
         );
         CREATE TABLE bill_of_materials (
             parent_part_id INTEGER NOT NULL,
             child_part_id INTEGER NOT NULL,
             quantity REAL NOT NULL DEFAULT 1.0,
             lead_time_days REAL NOT NULL DEFAULT 0.0
         );",
    )
    .unwrap();
    conn
}

fn add_part(conn: &Connection, id: i64, name: &str) {
    conn.execute(
        "INSERT INTO parts (id, name) VALUES (?1, ?2)",
        rusqlite::params![id, name],
    )
    .unwrap();
}

fn add_bom(conn: &Connection, parent: i64, child: i64, quantity: f64, lead_time: f64) {
    conn.execute(
        "INSERT INTO bill_of_materials VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![parent, child, quantity, lead_time],
    )
    .unwrap();
}

fn schema() -> GraphSchema {
    GraphSchema::new("parts", "bill_of_materials", "parent_part_id", "child_part_id")
}

/// Four-level BOM with a shared subassembly:
///
/// ```text
/// 1 -(x2)-> 2 -(x4)-> 4 -(x2)-> 5
/// 1 -(x3)-> 3 -(x5)-> 4
/// ```
fn setup_bom(conn: &Connection) {
    for (id, name) in [
        (1, "finished good"),
        (2, "assembly a"),
        (3, "assembly b"),
        (4, "shared subpart"),
        (5, "raw material"),
    ] {
        add_part(conn, id, name);
    }
    add_bom(conn, 1, 2, 2.0, 5.0);
    add_bom(conn, 1, 3, 3.0, 7.0);
    add_bom(conn, 2, 4, 4.0, 2.0);
    add_bom(conn, 3, 4, 5.0, 3.0);
    add_bom(conn, 4, 5, 2.0, 1.0);
}

#[test]
fn bom_explosion_multiplies_and_sums_across_parents() -> Result<()> {
    let conn = open_bom_db();
    setup_bom(&conn);
    let view = GraphView::new(&conn, schema())?;

    let result = view.path_aggregate(
        &1.into(),
        "quantity",
        AggregateOp::Multiply,
        &AggregateOptions::default(),
    )?;

    // Path products: 1->2 = 2, 1->3 = 3, 1->2->4 = 8, 1->3->4 = 15,
    // then through 4->5 both paths double: 16 + 30.
    assert_eq!(result.aggregated_values[&NodeId::from(2)], 2.0);
    assert_eq!(result.aggregated_values[&NodeId::from(3)], 3.0);
    assert_eq!(result.aggregated_values[&NodeId::from(4)], 23.0);
    assert_eq!(result.aggregated_values[&NodeId::from(5)], 46.0);

    // The start node never appears in the output.
    assert!(!result.aggregated_values.contains_key(&NodeId::from(1)));
    assert_eq!(result.nodes.len(), 4);
    for record in &result.nodes {
        assert!(record.contains_key("aggregated_value"));
    }
    assert_eq!(result.operation, AggregateOp::Multiply);
    assert_eq!(result.value_column, "quantity");
    Ok(())
}

#[test]
fn sum_accumulates_lead_times_along_paths() -> Result<()> {
    let conn = open_bom_db();
    setup_bom(&conn);
    let view = GraphView::new(&conn, schema())?;

    let result = view.path_aggregate(
        &1.into(),
        "lead_time_days",
        AggregateOp::Sum,
        &AggregateOptions::default(),
    )?;

    // Path sums into 4: (5+2) + (7+3) = 17; into 5: (5+2+1) + (7+3+1) = 19.
    assert_eq!(result.aggregated_values[&NodeId::from(4)], 17.0);
    assert_eq!(result.aggregated_values[&NodeId::from(5)], 19.0);
    Ok(())
}

#[test]
fn min_and_max_reduce_over_alternative_paths() -> Result<()> {
    let conn = open_bom_db();
    setup_bom(&conn);
    let view = GraphView::new(&conn, schema())?;

    let max = view.path_aggregate(
        &1.into(),
        "lead_time_days",
        AggregateOp::Max,
        &AggregateOptions::default(),
    )?;
    // Largest single edge value seen on any path into 4: max(5,2,7,3) = 7.
    assert_eq!(max.aggregated_values[&NodeId::from(4)], 7.0);

    let min = view.path_aggregate(
        &1.into(),
        "lead_time_days",
        AggregateOp::Min,
        &AggregateOptions::default(),
    )?;
    // Smallest edge value on the cheapest path into 4: min over paths of
    // per-path minimum = min(min(5,2), min(7,3)) = 2.
    assert_eq!(min.aggregated_values[&NodeId::from(4)], 2.0);
    Ok(())
}

#[test]
fn count_matches_bfs_depth_for_trees_and_dags() -> Result<()> {
    let conn = open_bom_db();
    setup_bom(&conn);
    let view = GraphView::new(&conn, schema())?;

    let counted = view.path_aggregate(
        &1.into(),
        "quantity",
        AggregateOp::Count,
        &AggregateOptions::default(),
    )?;
    let traversed = view.traverse(&1.into(), &TraverseOptions::default())?;

    // Count with a min reduction is the shortest hop distance, which is
    // exactly what breadth-first path lengths measure.
    for (node, value) in &counted.aggregated_values {
        let bfs_hops = traversed.paths[node].len() - 1;
        assert_eq!(*value, bfs_hops as f64, "node {node}");
    }
    Ok(())
}

#[test]
fn inbound_aggregation_walks_toward_ancestors() -> Result<()> {
    let conn = open_bom_db();
    setup_bom(&conn);
    let view = GraphView::new(&conn, schema())?;

    let result = view.path_aggregate(
        &5.into(),
        "quantity",
        AggregateOp::Count,
        &AggregateOptions {
            direction: Direction::Inbound,
            ..AggregateOptions::default()
        },
    )?;
    // From the raw material upward: 4 is one hop, 2 and 3 two, 1 three.
    assert_eq!(result.aggregated_values[&NodeId::from(4)], 1.0);
    assert_eq!(result.aggregated_values[&NodeId::from(2)], 2.0);
    assert_eq!(result.aggregated_values[&NodeId::from(1)], 3.0);
    Ok(())
}

#[test]
fn cycles_do_not_hang_the_recursion() -> Result<()> {
    let conn = open_bom_db();
    for id in 1..=3 {
        add_part(&conn, id, "cyclic");
    }
    add_bom(&conn, 1, 2, 2.0, 1.0);
    add_bom(&conn, 2, 3, 2.0, 1.0);
    add_bom(&conn, 3, 1, 2.0, 1.0);
    let view = GraphView::new(&conn, schema())?;

    let result = view.path_aggregate(
        &1.into(),
        "quantity",
        AggregateOp::Multiply,
        &AggregateOptions {
            // Sampling infers a cycle but must not refuse the call.
            skip_estimation: true,
            ..AggregateOptions::default()
        },
    )?;
    // The walk 1 -> 2 -> 3 stops before revisiting 1.
    assert_eq!(result.aggregated_values[&NodeId::from(2)], 2.0);
    assert_eq!(result.aggregated_values[&NodeId::from(3)], 4.0);
    assert!(!result.aggregated_values.contains_key(&NodeId::from(1)));
    Ok(())
}

#[test]
fn depth_bound_truncates_deep_chains() -> Result<()> {
    let conn = open_bom_db();
    for id in 1..=6 {
        add_part(&conn, id, "chain");
    }
    for id in 1..=5 {
        add_bom(&conn, id, id + 1, 1.0, 1.0);
    }
    let view = GraphView::new(&conn, schema())?;

    let result = view.path_aggregate(
        &1.into(),
        "quantity",
        AggregateOp::Count,
        &AggregateOptions {
            max_depth: 3,
            ..AggregateOptions::default()
        },
    )?;
    assert!(result.aggregated_values.contains_key(&NodeId::from(4)));
    assert!(!result.aggregated_values.contains_key(&NodeId::from(5)));
    Ok(())
}

#[test]
fn multiply_overflow_surfaces_as_an_error() {
    let conn = open_bom_db();
    for id in 1..=4 {
        add_part(&conn, id, "huge");
    }
    for id in 1..=3 {
        add_bom(&conn, id, id + 1, 1e200, 1.0);
    }
    let view = GraphView::new(&conn, schema()).unwrap();

    // 1e200 * 1e200 exceeds f64 range two hops in; the call must refuse
    // rather than hand back inf as an aggregated value.
    let err = view
        .path_aggregate(
            &1.into(),
            "quantity",
            AggregateOp::Multiply,
            &AggregateOptions::default(),
        )
        .unwrap_err();
    match err {
        GraphError::InvalidArgument(message) => {
            assert!(message.contains("double precision"));
            assert!(message.contains("max_depth"));
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
}

#[test]
fn composite_keys_are_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE n (a INTEGER, b INTEGER, PRIMARY KEY (a, b));
         CREATE TABLE e (fa INTEGER, fb INTEGER, ta INTEGER, tb INTEGER, v REAL);",
    )
    .unwrap();
    let schema = GraphSchema::composite(
        "n",
        "e",
        vec!["a".into(), "b".into()],
        vec!["fa".into(), "fb".into()],
        vec!["ta".into(), "tb".into()],
    );
    let view = GraphView::new(&conn, schema).unwrap();
    let err = view
        .path_aggregate(
            &NodeId::composite([1.into(), 2.into()]),
            "v",
            AggregateOp::Sum,
            &AggregateOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidArgument(_)));
}

#[test]
fn both_direction_is_rejected() {
    let conn = open_bom_db();
    setup_bom(&conn);
    let view = GraphView::new(&conn, schema()).unwrap();
    let err = view
        .path_aggregate(
            &1.into(),
            "quantity",
            AggregateOp::Sum,
            &AggregateOptions {
                direction: Direction::Both,
                ..AggregateOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidArgument(_)));
}

#[test]
fn aggregated_value_rides_on_hydrated_records() -> Result<()> {
    let conn = open_bom_db();
    setup_bom(&conn);
    let view = GraphView::new(&conn, schema())?;

    let result = view.path_aggregate(
        &1.into(),
        "quantity",
        AggregateOp::Multiply,
        &AggregateOptions {
            collect_columns: Some(vec!["name".to_string()]),
            ..AggregateOptions::default()
        },
    )?;
    for record in &result.nodes {
        assert!(record.contains_key("name"));
        match &record["aggregated_value"] {
            PropertyValue::Float(v) => assert!(*v > 0.0),
            other => panic!("expected float aggregate, got {other:?}"),
        }
    }
    Ok(())
}
