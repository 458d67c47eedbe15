use std::collections::HashSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use relgraph::{
    Direction, GraphError, GraphSchema, GraphView, NodeId, PropertyValue, Result,
    TraverseOptions,
};
use rusqlite::Connection;

fn open_graph_db() -> Connection {
    // First caller installs the subscriber; parallel tests ignore the
    // already-initialized error.
    let _ = relgraph::logging::init_logging("relgraph=debug");
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE nodes (
             id INTEGER PRIMARY KEY,
             tier INTEGER NOT NULL DEFAULT 0,
             name TEXT,
             deleted_at TEXT
         );
         CREATE TABLE edges (
             src INTEGER NOT NULL,
             dst INTEGER NOT NULL,
             is_active INTEGER NOT NULL DEFAULT 1,
             valid_from INTEGER,
             valid_to INTEGER
         );
         CREATE INDEX idx_edges_src ON edges(src);
         CREATE INDEX idx_edges_dst ON edges(dst);",
    )
    .unwrap();
    conn
}

fn add_node(conn: &Connection, id: i64, tier: i64) {
    conn.execute(
        "INSERT INTO nodes (id, tier) VALUES (?1, ?2)",
        [id, tier],
    )
    .unwrap();
}

fn add_edge(conn: &Connection, src: i64, dst: i64) {
    conn.execute("INSERT INTO edges (src, dst) VALUES (?1, ?2)", [src, dst])
        .unwrap();
}

fn schema() -> GraphSchema {
    GraphSchema::new("nodes", "edges", "src", "dst")
}

/// Converging DAG with exactly 50 distinct nodes reachable from node 1 and
/// heavy cross-parent sharing, shallow enough for sampling to terminate.
fn setup_converging_dag(conn: &Connection) {
    // Layers: 1 + 7 + 14 + 14 + 14 = 50 nodes.
    let layers: Vec<Vec<i64>> = vec![
        vec![1],
        (2..9).collect(),
        (9..23).collect(),
        (23..37).collect(),
        (37..51).collect(),
    ];
    for layer in &layers {
        for &id in layer {
            add_node(conn, id, 0);
        }
    }
    for pair in layers.windows(2) {
        let (parents, children) = (&pair[0], &pair[1]);
        for (i, &child) in children.iter().enumerate() {
            // Two parents per child: shared ancestry everywhere.
            add_edge(conn, parents[i % parents.len()], child);
            add_edge(conn, parents[(i + 1) % parents.len()], child);
        }
    }
}

fn setup_hub(conn: &Connection, children: i64, grandchildren_each: i64) {
    conn.execute_batch("BEGIN").unwrap();
    add_node(conn, 1, 0);
    let mut next_id = 2;
    for _ in 0..children {
        let child = next_id;
        next_id += 1;
        add_node(conn, child, 1);
        add_edge(conn, 1, child);
        for _ in 0..grandchildren_each {
            let grandchild = next_id;
            next_id += 1;
            add_node(conn, grandchild, 2);
            add_edge(conn, child, grandchild);
        }
    }
    conn.execute_batch("COMMIT").unwrap();
}

#[test]
fn converging_dag_bounded_traversal() -> Result<()> {
    let conn = open_graph_db();
    setup_converging_dag(&conn);
    let view = GraphView::new(&conn, schema())?;

    let result = view.traverse(
        &1.into(),
        &TraverseOptions {
            max_depth: 10,
            ..TraverseOptions::default()
        },
    )?;

    assert_eq!(result.nodes_visited, 50);
    assert_eq!(result.nodes.len(), 50);
    assert_eq!(result.depth_reached, 4);
    Ok(())
}

#[test]
fn converging_dag_sample_terminates_with_tight_estimate() -> Result<()> {
    use relgraph::estimator::{estimate, EstimationConfig, GraphSampler};

    let conn = open_graph_db();
    setup_converging_dag(&conn);
    let s = schema();
    let sampler = GraphSampler::new(&conn, &s, Direction::Outbound);
    let sample = sampler.sample(&1.into(), 5)?;

    assert!(sample.terminated);
    assert_eq!(sample.visited_count, 50);
    assert!(sample.convergence_ratio < 0.95);

    let est = estimate(&sample, 10, None, &EstimationConfig::default());
    assert!(est <= 55);
    assert!(est >= 50);
    Ok(())
}

#[test]
fn hub_aborts_before_traversal() {
    let conn = open_graph_db();
    setup_hub(&conn, 500, 10);
    let view = GraphView::new(&conn, schema()).unwrap();

    let err = view
        .traverse(&1.into(), &TraverseOptions::default())
        .unwrap_err();
    match err {
        GraphError::SubgraphTooLarge(reason) => {
            assert!(reason.contains("hub"));
            assert!(reason.contains("500.0"));
        }
        other => panic!("expected SubgraphTooLarge, got {other:?}"),
    }
}

#[test]
fn hub_override_and_proceed() -> Result<()> {
    let conn = open_graph_db();
    setup_hub(&conn, 500, 10);
    let view = GraphView::new(&conn, schema())?;

    let result = view.traverse(
        &1.into(),
        &TraverseOptions {
            max_nodes: Some(100_000),
            skip_estimation: true,
            ..TraverseOptions::default()
        },
    )?;
    assert_eq!(result.nodes_visited, 1 + 500 + 5_000);
    Ok(())
}

#[test]
fn live_limit_breach_fails_mid_run() {
    let conn = open_graph_db();
    setup_hub(&conn, 500, 10);
    let view = GraphView::new(&conn, schema()).unwrap();

    let err = view
        .traverse(
            &1.into(),
            &TraverseOptions {
                max_nodes: Some(300),
                skip_estimation: true,
                ..TraverseOptions::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::SafetyLimitExceeded(_)));
}

#[test]
fn stop_condition_is_terminal_but_included() -> Result<()> {
    let conn = open_graph_db();
    // Chain with tiers: 1(t0) -> 2(t1) -> 3(t2) -> 4(t3).
    for (id, tier) in [(1, 0), (2, 1), (3, 2), (4, 3)] {
        add_node(&conn, id, tier);
    }
    add_edge(&conn, 1, 2);
    add_edge(&conn, 2, 3);
    add_edge(&conn, 3, 4);
    let view = GraphView::new(&conn, schema())?;

    let result = view.traverse(
        &1.into(),
        &TraverseOptions {
            stop_condition: Some("tier = 2".to_string()),
            ..TraverseOptions::default()
        },
    )?;

    // Node 3 matches: present in results, never expanded, so 4 is unseen.
    assert_eq!(result.nodes_visited, 3);
    assert_eq!(result.terminated_at, vec![NodeId::from(3)]);
    assert!(result.paths.contains_key(&NodeId::from(3)));
    assert!(!result.paths.contains_key(&NodeId::from(4)));

    // Terminal nodes are never the source of a traversed edge.
    for (from, _) in &result.edges {
        assert_ne!(from, &NodeId::from(3));
    }
    Ok(())
}

#[test]
fn stop_condition_on_start_blocks_expansion() -> Result<()> {
    let conn = open_graph_db();
    add_node(&conn, 1, 5);
    add_node(&conn, 2, 0);
    add_edge(&conn, 1, 2);
    let view = GraphView::new(&conn, schema())?;

    let result = view.traverse(
        &1.into(),
        &TraverseOptions {
            stop_condition: Some("tier = 5".to_string()),
            ..TraverseOptions::default()
        },
    )?;
    assert_eq!(result.nodes_visited, 1);
    assert_eq!(result.terminated_at, vec![NodeId::from(1)]);
    Ok(())
}

#[test]
fn paths_form_spanning_tree_from_start() -> Result<()> {
    let conn = open_graph_db();
    setup_converging_dag(&conn);
    let view = GraphView::new(&conn, schema())?;
    let start: NodeId = 1.into();

    let result = view.traverse(
        &start,
        &TraverseOptions {
            max_depth: 10,
            ..TraverseOptions::default()
        },
    )?;

    let edge_set: HashSet<(NodeId, NodeId)> = result.edges.iter().cloned().collect();
    assert_eq!(result.paths[&start], vec![start.clone()]);
    for (node, path) in &result.paths {
        assert_eq!(path.first(), Some(&start));
        assert_eq!(path.last(), Some(node));
        assert!(path.len() - 1 <= result.depth_reached);
        if node != &start {
            for hop in path.windows(2) {
                assert!(edge_set.contains(&(hop[0].clone(), hop[1].clone())));
            }
        }
    }
    // One discovery edge per non-start node in a single-direction traversal.
    assert_eq!(result.edges.len(), result.nodes_visited - 1);
    Ok(())
}

#[test]
fn inbound_traversal_walks_reverse() -> Result<()> {
    let conn = open_graph_db();
    for id in 1..=3 {
        add_node(&conn, id, 0);
    }
    add_edge(&conn, 1, 2);
    add_edge(&conn, 2, 3);
    let view = GraphView::new(&conn, schema())?;

    let result = view.traverse(
        &3.into(),
        &TraverseOptions {
            direction: Direction::Inbound,
            ..TraverseOptions::default()
        },
    )?;
    assert_eq!(result.nodes_visited, 3);
    assert_eq!(
        result.paths[&NodeId::from(1)],
        vec![3.into(), 2.into(), 1.into()]
    );
    Ok(())
}

#[test]
fn both_direction_reaches_across_orientation() -> Result<()> {
    let conn = open_graph_db();
    // 2 -> 1, 2 -> 3: from node 1, outbound finds nothing, both finds all.
    for id in 1..=3 {
        add_node(&conn, id, 0);
    }
    add_edge(&conn, 2, 1);
    add_edge(&conn, 2, 3);
    let view = GraphView::new(&conn, schema())?;

    let outbound = view.traverse(&1.into(), &TraverseOptions::default())?;
    assert_eq!(outbound.nodes_visited, 1);

    let both = view.traverse(
        &1.into(),
        &TraverseOptions {
            direction: Direction::Both,
            ..TraverseOptions::default()
        },
    )?;
    assert_eq!(both.nodes_visited, 3);
    Ok(())
}

#[test]
fn include_start_false_drops_start_from_output() -> Result<()> {
    let conn = open_graph_db();
    add_node(&conn, 1, 0);
    add_node(&conn, 2, 0);
    add_edge(&conn, 1, 2);
    let view = GraphView::new(&conn, schema())?;

    let result = view.traverse(
        &1.into(),
        &TraverseOptions {
            include_start: false,
            ..TraverseOptions::default()
        },
    )?;
    assert_eq!(result.nodes_visited, 2);
    assert_eq!(result.nodes.len(), 1);
    assert!(!result.paths.contains_key(&NodeId::from(1)));
    Ok(())
}

#[test]
fn soft_delete_and_edge_filter_compose() -> Result<()> {
    let conn = open_graph_db();
    for id in 1..=4 {
        add_node(&conn, id, 0);
    }
    conn.execute("UPDATE nodes SET deleted_at = '2024-01-01' WHERE id = 3", [])
        .unwrap();
    add_edge(&conn, 1, 2);
    add_edge(&conn, 1, 3);
    conn.execute(
        "INSERT INTO edges (src, dst, is_active) VALUES (1, 4, 0)",
        [],
    )
    .unwrap();

    let view = GraphView::new(&conn, schema().with_soft_delete("deleted_at"))?;
    let result = view.traverse(
        &1.into(),
        &TraverseOptions {
            edge_filter: Some("e.is_active = 1".to_string()),
            ..TraverseOptions::default()
        },
    )?;
    // Node 3 is tombstoned, the 1->4 edge is inactive.
    assert_eq!(result.nodes_visited, 2);
    Ok(())
}

#[test]
fn temporal_window_limits_traversal() -> Result<()> {
    let conn = open_graph_db();
    for id in 1..=3 {
        add_node(&conn, id, 0);
    }
    conn.execute(
        "INSERT INTO edges (src, dst, valid_from, valid_to) VALUES (1, 2, 100, 200)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO edges (src, dst, valid_from, valid_to) VALUES (1, 3, NULL, 50)",
        [],
    )
    .unwrap();

    let view = GraphView::new(
        &conn,
        schema().with_temporal("valid_from", "valid_to"),
    )?;
    let result = view.traverse(
        &1.into(),
        &TraverseOptions {
            valid_at: Some(PropertyValue::Int(150)),
            ..TraverseOptions::default()
        },
    )?;
    // Only the 1->2 edge is valid at t=150; 1->3 expired at 50.
    assert_eq!(result.nodes_visited, 2);
    assert!(result.paths.contains_key(&NodeId::from(2)));
    Ok(())
}

#[test]
fn traverse_collecting_returns_all_matches() -> Result<()> {
    let conn = open_graph_db();
    setup_converging_dag(&conn);
    conn.execute("UPDATE nodes SET tier = 3 WHERE id >= 37", [])
        .unwrap();
    let view = GraphView::new(&conn, schema())?;

    let result = view.traverse_collecting(
        &1.into(),
        "tier = 3",
        &TraverseOptions {
            max_depth: 10,
            ..TraverseOptions::default()
        },
    )?;
    assert_eq!(result.matching_nodes.len(), 14);
    assert_eq!(result.matching_paths.len(), 14);
    assert_eq!(result.total_traversed, 50);
    for record in &result.matching_nodes {
        assert_eq!(record["tier"], PropertyValue::Int(3));
    }
    Ok(())
}

#[test]
fn composite_keys_traverse_with_tuple_frontiers() -> Result<()> {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE line_items (
             order_id INTEGER NOT NULL,
             line_no INTEGER NOT NULL,
             sku TEXT,
             PRIMARY KEY (order_id, line_no)
         );
         CREATE TABLE item_links (
             parent_order INTEGER NOT NULL,
             parent_line INTEGER NOT NULL,
             child_order INTEGER NOT NULL,
             child_line INTEGER NOT NULL
         );
         INSERT INTO line_items VALUES
             (100, 1, 'a'), (100, 2, 'b'), (200, 1, 'c'), (200, 2, 'd');
         INSERT INTO item_links VALUES
             (100, 1, 100, 2),
             (100, 2, 200, 1),
             (200, 1, 200, 2);",
    )
    .unwrap();
    let schema = GraphSchema::composite(
        "line_items",
        "item_links",
        vec!["order_id".into(), "line_no".into()],
        vec!["parent_order".into(), "parent_line".into()],
        vec!["child_order".into(), "child_line".into()],
    );
    let view = GraphView::new(&conn, schema)?;

    let start = NodeId::composite([100.into(), 1.into()]);
    let result = view.traverse(&start, &TraverseOptions::default())?;
    assert_eq!(result.nodes_visited, 4);
    let deepest = NodeId::composite([200.into(), 2.into()]);
    assert_eq!(result.paths[&deepest].len(), 4);
    Ok(())
}

#[test]
fn arity_mismatch_is_rejected_before_db_work() {
    let conn = open_graph_db();
    let view = GraphView::new(&conn, schema()).unwrap();
    let composite = NodeId::composite([1.into(), 2.into()]);
    let err = view
        .traverse(&composite, &TraverseOptions::default())
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidArgument(_)));
}

#[test]
fn file_backed_database_works_like_memory() -> Result<()> {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let conn = Connection::open(tmp.path()).unwrap();
    conn.execute_batch(
        "CREATE TABLE nodes (id INTEGER PRIMARY KEY, tier INTEGER NOT NULL DEFAULT 0,
                             name TEXT, deleted_at TEXT);
         CREATE TABLE edges (src INTEGER NOT NULL, dst INTEGER NOT NULL,
                             is_active INTEGER NOT NULL DEFAULT 1,
                             valid_from INTEGER, valid_to INTEGER);",
    )
    .unwrap();
    for id in 1..=3 {
        add_node(&conn, id, 0);
    }
    add_edge(&conn, 1, 2);
    add_edge(&conn, 2, 3);

    let view = GraphView::new(&conn, schema())?;
    let result = view.traverse(&1.into(), &TraverseOptions::default())?;
    assert_eq!(result.nodes_visited, 3);
    Ok(())
}

#[test]
fn randomized_layered_dag_invariants_hold() -> Result<()> {
    let conn = open_graph_db();
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    // Random layered DAG: 6 layers, every node wired to 1-3 parents in the
    // previous layer.
    let mut next_id = 1i64;
    let mut previous: Vec<i64> = vec![next_id];
    add_node(&conn, next_id, 0);
    next_id += 1;
    for _ in 0..5 {
        let width = rng.gen_range(3..10);
        let mut layer = Vec::new();
        for _ in 0..width {
            let id = next_id;
            next_id += 1;
            add_node(&conn, id, 0);
            let parents = rng.gen_range(1..=3.min(previous.len()));
            let mut chosen: Vec<i64> = Vec::new();
            while chosen.len() < parents {
                let p = previous[rng.gen_range(0..previous.len())];
                if !chosen.contains(&p) {
                    chosen.push(p);
                }
            }
            for p in chosen {
                add_edge(&conn, p, id);
            }
            layer.push(id);
        }
        previous = layer;
    }

    let view = GraphView::new(&conn, schema())?;
    let result = view.traverse(
        &1.into(),
        &TraverseOptions {
            max_depth: 10,
            ..TraverseOptions::default()
        },
    )?;

    assert_eq!(result.nodes_visited, (next_id - 1) as usize);
    assert_eq!(result.edges.len(), result.nodes_visited - 1);
    let edge_set: HashSet<(NodeId, NodeId)> = result.edges.iter().cloned().collect();
    for (node, path) in &result.paths {
        assert_eq!(path.last(), Some(node));
        for hop in path.windows(2) {
            assert!(edge_set.contains(&(hop[0].clone(), hop[1].clone())));
        }
    }
    Ok(())
}
