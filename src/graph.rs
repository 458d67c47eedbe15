//! In-memory directed graph for loaded subgraphs.
//!
//! Pathfinding and network analysis need global structure, so their handlers
//! load a bounded edge set into this adjacency-list graph and run the
//! algorithms here: BFS/Dijkstra shortest paths, equal-cost path
//! enumeration, weak/strong connectivity, and the four centrality measures.
//!
//! Node keys are interned to dense indices on insertion; adjacency lists
//! keep insertion order, so runs are deterministic given the same database
//! result ordering.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::model::NodeId;

const EPSILON: f64 = 1e-9;

/// Directed graph with `f64` edge weights (1.0 where none was supplied).
#[derive(Debug, Clone, Default)]
pub struct DiGraph {
    nodes: Vec<NodeId>,
    index: FxHashMap<NodeId, usize>,
    out: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    weights: FxHashMap<(usize, usize), f64>,
}

impl DiGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn node(&self, idx: usize) -> &NodeId {
        &self.nodes[idx]
    }

    /// All interned node keys, in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter()
    }

    fn intern(&mut self, id: &NodeId) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(id.clone());
        self.index.insert(id.clone(), idx);
        self.out.push(Vec::new());
        self.incoming.push(Vec::new());
        idx
    }

    /// Inserts an edge, interning both endpoints. A repeated edge updates the
    /// weight in place.
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId, weight: f64) {
        let f = self.intern(from);
        let t = self.intern(to);
        if self.weights.insert((f, t), weight).is_none() {
            self.out[f].push(t);
            self.incoming[t].push(f);
        }
    }

    /// Ensures a node exists even with no incident edges.
    pub fn add_node(&mut self, id: &NodeId) -> usize {
        self.intern(id)
    }

    pub fn edge_weight(&self, from: usize, to: usize) -> Option<f64> {
        self.weights.get(&(from, to)).copied()
    }

    pub fn out_neighbors(&self, idx: usize) -> &[usize] {
        &self.out[idx]
    }

    pub fn in_neighbors(&self, idx: usize) -> &[usize] {
        &self.incoming[idx]
    }

    pub fn out_degree(&self, idx: usize) -> usize {
        self.out[idx].len()
    }

    pub fn in_degree(&self, idx: usize) -> usize {
        self.incoming[idx].len()
    }

    pub fn degree(&self, idx: usize) -> usize {
        self.out_degree(idx) + self.in_degree(idx)
    }

    /// Directed density: `edges / (n * (n - 1))`.
    pub fn density(&self) -> f64 {
        let n = self.node_count();
        if n <= 1 {
            return 0.0;
        }
        self.edge_count() as f64 / (n * (n - 1)) as f64
    }

    /// Hop distances from `src` along out-edges; `None` marks unreachable.
    pub fn bfs_distances(&self, src: usize) -> Vec<Option<usize>> {
        let mut dist = vec![None; self.node_count()];
        dist[src] = Some(0);
        let mut queue = VecDeque::from([src]);
        while let Some(u) = queue.pop_front() {
            let du = dist[u].expect("queued nodes have distances");
            for &v in &self.out[u] {
                if dist[v].is_none() {
                    dist[v] = Some(du + 1);
                    queue.push_back(v);
                }
            }
        }
        dist
    }

    /// Dijkstra from `src`; returns distances and the predecessor tree.
    /// Requires non-negative weights (enforced at load time by callers).
    pub fn dijkstra(&self, src: usize) -> (Vec<f64>, Vec<Option<usize>>) {
        let n = self.node_count();
        let mut dist = vec![f64::INFINITY; n];
        let mut prev: Vec<Option<usize>> = vec![None; n];
        let mut heap = BinaryHeap::new();
        dist[src] = 0.0;
        heap.push(HeapEntry { cost: 0.0, node: src });

        while let Some(HeapEntry { cost, node: u }) = heap.pop() {
            if cost > dist[u] + EPSILON {
                continue;
            }
            for &v in &self.out[u] {
                let w = self.weights[&(u, v)];
                let candidate = dist[u] + w;
                if candidate + EPSILON < dist[v] {
                    dist[v] = candidate;
                    prev[v] = Some(u);
                    heap.push(HeapEntry {
                        cost: candidate,
                        node: v,
                    });
                }
            }
        }
        (dist, prev)
    }

    /// Cheapest (or fewest-hops) path between two interned nodes.
    ///
    /// Returns the index path and its cost; hop count serves as the cost in
    /// the unweighted case.
    pub fn shortest_path(
        &self,
        start: usize,
        end: usize,
        weighted: bool,
    ) -> Option<(Vec<usize>, f64)> {
        if weighted {
            let (dist, prev) = self.dijkstra(start);
            if dist[end].is_infinite() {
                return None;
            }
            let mut path = vec![end];
            let mut cursor = end;
            while cursor != start {
                cursor = prev[cursor]?;
                path.push(cursor);
            }
            path.reverse();
            Some((path, dist[end]))
        } else {
            let dist = self.bfs_distances(start);
            dist[end]?;
            // Reconstruct by walking backwards through in-neighbors one hop
            // closer to the start.
            let mut path = vec![end];
            let mut cursor = end;
            while cursor != start {
                let d = dist[cursor].expect("path nodes are reachable");
                let parent = self.incoming[cursor]
                    .iter()
                    .copied()
                    .find(|&p| dist[p] == Some(d - 1))?;
                path.push(parent);
                cursor = parent;
            }
            path.reverse();
            let hops = (path.len() - 1) as f64;
            Some((path, hops))
        }
    }

    /// Every minimum-cost path between two interned nodes, truncated to
    /// `max_paths`. Paths come back in DFS order over insertion-ordered
    /// adjacency.
    pub fn all_shortest_paths(
        &self,
        start: usize,
        end: usize,
        weighted: bool,
        max_paths: usize,
    ) -> Vec<Vec<usize>> {
        let dist: Vec<f64> = if weighted {
            self.dijkstra(start).0
        } else {
            self.bfs_distances(start)
                .into_iter()
                .map(|d| d.map(|x| x as f64).unwrap_or(f64::INFINITY))
                .collect()
        };
        if dist[end].is_infinite() {
            return Vec::new();
        }

        let mut paths = Vec::new();
        let mut stack = vec![start];
        self.enumerate_paths(&mut stack, end, &dist, weighted, max_paths, &mut paths);
        paths
    }

    fn enumerate_paths(
        &self,
        stack: &mut Vec<usize>,
        end: usize,
        dist: &[f64],
        weighted: bool,
        max_paths: usize,
        paths: &mut Vec<Vec<usize>>,
    ) {
        if paths.len() >= max_paths {
            return;
        }
        let u = *stack.last().expect("stack is non-empty");
        if u == end {
            paths.push(stack.clone());
            return;
        }
        for &v in &self.out[u] {
            let w = if weighted { self.weights[&(u, v)] } else { 1.0 };
            if (dist[u] + w - dist[v]).abs() <= EPSILON {
                stack.push(v);
                self.enumerate_paths(stack, end, dist, weighted, max_paths, paths);
                stack.pop();
                if paths.len() >= max_paths {
                    return;
                }
            }
        }
    }

    /// Weakly connected components as index sets, unordered.
    pub fn weakly_connected_components(&self) -> Vec<Vec<usize>> {
        let n = self.node_count();
        let mut seen = vec![false; n];
        let mut components = Vec::new();
        for root in 0..n {
            if seen[root] {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::from([root]);
            seen[root] = true;
            while let Some(u) = queue.pop_front() {
                component.push(u);
                for &v in self.out[u].iter().chain(self.incoming[u].iter()) {
                    if !seen[v] {
                        seen[v] = true;
                        queue.push_back(v);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    pub fn is_weakly_connected(&self) -> bool {
        !self.is_empty() && self.weakly_connected_components().len() == 1
    }

    /// Every node reaches every other along directed edges.
    pub fn is_strongly_connected(&self) -> bool {
        let n = self.node_count();
        if n == 0 {
            return false;
        }
        let forward = self.bfs_distances(0);
        if forward.iter().any(Option::is_none) {
            return false;
        }
        // Reverse reachability from the same root.
        let mut seen = vec![false; n];
        seen[0] = true;
        let mut queue = VecDeque::from([0]);
        let mut count = 1;
        while let Some(u) = queue.pop_front() {
            for &v in &self.incoming[u] {
                if !seen[v] {
                    seen[v] = true;
                    count += 1;
                    queue.push_back(v);
                }
            }
        }
        count == n
    }

    /// Nodes with no incident edges.
    pub fn isolates(&self) -> Vec<usize> {
        (0..self.node_count())
            .filter(|&i| self.degree(i) == 0)
            .collect()
    }

    /// Copy of the graph with one node (and its incident edges) removed.
    pub fn without_node(&self, removed: usize) -> DiGraph {
        let mut g = DiGraph::new();
        for (idx, id) in self.nodes.iter().enumerate() {
            if idx != removed {
                g.add_node(id);
            }
        }
        for (&(f, t), &w) in &self.weights {
            if f != removed && t != removed {
                g.add_edge(&self.nodes[f], &self.nodes[t], w);
            }
        }
        g
    }

    /// Degree centrality: `degree / (n - 1)`.
    pub fn degree_centrality(&self) -> Vec<f64> {
        let n = self.node_count();
        if n <= 1 {
            return vec![0.0; n];
        }
        let scale = 1.0 / (n - 1) as f64;
        (0..n).map(|i| self.degree(i) as f64 * scale).collect()
    }

    /// Closeness centrality over incoming distances, with the size-adjusted
    /// correction for disconnected graphs.
    pub fn closeness_centrality(&self) -> Vec<f64> {
        let n = self.node_count();
        let mut scores = vec![0.0; n];
        if n <= 1 {
            return scores;
        }
        for v in 0..n {
            // Distances of every node *to* v: BFS over in-edges.
            let mut dist = vec![None::<usize>; n];
            dist[v] = Some(0);
            let mut queue = VecDeque::from([v]);
            let mut total = 0usize;
            let mut reachable = 1usize;
            while let Some(u) = queue.pop_front() {
                let du = dist[u].expect("queued nodes have distances");
                for &p in &self.incoming[u] {
                    if dist[p].is_none() {
                        dist[p] = Some(du + 1);
                        total += du + 1;
                        reachable += 1;
                        queue.push_back(p);
                    }
                }
            }
            if total > 0 {
                let r = (reachable - 1) as f64;
                scores[v] = (r / total as f64) * (r / (n - 1) as f64);
            }
        }
        scores
    }

    /// Betweenness centrality (Brandes), normalized for directed graphs.
    /// Weighted variants accumulate over cheapest paths via Dijkstra.
    pub fn betweenness_centrality(&self, weighted: bool) -> Vec<f64> {
        let n = self.node_count();
        let mut centrality = vec![0.0; n];

        for s in 0..n {
            // Single-source shortest-path DAG: order of settlement, path
            // counts, and predecessor lists.
            let mut sigma = vec![0.0_f64; n];
            let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
            let mut order: Vec<usize> = Vec::new();
            sigma[s] = 1.0;

            if weighted {
                let mut dist = vec![f64::INFINITY; n];
                let mut settled = vec![false; n];
                dist[s] = 0.0;
                let mut heap = BinaryHeap::new();
                heap.push(HeapEntry { cost: 0.0, node: s });
                while let Some(HeapEntry { cost, node: u }) = heap.pop() {
                    if settled[u] || cost > dist[u] + EPSILON {
                        continue;
                    }
                    settled[u] = true;
                    order.push(u);
                    for &v in &self.out[u] {
                        let candidate = dist[u] + self.weights[&(u, v)];
                        if candidate + EPSILON < dist[v] {
                            dist[v] = candidate;
                            sigma[v] = sigma[u];
                            preds[v] = vec![u];
                            heap.push(HeapEntry {
                                cost: candidate,
                                node: v,
                            });
                        } else if (candidate - dist[v]).abs() <= EPSILON && !settled[v] {
                            sigma[v] += sigma[u];
                            preds[v].push(u);
                        }
                    }
                }
            } else {
                let mut dist = vec![None::<usize>; n];
                dist[s] = Some(0);
                let mut queue = VecDeque::from([s]);
                while let Some(u) = queue.pop_front() {
                    order.push(u);
                    let du = dist[u].expect("queued nodes have distances");
                    for &v in &self.out[u] {
                        match dist[v] {
                            None => {
                                dist[v] = Some(du + 1);
                                sigma[v] = sigma[u];
                                preds[v] = vec![u];
                                queue.push_back(v);
                            }
                            Some(dv) if dv == du + 1 => {
                                sigma[v] += sigma[u];
                                preds[v].push(u);
                            }
                            Some(_) => {}
                        }
                    }
                }
            }

            // Dependency accumulation in reverse settlement order.
            let mut delta = vec![0.0_f64; n];
            for &w in order.iter().rev() {
                for &p in &preds[w] {
                    delta[p] += sigma[p] / sigma[w] * (1.0 + delta[w]);
                }
                if w != s {
                    centrality[w] += delta[w];
                }
            }
        }

        if n > 2 {
            let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
            for score in &mut centrality {
                *score *= scale;
            }
        }
        centrality
    }

    /// PageRank by power iteration with uniform teleport; out-edge mass is
    /// split proportionally to weight when `weighted` is set.
    pub fn pagerank(&self, damping: f64, weighted: bool) -> Vec<f64> {
        const MAX_ITERATIONS: usize = 100;
        const TOLERANCE: f64 = 1e-6;

        let n = self.node_count();
        if n == 0 {
            return Vec::new();
        }
        let uniform = 1.0 / n as f64;
        let mut rank = vec![uniform; n];

        let out_mass: Vec<f64> = (0..n)
            .map(|u| {
                if weighted {
                    self.out[u].iter().map(|&v| self.weights[&(u, v)]).sum()
                } else {
                    self.out[u].len() as f64
                }
            })
            .collect();

        for _ in 0..MAX_ITERATIONS {
            let dangling: f64 = (0..n)
                .filter(|&u| out_mass[u] <= 0.0)
                .map(|u| rank[u])
                .sum();
            let base = (1.0 - damping) * uniform + damping * dangling * uniform;
            let mut next = vec![base; n];
            for u in 0..n {
                if out_mass[u] <= 0.0 {
                    continue;
                }
                for &v in &self.out[u] {
                    let share = if weighted {
                        self.weights[&(u, v)] / out_mass[u]
                    } else {
                        1.0 / out_mass[u]
                    };
                    next[v] += damping * rank[u] * share;
                }
            }
            let change: f64 = rank
                .iter()
                .zip(&next)
                .map(|(a, b)| (a - b).abs())
                .sum();
            rank = next;
            if change < TOLERANCE * n as f64 {
                break;
            }
        }
        rank
    }
}

/// Min-heap entry ordered by cost, ties broken by node index for
/// determinism.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    cost: f64,
    node: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert for min-cost extraction.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: i64) -> NodeId {
        NodeId::from(v)
    }

    fn diamond() -> DiGraph {
        // a -> b -> d, a -> c -> d
        let mut g = DiGraph::new();
        g.add_edge(&id(1), &id(2), 1.0);
        g.add_edge(&id(1), &id(3), 1.0);
        g.add_edge(&id(2), &id(4), 1.0);
        g.add_edge(&id(3), &id(4), 1.0);
        g
    }

    #[test]
    fn add_edge_interns_and_dedupes() {
        let mut g = diamond();
        assert_eq!(g.node_count(), 4);
        assert_eq!(g.edge_count(), 4);
        g.add_edge(&id(1), &id(2), 5.0);
        assert_eq!(g.edge_count(), 4);
        let (a, b) = (g.index_of(&id(1)).unwrap(), g.index_of(&id(2)).unwrap());
        assert_eq!(g.edge_weight(a, b), Some(5.0));
    }

    #[test]
    fn unweighted_shortest_path_counts_hops() {
        let g = diamond();
        let (s, e) = (g.index_of(&id(1)).unwrap(), g.index_of(&id(4)).unwrap());
        let (path, cost) = g.shortest_path(s, e, false).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(cost, 2.0);
    }

    #[test]
    fn weighted_shortest_path_prefers_cheap_route() {
        let mut g = DiGraph::new();
        g.add_edge(&id(1), &id(2), 10.0);
        g.add_edge(&id(1), &id(3), 1.0);
        g.add_edge(&id(3), &id(2), 2.0);
        let (s, e) = (g.index_of(&id(1)).unwrap(), g.index_of(&id(2)).unwrap());
        let (path, cost) = g.shortest_path(s, e, true).unwrap();
        assert_eq!(cost, 3.0);
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn no_path_is_none() {
        let mut g = DiGraph::new();
        g.add_edge(&id(1), &id(2), 1.0);
        g.add_edge(&id(3), &id(4), 1.0);
        let (s, e) = (g.index_of(&id(1)).unwrap(), g.index_of(&id(4)).unwrap());
        assert!(g.shortest_path(s, e, false).is_none());
        assert!(g.shortest_path(s, e, true).is_none());
    }

    #[test]
    fn all_shortest_paths_enumerates_ties() {
        let g = diamond();
        let (s, e) = (g.index_of(&id(1)).unwrap(), g.index_of(&id(4)).unwrap());
        let paths = g.all_shortest_paths(s, e, false, 10);
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.len() == 3));

        let capped = g.all_shortest_paths(s, e, false, 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn weak_components_ignore_direction() {
        let mut g = diamond();
        g.add_edge(&id(10), &id(11), 1.0);
        g.add_node(&id(99));
        let mut sizes: Vec<usize> = g
            .weakly_connected_components()
            .iter()
            .map(Vec::len)
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2, 4]);
        assert!(!g.is_weakly_connected());
        assert_eq!(g.isolates().len(), 1);
    }

    #[test]
    fn strong_connectivity_needs_a_cycle() {
        let mut cycle = DiGraph::new();
        cycle.add_edge(&id(1), &id(2), 1.0);
        cycle.add_edge(&id(2), &id(3), 1.0);
        cycle.add_edge(&id(3), &id(1), 1.0);
        assert!(cycle.is_strongly_connected());
        assert!(!diamond().is_strongly_connected());
    }

    #[test]
    fn without_node_drops_incident_edges() {
        let g = diamond();
        let b = g.index_of(&id(2)).unwrap();
        let reduced = g.without_node(b);
        assert_eq!(reduced.node_count(), 3);
        assert_eq!(reduced.edge_count(), 2);
        assert!(!reduced.contains(&id(2)));
    }

    #[test]
    fn betweenness_spots_the_bridge() {
        // Path graph 1 -> 2 -> 3: all traffic crosses 2.
        let mut g = DiGraph::new();
        g.add_edge(&id(1), &id(2), 1.0);
        g.add_edge(&id(2), &id(3), 1.0);
        let scores = g.betweenness_centrality(false);
        let middle = g.index_of(&id(2)).unwrap();
        let ends = [g.index_of(&id(1)).unwrap(), g.index_of(&id(3)).unwrap()];
        assert!(scores[middle] > scores[ends[0]]);
        assert!(scores[middle] > scores[ends[1]]);
        // One shortest path (1->3) crosses the middle; directed scale is
        // 1 / ((n-1)(n-2)) = 1/2.
        assert!((scores[middle] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn weighted_betweenness_follows_cheap_routes() {
        // Expensive direct edge vs cheap two-hop detour through 3.
        let mut g = DiGraph::new();
        g.add_edge(&id(1), &id(2), 10.0);
        g.add_edge(&id(1), &id(3), 1.0);
        g.add_edge(&id(3), &id(2), 1.0);
        let scores = g.betweenness_centrality(true);
        let detour = g.index_of(&id(3)).unwrap();
        assert!(scores[detour] > 0.0);
    }

    #[test]
    fn pagerank_sums_to_one_and_rewards_sinks() {
        let g = diamond();
        let ranks = g.pagerank(0.85, false);
        let total: f64 = ranks.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        let sink = g.index_of(&id(4)).unwrap();
        let source = g.index_of(&id(1)).unwrap();
        assert!(ranks[sink] > ranks[source]);
    }

    #[test]
    fn closeness_rewards_reachable_centers() {
        // Chain 1 -> 2 -> 3; closeness is measured over incoming paths.
        let mut g = DiGraph::new();
        g.add_edge(&id(1), &id(2), 1.0);
        g.add_edge(&id(2), &id(3), 1.0);
        let scores = g.closeness_centrality();
        let tail = g.index_of(&id(3)).unwrap();
        let head = g.index_of(&id(1)).unwrap();
        assert!(scores[tail] > 0.0);
        assert_eq!(scores[head], 0.0);
    }

    #[test]
    fn degree_centrality_scales_by_n_minus_one() {
        let g = diamond();
        let scores = g.degree_centrality();
        let hub = g.index_of(&id(1)).unwrap();
        assert!((scores[hub] - 2.0 / 3.0).abs() < 1e-9);
    }
}
