use crate::config::RouterConfig;
use crate::error::CenterlineError;
use crate::geometry_utils::{merge_lines, snap_and_merge};
use crate::stations::{Station, station_order};
use ahash::{HashMap, HashMapExt};
use geo::{Coord, Distance, Euclidean, LineString, MultiLineString};
use log::{debug, warn};
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// Grid cell of a quantized node
pub type NodeKey = (i64, i64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackEdge {
    pub from: usize,
    pub to: usize,
    /// Length of the original piece the edge came from
    pub weight: f64,
    /// Original (unquantized) endpoints
    pub a: Coord,
    pub b: Coord,
}

impl TrackEdge {
    fn other(&self, node: usize) -> usize {
        if self.from == node { self.to } else { self.from }
    }
}

/// Undirected weighted graph over grid-quantized track coordinates.
///
/// Read-only once built. Duplicate edges between the same node pair keep the
/// shortest original piece.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackGraph {
    grid_m: f64,
    keys: Vec<NodeKey>,
    node_index: HashMap<NodeKey, usize>,
    edges: Vec<TrackEdge>,
    edge_index: HashMap<(usize, usize), usize>,
    adjacency: Vec<Vec<usize>>,
}

impl TrackGraph {
    pub fn new(grid_m: f64) -> Self {
        Self {
            grid_m,
            keys: Vec::new(),
            node_index: HashMap::new(),
            edges: Vec::new(),
            edge_index: HashMap::new(),
            adjacency: Vec::new(),
        }
    }

    /// Quantize every straight piece of `lines` into the graph.
    pub fn build(lines: &[LineString], grid_m: f64) -> Self {
        let mut graph = Self::new(grid_m);
        for line in lines {
            for piece in line.lines() {
                graph.add_edge(piece.start, piece.end);
            }
        }
        graph
    }

    /// Snap and merge the network, then build the graph from the merged chains.
    pub fn from_network(lines: &[LineString], config: &RouterConfig) -> Self {
        let merged = snap_and_merge(lines, config.snap_tolerance_m);
        let graph = Self::build(&merged.0, config.node_grid_m);
        debug!(
            "Track graph: {} nodes, {} edges from {} merged chains",
            graph.node_count(),
            graph.edge_count(),
            merged.0.len()
        );
        graph
    }

    pub fn quantize(&self, c: Coord) -> NodeKey {
        (
            (c.x / self.grid_m).round() as i64,
            (c.y / self.grid_m).round() as i64,
        )
    }

    fn key_position(&self, key: NodeKey) -> Coord {
        Coord {
            x: key.0 as f64 * self.grid_m,
            y: key.1 as f64 * self.grid_m,
        }
    }

    fn node_for(&mut self, key: NodeKey) -> usize {
        if let Some(&idx) = self.node_index.get(&key) {
            return idx;
        }
        let idx = self.keys.len();
        self.keys.push(key);
        self.node_index.insert(key, idx);
        self.adjacency.push(Vec::new());
        idx
    }

    pub fn add_edge(&mut self, a: Coord, b: Coord) {
        let (ka, kb) = (self.quantize(a), self.quantize(b));
        if ka == kb {
            return;
        }
        let weight = Euclidean.distance(a, b);
        let from = self.node_for(ka);
        let to = self.node_for(kb);
        let pair = (from.min(to), from.max(to));

        match self.edge_index.get(&pair) {
            Some(&e) => {
                let edge = &mut self.edges[e];
                if weight < edge.weight {
                    edge.weight = weight;
                    edge.a = a;
                    edge.b = b;
                }
            }
            None => {
                let e = self.edges.len();
                self.edges.push(TrackEdge {
                    from,
                    to,
                    weight,
                    a,
                    b,
                });
                self.edge_index.insert(pair, e);
                self.adjacency[from].push(e);
                self.adjacency[to].push(e);
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.keys.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_key(&self, node: usize) -> NodeKey {
        self.keys[node]
    }

    /// Grid position of a node (cell index times cell size).
    pub fn node_position(&self, node: usize) -> Coord {
        self.key_position(self.keys[node])
    }

    pub fn edge_between(&self, a: usize, b: usize) -> Option<&TrackEdge> {
        self.edge_index
            .get(&(a.min(b), a.max(b)))
            .map(|&e| &self.edges[e])
    }

    /// Nearest node to `p`, searching square rings of grid cells outwards.
    ///
    /// Stops at the first ring `r` whose best candidate lies within `r` cells
    /// of the point, or after `max_rings` rings.
    pub fn anchor(&self, p: Coord, max_rings: i64) -> Option<usize> {
        let (cx, cy) = self.quantize(p);
        let mut best: Option<(f64, usize)> = None;

        for r in 0..=max_rings.max(0) {
            for dx in -r..=r {
                for dy in -r..=r {
                    if dx.abs().max(dy.abs()) != r {
                        continue;
                    }
                    let key = (cx + dx, cy + dy);
                    let Some(&node) = self.node_index.get(&key) else {
                        continue;
                    };
                    let d = Euclidean.distance(p, self.key_position(key));
                    if best.is_none_or(|(bd, _)| d < bd) {
                        best = Some((d, node));
                    }
                }
            }
            if let Some((d, _)) = best {
                if d <= self.grid_m * r as f64 {
                    break;
                }
            }
        }
        best.map(|(_, node)| node)
    }

    /// Dijkstra shortest path between two nodes, as a node sequence.
    pub fn shortest_path(&self, from: usize, to: usize) -> Option<Vec<usize>> {
        let n = self.node_count();
        if from >= n || to >= n {
            return None;
        }
        let mut dist = vec![f64::INFINITY; n];
        let mut prev: Vec<Option<usize>> = vec![None; n];
        let mut heap = BinaryHeap::new();

        dist[from] = 0.0;
        heap.push(DijkstraState {
            cost: OrderedFloat(0.0),
            node: from,
        });

        while let Some(DijkstraState { cost, node }) = heap.pop() {
            if node == to {
                break;
            }
            if cost.0 > dist[node] {
                continue;
            }
            for &e in &self.adjacency[node] {
                let edge = &self.edges[e];
                let next = edge.other(node);
                let next_cost = cost.0 + edge.weight;
                if next_cost < dist[next] {
                    dist[next] = next_cost;
                    prev[next] = Some(node);
                    heap.push(DijkstraState {
                        cost: OrderedFloat(next_cost),
                        node: next,
                    });
                }
            }
        }

        if !dist[to].is_finite() {
            return None;
        }
        let mut path = vec![to];
        let mut cur = to;
        while let Some(p) = prev[cur] {
            path.push(p);
            cur = p;
        }
        path.reverse();
        Some(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DijkstraState {
    cost: OrderedFloat<f64>,
    node: usize,
}

impl Ord for DijkstraState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse for min-heap
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for DijkstraState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Through-curve stitched from station-to-station shortest paths.
#[derive(Debug, Clone)]
pub struct RoutedLine {
    pub geometry: MultiLineString,
    /// Station indices in route order
    pub order: Vec<usize>,
    /// Anchor node position of each station, in route order
    pub anchors: Vec<Coord>,
    pub legs: usize,
    /// Consecutive station pairs with no connecting path, as station indices
    pub gap_legs: Vec<(usize, usize)>,
}

impl RoutedLine {
    pub fn gaps(&self) -> usize {
        self.gap_legs.len()
    }
}

/// Anchor every station on the graph and route between consecutive anchors.
///
/// `positions` are the stations' metric coordinates, index-aligned with `stations`.
/// Legs without a path are skipped and reported as gaps.
pub fn route_stations(
    graph: &TrackGraph,
    stations: &[Station],
    positions: &[Coord],
    config: &RouterConfig,
) -> Result<RoutedLine, CenterlineError> {
    let order = station_order(stations, positions);

    let mut nodes = Vec::with_capacity(order.len());
    for &i in &order {
        let node = graph
            .anchor(positions[i], config.search_radius_cells)
            .ok_or_else(|| CenterlineError::UnreachableStation {
                index: i,
                name: stations[i].label(i),
            })?;
        nodes.push(node);
    }

    let legs = nodes.len().saturating_sub(1);
    let mut pieces: Vec<LineString> = Vec::new();
    let mut gap_legs = Vec::new();

    for k in 0..legs {
        let (a, b) = (nodes[k], nodes[k + 1]);
        match graph.shortest_path(a, b) {
            Some(path) if path.len() >= 2 => {
                pieces.push(LineString::new(
                    path.iter().map(|&n| graph.node_position(n)).collect(),
                ));
            }
            // Both stations anchored on the same node
            Some(_) => {}
            None => {
                warn!(
                    "No path between {} and {}, leaving a gap",
                    stations[order[k]].label(order[k]),
                    stations[order[k + 1]].label(order[k + 1])
                );
                gap_legs.push((order[k], order[k + 1]));
            }
        }
    }

    if pieces.is_empty() {
        return Err(CenterlineError::RouteFragmented { legs });
    }

    let geometry = merge_lines(&pieces);
    debug!(
        "Routed {} of {} legs into {} part(s)",
        legs - gap_legs.len(),
        legs,
        geometry.0.len()
    );

    Ok(RoutedLine {
        geometry,
        anchors: nodes.iter().map(|&n| graph.node_position(n)).collect(),
        order,
        legs,
        gap_legs,
    })
}
