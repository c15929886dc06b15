use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use geo::line_intersection::{LineIntersection, line_intersection};
use geo::{
    Closest, ClosestPoint, Coord, Distance, Euclidean, InterpolateLine, Length, Line, LineString,
    MultiLineString, Point, Simplify,
};
use ordered_float::OrderedFloat;
use rstar::primitives::GeomWithData;
use rstar::{AABB, PointDistance, RTree, RTreeObject};

// --- Metric Geometry Functions (XY Space) ---
// Every function here assumes a projected frame in meters.

/// Orientation of a segment folded into [0, PI): a track has no preferred direction.
pub fn undirected_angle_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(std::f64::consts::PI);
    d.min(std::f64::consts::PI - d)
}

/// Point at a normalized position along the polyline.
pub fn interpolate_along(line: &LineString, fraction: f64) -> Option<Coord> {
    Euclidean
        .point_at_ratio_from_start(line, fraction.clamp(0.0, 1.0))
        .map(|p| p.0)
}

/// Nearest point on the polyline to `p`.
pub fn closest_point_on(line: &LineString, p: Coord) -> Option<Coord> {
    match line.closest_point(&Point::from(p)) {
        Closest::Intersection(q) | Closest::SinglePoint(q) => Some(q.0),
        Closest::Indeterminate => None,
    }
}

fn closest_on_piece(line: &Line, p: Coord) -> Coord {
    match line.closest_point(&Point::from(p)) {
        Closest::Intersection(q) | Closest::SinglePoint(q) => q.0,
        Closest::Indeterminate => line.start,
    }
}

pub fn centroid_of_line(line: &Line) -> Coord {
    Coord {
        x: (line.start.x + line.end.x) / 2.0,
        y: (line.start.y + line.end.y) / 2.0,
    }
}

// --- Segment R-tree ---

/// R-tree entry for one straight piece of a curve
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    pub line: Line,
    /// Index of the curve (or segment) this piece came from
    pub owner: usize,
}

impl RTreeObject for SegmentEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.line.start.x, self.line.start.y],
            [self.line.end.x, self.line.end.y],
        )
    }
}

fn grown_envelope(seg: &Line, radius: f64) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [seg.start.x.min(seg.end.x) - radius, seg.start.y.min(seg.end.y) - radius],
        [seg.start.x.max(seg.end.x) + radius, seg.start.y.max(seg.end.y) + radius],
    )
}

impl PointDistance for SegmentEntry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let d = Euclidean.distance(as_coord(point), &self.line);
        d * d
    }
}

/// Spatial index over the straight pieces of one or more curves.
pub struct SegmentIndex {
    tree: RTree<SegmentEntry>,
}

impl SegmentIndex {
    pub fn from_lines(lines: impl IntoIterator<Item = (usize, Line)>) -> Self {
        let entries: Vec<SegmentEntry> = lines
            .into_iter()
            .filter(|(_, l)| l.start != l.end)
            .map(|(owner, line)| SegmentEntry { line, owner })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn from_curves(curves: &[LineString]) -> Self {
        Self::from_lines(
            curves
                .iter()
                .enumerate()
                .flat_map(|(i, c)| c.lines().map(move |l| (i, l))),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn distance_to_point(&self, p: Coord) -> f64 {
        self.tree
            .nearest_neighbor(&[p.x, p.y])
            .map(|e| e.distance_2(&[p.x, p.y]).sqrt())
            .unwrap_or(f64::INFINITY)
    }

    /// Owner of the piece nearest to `p`.
    pub fn nearest_owner(&self, p: Coord) -> Option<usize> {
        self.tree.nearest_neighbor(&[p.x, p.y]).map(|e| e.owner)
    }

    /// Exact distance from a segment to the nearest indexed piece.
    pub fn distance_to_segment(&self, seg: &Line) -> f64 {
        // Endpoint distances bound the answer; anything closer must intersect the grown box.
        let upper = self
            .distance_to_point(seg.start)
            .min(self.distance_to_point(seg.end));
        if !upper.is_finite() {
            return upper;
        }
        self.tree
            .locate_in_envelope_intersecting(&grown_envelope(seg, upper))
            .map(|e| Euclidean.distance(seg, &e.line))
            .fold(upper, f64::min)
    }

    /// Exact distance from a curve to the nearest indexed piece.
    pub fn distance_to_curve(&self, curve: &LineString) -> f64 {
        curve
            .lines()
            .map(|l| self.distance_to_segment(&l))
            .fold(f64::INFINITY, f64::min)
    }

    /// Pieces whose bounding box lies within `radius` of the segment's bounding box.
    pub fn near_segment(&self, seg: &Line, radius: f64) -> Vec<&SegmentEntry> {
        self.tree
            .locate_in_envelope_intersecting(&grown_envelope(seg, radius))
            .collect()
    }
}

// --- Snapping & noding ---

/// Interior vertex of a line, tagged with the line's index
type VertexEntry = GeomWithData<[f64; 2], usize>;

fn as_coord(p: &[f64; 2]) -> Coord {
    Coord { x: p[0], y: p[1] }
}

/// Snap line endpoints onto the network within `tolerance_m`, then node it.
///
/// An endpoint moves onto the nearest interior vertex of another line, else onto
/// an earlier endpoint. One that still lies on the interior of another line's
/// piece is moved onto that piece and the piece is split there. Proper crossings
/// between lines also get a shared vertex, so `merge_lines` sees every touch as
/// a junction.
pub fn node_network(lines: &[LineString], tolerance_m: f64) -> Vec<LineString> {
    let mut coords: Vec<Vec<Coord>> = lines
        .iter()
        .map(|l| dedupe_consecutive(&l.0))
        .filter(|c| c.len() >= 2)
        .collect();

    if tolerance_m > 0.0 {
        let fixed = snap_to_vertices(&mut coords, tolerance_m);
        snap_to_endpoints(&mut coords, &fixed, tolerance_m);
    }
    attach_endpoints(&mut coords, tolerance_m.max(0.0));
    node_crossings(&mut coords);

    coords
        .iter()
        .map(|c| dedupe_consecutive(c))
        .filter(|c| c.len() >= 2)
        .map(LineString::new)
        .collect()
}

/// Move endpoints onto the nearest interior vertex of another line. Returns the
/// vertices endpoints landed on.
fn snap_to_vertices(lines: &mut [Vec<Coord>], tolerance_m: f64) -> Vec<Coord> {
    let interior: Vec<VertexEntry> = lines
        .iter()
        .enumerate()
        .flat_map(|(i, c)| {
            c[1..c.len() - 1]
                .iter()
                .map(move |v| VertexEntry::new([v.x, v.y], i))
        })
        .collect();
    let tree = RTree::bulk_load(interior);
    let tol2 = tolerance_m * tolerance_m;
    let mut landed = Vec::new();

    for (i, line) in lines.iter_mut().enumerate() {
        let last = line.len() - 1;
        for k in [0, last] {
            let q = [line[k].x, line[k].y];
            let nearest = tree
                .locate_within_distance(q, tol2)
                .filter(|v| v.data != i)
                .min_by_key(|v| OrderedFloat(v.distance_2(&q)));
            if let Some(v) = nearest {
                line[k] = as_coord(v.geom());
                landed.push(line[k]);
            }
        }
    }
    landed
}

/// Move every endpoint within `tolerance_m` of a fixed vertex or an earlier
/// endpoint onto it.
fn snap_to_endpoints(lines: &mut [Vec<Coord>], fixed: &[Coord], tolerance_m: f64) {
    let mut anchors: RTree<[f64; 2]> = RTree::bulk_load(fixed.iter().map(|c| [c.x, c.y]).collect());
    let tol2 = tolerance_m * tolerance_m;

    for line in lines.iter_mut() {
        let last = line.len() - 1;
        for k in [0, last] {
            let q = [line[k].x, line[k].y];
            let hit = anchors
                .nearest_neighbor(&q)
                .filter(|a| a.distance_2(&q) <= tol2)
                .copied();
            match hit {
                Some(anchor) => line[k] = as_coord(&anchor),
                None => anchors.insert(q),
            }
        }
    }
}

fn piece_index(lines: &[Vec<Coord>]) -> SegmentIndex {
    SegmentIndex::from_lines(lines.iter().enumerate().flat_map(|(i, c)| {
        c.windows(2).map(move |w| (i, Line::new(w[0], w[1])))
    }))
}

/// Endpoints within `tolerance_m` of another line's piece (and not already on
/// one of its vertices) move onto the piece, which is split there.
fn attach_endpoints(lines: &mut [Vec<Coord>], tolerance_m: f64) {
    let index = piece_index(lines);
    let tol2 = tolerance_m * tolerance_m;
    let mut moves: Vec<(usize, usize, Coord)> = Vec::new();
    let mut splits: Vec<(usize, Coord)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let last = line.len() - 1;
        for k in [0, last] {
            let e = line[k];
            let q = [e.x, e.y];
            let target = index
                .tree
                .locate_within_distance(q, tol2)
                .filter(|s| s.owner != i && s.line.start != e && s.line.end != e)
                .min_by_key(|s| OrderedFloat(s.distance_2(&q)));
            if let Some(s) = target {
                let p = closest_on_piece(&s.line, e);
                moves.push((i, k, p));
                splits.push((s.owner, p));
            }
        }
    }

    for (i, k, p) in moves {
        lines[i][k] = p;
    }
    insert_vertices(lines, splits);
}

/// Give every proper crossing between two different lines a shared vertex.
fn node_crossings(lines: &mut [Vec<Coord>]) {
    let index = piece_index(lines);
    let mut splits: Vec<(usize, Coord)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        for w in line.windows(2) {
            let piece = Line::new(w[0], w[1]);
            for other in index
                .tree
                .locate_in_envelope_intersecting(&grown_envelope(&piece, 0.0))
                .filter(|o| o.owner > i)
            {
                if let Some(LineIntersection::SinglePoint {
                    intersection,
                    is_proper: true,
                }) = line_intersection(piece, other.line)
                {
                    splits.push((i, intersection));
                    splits.push((other.owner, intersection));
                }
            }
        }
    }
    insert_vertices(lines, splits);
}

/// Insert each `(line, point)` as a vertex into the piece of the line nearest to it.
fn insert_vertices(lines: &mut [Vec<Coord>], points: Vec<(usize, Coord)>) {
    let mut by_line: HashMap<usize, Vec<Coord>> = HashMap::new();
    for (i, p) in points {
        by_line.entry(i).or_default().push(p);
    }

    for (i, points) in by_line {
        let line = &lines[i];
        let mut cuts: Vec<(usize, f64, Coord)> = points
            .into_iter()
            .filter_map(|p| {
                let (k, _) = line
                    .windows(2)
                    .enumerate()
                    .map(|(k, w)| (k, Euclidean.distance(p, &Line::new(w[0], w[1]))))
                    .min_by_key(|&(_, d)| OrderedFloat(d))?;
                let (a, b) = (line[k], line[k + 1]);
                (p != a && p != b).then(|| (k, Euclidean.distance(a, p), p))
            })
            .collect();
        cuts.sort_by(|x, y| x.0.cmp(&y.0).then(x.1.total_cmp(&y.1)));
        cuts.dedup_by(|x, y| x.2 == y.2);

        let mut out = Vec::with_capacity(line.len() + cuts.len());
        let mut pending = cuts.iter().peekable();
        for (k, &c) in line.iter().enumerate() {
            out.push(c);
            while let Some(&(_, _, p)) = pending.next_if(|cut| cut.0 == k) {
                out.push(p);
            }
        }
        lines[i] = out;
    }
}

pub fn dedupe_consecutive(coords: &[Coord]) -> Vec<Coord> {
    let mut out: Vec<Coord> = Vec::with_capacity(coords.len());
    for c in coords {
        if out.last() != Some(c) {
            out.push(*c);
        }
    }
    out
}

type NodeKey = (i64, i64);

fn node_key(c: Coord) -> NodeKey {
    ((c.x * 1e6).round() as i64, (c.y * 1e6).round() as i64)
}

/// Dissolve duplicated pieces and join lines end to end wherever exactly two meet.
///
/// Lines are split into their straight pieces first, so shared vertices become
/// junctions. Crossings without a shared vertex are not noded here; see
/// [`node_network`].
pub fn merge_lines(lines: &[LineString]) -> MultiLineString {
    let mut node_index: HashMap<NodeKey, usize> = HashMap::new();
    let mut node_coords: Vec<Coord> = Vec::new();
    let mut edges: Vec<(usize, usize)> = Vec::new();
    let mut seen: HashSet<(usize, usize)> = HashSet::new();

    let mut node_of = |c: Coord| -> usize {
        *node_index.entry(node_key(c)).or_insert_with(|| {
            node_coords.push(c);
            node_coords.len() - 1
        })
    };

    for line in lines {
        for l in line.lines() {
            let a = node_of(l.start);
            let b = node_of(l.end);
            if a == b {
                continue;
            }
            let key = (a.min(b), a.max(b));
            if seen.insert(key) {
                edges.push((a, b));
            }
        }
    }

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); node_coords.len()];
    for (i, &(a, b)) in edges.iter().enumerate() {
        adjacency[a].push(i);
        adjacency[b].push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut parts: Vec<LineString> = Vec::new();

    let walk = |start_node: usize, first_edge: usize, used: &mut Vec<bool>| -> LineString {
        let mut coords = vec![node_coords[start_node]];
        let mut node = start_node;
        let mut edge = first_edge;
        loop {
            used[edge] = true;
            let (a, b) = edges[edge];
            node = if a == node { b } else { a };
            coords.push(node_coords[node]);
            if adjacency[node].len() != 2 {
                break;
            }
            match adjacency[node].iter().find(|&&e| !used[e]) {
                Some(&next) => edge = next,
                None => break,
            }
        }
        LineString::new(coords)
    };

    for node in 0..adjacency.len() {
        if adjacency[node].len() == 2 {
            continue;
        }
        for k in 0..adjacency[node].len() {
            let e = adjacency[node][k];
            if !used[e] {
                parts.push(walk(node, e, &mut used));
            }
        }
    }
    // Whatever is left forms closed rings.
    for e in 0..edges.len() {
        if !used[e] {
            parts.push(walk(edges[e].0, e, &mut used));
        }
    }

    MultiLineString::new(parts)
}

/// Snap and node the network, then merge.
pub fn snap_and_merge(lines: &[LineString], tolerance_m: f64) -> MultiLineString {
    merge_lines(&node_network(lines, tolerance_m))
}

pub fn longest_part(lines: &MultiLineString) -> Option<&LineString> {
    lines
        .0
        .iter()
        .max_by_key(|l| OrderedFloat(Euclidean.length(*l)))
}

pub fn simplify_multi(lines: &MultiLineString, tolerance_m: f64) -> MultiLineString {
    if tolerance_m <= 0.0 {
        return lines.clone();
    }
    MultiLineString::new(lines.0.iter().map(|l| l.simplify(&tolerance_m)).collect())
}

/// Chaikin corner cutting; endpoints are kept in place.
pub fn chaikin_smooth(line: &LineString, iterations: usize) -> LineString {
    let mut coords = line.0.clone();
    if coords.len() < 3 {
        return line.clone();
    }
    for _ in 0..iterations {
        let mut next = Vec::with_capacity(coords.len() * 2);
        next.push(coords[0]);
        for w in coords.windows(2) {
            let (p0, p1) = (w[0], w[1]);
            next.push(Coord {
                x: 0.75 * p0.x + 0.25 * p1.x,
                y: 0.75 * p0.y + 0.25 * p1.y,
            });
            next.push(Coord {
                x: 0.25 * p0.x + 0.75 * p1.x,
                y: 0.25 * p0.y + 0.75 * p1.y,
            });
        }
        if let Some(last) = coords.last() {
            next.push(*last);
        }
        coords = next;
    }
    LineString::new(coords)
}

/// Drop interior vertices closer than `min_spacing_m` to the last kept vertex.
pub fn remove_tiny_segments(line: &LineString, min_spacing_m: f64) -> LineString {
    let coords = &line.0;
    if coords.len() < 3 || min_spacing_m <= 0.0 {
        return line.clone();
    }
    let mut kept = vec![coords[0]];
    for &c in &coords[1..coords.len() - 1] {
        if let Some(&prev) = kept.last() {
            if Euclidean.distance(prev, c) >= min_spacing_m {
                kept.push(c);
            }
        }
    }
    kept.push(coords[coords.len() - 1]);
    LineString::new(kept)
}
