use crate::projection::Frame;
use geo::{Coord, Distance, Euclidean};
use ordered_float::OrderedFloat;

/// A station point as supplied by the station-list side.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub name: Option<String>,
    pub position: Coord,
    /// Explicit sequence key along the route, if the source has one
    pub order_key: Option<f64>,
}

impl Station {
    pub fn new(position: Coord) -> Self {
        Self {
            name: None,
            position,
            order_key: None,
        }
    }

    pub fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("station_{}", index))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StationSet {
    /// `None` means "same frame as the route geometry"
    pub frame: Option<Frame>,
    pub stations: Vec<Station>,
}

impl StationSet {
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn positions(&self) -> Vec<Coord> {
        self.stations.iter().map(|s| s.position).collect()
    }

    pub fn has_explicit_order(&self) -> bool {
        !self.stations.is_empty() && self.stations.iter().all(|s| s.order_key.is_some())
    }
}

/// Route order of stations as indices into `stations`.
///
/// Uses the explicit order key when every station has one (stable for equal keys),
/// otherwise falls back to [`greedy_order`] over `positions`, which must be metric.
pub fn station_order(stations: &[Station], positions: &[Coord]) -> Vec<usize> {
    if !stations.is_empty() && stations.iter().all(|s| s.order_key.is_some()) {
        let mut order: Vec<usize> = (0..stations.len()).collect();
        order.sort_by_key(|&i| OrderedFloat(stations[i].order_key.unwrap_or(f64::INFINITY)));
        return order;
    }
    greedy_order(positions)
}

/// Nearest-neighbor tour starting from the westernmost (then southernmost) point.
pub fn greedy_order(points: &[Coord]) -> Vec<usize> {
    let n = points.len();
    let Some(start) = (0..n).min_by_key(|&i| (OrderedFloat(points[i].x), OrderedFloat(points[i].y)))
    else {
        return Vec::new();
    };

    let mut used = vec![false; n];
    used[start] = true;
    let mut order = Vec::with_capacity(n);
    order.push(start);

    while order.len() < n {
        let last = points[order[order.len() - 1]];
        let next = (0..n)
            .filter(|&i| !used[i])
            .min_by_key(|&i| OrderedFloat(Euclidean.distance(last, points[i])));
        match next {
            Some(i) => {
                used[i] = true;
                order.push(i);
            }
            None => break,
        }
    }
    order
}
