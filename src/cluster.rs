use crate::config::ClusterConfig;
use crate::error::CenterlineError;
use crate::geometry_utils::{SegmentIndex, snap_and_merge, undirected_angle_diff};
use crate::normalize::TrackSegment;
use geo::{Coord, Distance, Euclidean, Length, LineString, MultiLineString};
use itertools::Itertools;
use log::debug;
use ordered_float::OrderedFloat;
use std::cmp::Reverse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorridorLabel {
    A,
    B,
}

/// How the initial pair of seed segments was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedKind {
    /// Two nearby, parallel segments: most likely the two rails of a double track
    Parallel,
    /// The two long segments with the most distant centroids
    FarthestCentroid,
}

/// Result of splitting a segment population into two corridors.
#[derive(Debug, Clone)]
pub struct TrackPair {
    /// One label per input segment, in input order
    pub labels: Vec<CorridorLabel>,
    /// Merged corridor geometry; kept multi-part since yards and branches are real
    pub corridor_a: MultiLineString,
    pub corridor_b: MultiLineString,
    pub len_a_m: f64,
    pub len_b_m: f64,
    pub seed_kind: SeedKind,
    /// How many times a round emptied one side and seeds had to be picked again
    pub reseeds: usize,
}

impl TrackPair {
    pub fn count(&self, label: CorridorLabel) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }
}

struct Seeds {
    a: SegmentIndex,
    b: SegmentIndex,
    kind: SeedKind,
}

/// Two-track clusterer: seed selection, fixed rounds of nearest-seed assignment,
/// then one final assignment pass.
pub struct TrackPairClusterer<'a> {
    segments: &'a [TrackSegment],
    config: &'a ClusterConfig,
    /// Segment indices, longest first
    by_length: Vec<usize>,
    index: SegmentIndex,
    /// All segments snapped and merged into chains
    chains: MultiLineString,
    chain_index: SegmentIndex,
}

/// Perpendicular distance of `p` from the infinite line through `seg`.
fn lateral_offset(seg: &TrackSegment, p: Coord) -> f64 {
    let (dx, dy) = (seg.end.x - seg.start.x, seg.end.y - seg.start.y);
    if seg.length <= f64::EPSILON {
        return Euclidean.distance(seg.start, p);
    }
    ((p.x - seg.start.x) * dy - (p.y - seg.start.y) * dx).abs() / seg.length
}

impl<'a> TrackPairClusterer<'a> {
    pub fn new(segments: &'a [TrackSegment], config: &'a ClusterConfig) -> Self {
        let mut by_length: Vec<usize> = (0..segments.len()).collect();
        by_length.sort_by_key(|&i| Reverse(OrderedFloat(segments[i].length)));
        let index = SegmentIndex::from_lines(segments.iter().enumerate().map(|(i, s)| (i, s.line())));
        let lines: Vec<LineString> = segments
            .iter()
            .map(|s| LineString::new(vec![s.start, s.end]))
            .collect();
        let chains = snap_and_merge(&lines, config.snap_tolerance_m);
        let chain_index = SegmentIndex::from_curves(&chains.0);
        Self {
            segments,
            config,
            by_length,
            index,
            chains,
            chain_index,
        }
    }

    /// Pick a seed pair among the longest segments, skipping the first `skip` of them.
    ///
    /// Prefers a parallel partner inside the distance window; falls back to the
    /// pair of candidates whose centroids are farthest apart.
    pub fn pick_seeds(&self, skip: usize) -> Option<(usize, usize, SeedKind)> {
        let n = self.by_length.len();
        let start = skip.min(n);
        let end = (skip + self.config.seed_candidates.max(2)).min(n);
        let candidates = &self.by_length[start..end];

        let max_angle = self.config.seed_max_angle_deg.to_radians();
        let (min_d, max_d) = (
            self.config.seed_min_distance_m,
            self.config.seed_max_distance_m,
        );

        for &i in candidates {
            let seed = &self.segments[i];
            let line = seed.line();
            let partner = self
                .index
                .near_segment(&line, max_d)
                .into_iter()
                .filter(|e| e.owner != i)
                .filter_map(|e| {
                    let d = Euclidean.distance(&line, &e.line);
                    if d < min_d || d > max_d {
                        return None;
                    }
                    let other = &self.segments[e.owner];
                    if undirected_angle_diff(seed.angle, other.angle) > max_angle {
                        return None;
                    }
                    // Beside the seed, not further along the same rail
                    if lateral_offset(seed, other.centroid()) < min_d {
                        return None;
                    }
                    let across = Euclidean.distance(seed.centroid(), other.centroid());
                    Some((e.owner, d, across))
                })
                // Distance ties (to the centimetre) go to the partner most directly across.
                .min_by_key(|&(j, d, across)| {
                    (OrderedFloat((d * 100.0).round()), OrderedFloat(across), j)
                });

            if let Some((j, d, _)) = partner {
                debug!(
                    "Parallel seeds {} and {} ({:.1} m apart, {:.0} m long)",
                    i, j, d, seed.length
                );
                return Some((i, j, SeedKind::Parallel));
            }
        }

        let (a, b) = candidates
            .iter()
            .tuple_combinations()
            .max_by_key(|&(&a, &b)| {
                OrderedFloat(Euclidean.distance(
                    self.segments[a].centroid(),
                    self.segments[b].centroid(),
                ))
            })?;
        debug!("No parallel seed pair, falling back to farthest centroids {} and {}", a, b);
        Some((*a, *b, SeedKind::FarthestCentroid))
    }

    fn chain_of(&self, segment: usize) -> Option<usize> {
        self.chain_index
            .nearest_owner(self.segments[segment].centroid())
    }

    /// Seed curves for a seed pair: each seed segment grown along the merged
    /// chain it lies on, or the bare segments when both share one chain.
    fn seed_curves(&self, i: usize, j: usize, kind: SeedKind) -> Seeds {
        match (self.chain_of(i), self.chain_of(j)) {
            (Some(ci), Some(cj)) if ci != cj => Seeds {
                a: SegmentIndex::from_curves(std::slice::from_ref(&self.chains.0[ci])),
                b: SegmentIndex::from_curves(std::slice::from_ref(&self.chains.0[cj])),
                kind,
            },
            _ => self.raw_seeds(i, j, kind),
        }
    }

    fn raw_seeds(&self, i: usize, j: usize, kind: SeedKind) -> Seeds {
        Seeds {
            a: SegmentIndex::from_lines([(i, self.segments[i].line())]),
            b: SegmentIndex::from_lines([(j, self.segments[j].line())]),
            kind,
        }
    }

    fn fresh_seeds(&self, skip: usize) -> Option<(usize, usize, SeedKind)> {
        self.pick_seeds(skip).or_else(|| self.pick_seeds(0))
    }

    /// Assign every segment to the nearer seed curve; ties go to A.
    fn assign(&self, seed_a: &SegmentIndex, seed_b: &SegmentIndex) -> Vec<CorridorLabel> {
        self.segments
            .iter()
            .map(|s| {
                let line = s.line();
                if seed_a.distance_to_segment(&line) <= seed_b.distance_to_segment(&line) {
                    CorridorLabel::A
                } else {
                    CorridorLabel::B
                }
            })
            .collect()
    }

    fn member_lines(&self, labels: &[CorridorLabel], label: CorridorLabel) -> Vec<LineString> {
        labels
            .iter()
            .zip(self.segments)
            .filter(|(l, _)| **l == label)
            .map(|(_, s)| LineString::new(vec![s.start, s.end]))
            .collect()
    }

    fn merged(&self, labels: &[CorridorLabel], label: CorridorLabel) -> MultiLineString {
        snap_and_merge(
            &self.member_lines(labels, label),
            self.config.snap_tolerance_m,
        )
    }

    fn one_side_empty(labels: &[CorridorLabel]) -> bool {
        !labels.contains(&CorridorLabel::A) || !labels.contains(&CorridorLabel::B)
    }

    pub fn run(&self) -> Result<TrackPair, CenterlineError> {
        if self.segments.is_empty() {
            return Err(CenterlineError::NoGeometry);
        }
        let weak = CenterlineError::WeakCluster {
            len_a_m: 0.0,
            len_b_m: 0.0,
        };
        if self.segments.len() < self.config.min_segments.max(2) {
            return Err(weak);
        }

        let mut skip = 0;
        let mut reseeds = 0;
        let (i, j, kind) = self.fresh_seeds(skip).ok_or_else(|| weak.clone())?;
        let mut seeds = self.seed_curves(i, j, kind);
        let mut seed_kind = seeds.kind;

        for round in 0..self.config.iterations {
            let labels = self.assign(&seeds.a, &seeds.b);
            if Self::one_side_empty(&labels) {
                skip += 1;
                reseeds += 1;
                debug!("Round {} emptied a corridor, reseeding (skip {})", round, skip);
                let (i, j, kind) = self.fresh_seeds(skip).ok_or_else(|| weak.clone())?;
                seeds = self.seed_curves(i, j, kind);
                seed_kind = seeds.kind;
                continue;
            }
            let a = self.merged(&labels, CorridorLabel::A);
            let b = self.merged(&labels, CorridorLabel::B);
            seeds.a = SegmentIndex::from_curves(&a.0);
            seeds.b = SegmentIndex::from_curves(&b.0);
        }

        let mut labels = self.assign(&seeds.a, &seeds.b);
        if Self::one_side_empty(&labels) {
            reseeds += 1;
            let (i, j, kind) = self.fresh_seeds(skip + 1).ok_or_else(|| weak.clone())?;
            let raw = self.raw_seeds(i, j, kind);
            seed_kind = raw.kind;
            labels = self.assign(&raw.a, &raw.b);
            if Self::one_side_empty(&labels) {
                return Err(weak);
            }
        }

        let corridor_a = self.merged(&labels, CorridorLabel::A);
        let corridor_b = self.merged(&labels, CorridorLabel::B);
        let len_a_m = Euclidean.length(&corridor_a);
        let len_b_m = Euclidean.length(&corridor_b);

        if len_a_m < self.config.min_cluster_length_m || len_b_m < self.config.min_cluster_length_m
        {
            return Err(CenterlineError::WeakCluster { len_a_m, len_b_m });
        }

        Ok(TrackPair {
            labels,
            corridor_a,
            corridor_b,
            len_a_m,
            len_b_m,
            seed_kind,
            reseeds,
        })
    }
}

/// Split `segments` into two corridor clusters.
pub fn cluster_track_pair(
    segments: &[TrackSegment],
    config: &ClusterConfig,
) -> Result<TrackPair, CenterlineError> {
    TrackPairClusterer::new(segments, config).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(x1: f64, y1: f64, x2: f64, y2: f64) -> TrackSegment {
        TrackSegment::new(Coord { x: x1, y: y1 }, Coord { x: x2, y: y2 })
    }

    /// Straight double track along `angle`, split into `n` pieces per rail.
    fn double_track(n: usize, piece_m: f64, gap_m: f64, angle: f64) -> (Vec<TrackSegment>, Vec<usize>) {
        let (dx, dy) = (angle.cos(), angle.sin());
        let (nx, ny) = (-dy, dx);
        let mut segments = Vec::new();
        let mut truth = Vec::new();
        for rail in 0..2 {
            let off = rail as f64 * gap_m;
            for k in 0..n {
                let s = k as f64 * piece_m;
                let e = s + piece_m;
                let p = |t: f64| Coord {
                    x: t * dx + off * nx,
                    y: t * dy + off * ny,
                };
                // Second rail digitized in the opposite direction
                let (a, b) = if rail == 0 { (p(s), p(e)) } else { (p(e), p(s)) };
                segments.push(TrackSegment::new(a, b));
                truth.push(rail);
            }
        }
        (segments, truth)
    }

    fn accuracy(pair: &TrackPair, truth: &[usize]) -> f64 {
        // Labels are arbitrary, so score both mappings.
        let direct = pair
            .labels
            .iter()
            .zip(truth)
            .filter(|(l, t)| (**l == CorridorLabel::A) == (**t == 0))
            .count();
        let best = direct.max(truth.len() - direct);
        best as f64 / truth.len() as f64
    }

    #[test]
    fn test_two_parallel_segments() {
        let segments = vec![seg(0.0, 0.0, 1000.0, 0.0), seg(0.0, 20.0, 1000.0, 20.0)];
        let pair = cluster_track_pair(&segments, &ClusterConfig::default()).unwrap();

        assert_eq!(pair.seed_kind, SeedKind::Parallel);
        assert_ne!(pair.labels[0], pair.labels[1]);
        assert!((pair.len_a_m - 1000.0).abs() < 1e-6);
        assert!((pair.len_b_m - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_fragmented_double_track_is_separated() {
        let (segments, truth) = double_track(40, 30.0, 12.0, 0.5);
        let pair = cluster_track_pair(&segments, &ClusterConfig::default()).unwrap();
        assert!(accuracy(&pair, &truth) >= 0.95);
        assert_eq!(pair.corridor_a.0.len(), 1, "rails should merge into one line each");
        assert_eq!(pair.corridor_b.0.len(), 1);
    }

    #[test]
    fn test_parallel_seed_prefers_other_rail_over_same_rail_neighbor() {
        let (segments, truth) = double_track(10, 60.0, 15.0, 0.0);
        let config = ClusterConfig::default();
        let clusterer = TrackPairClusterer::new(&segments, &config);
        let (i, j, kind) = clusterer.pick_seeds(0).unwrap();
        assert_eq!(kind, SeedKind::Parallel);
        assert_ne!(truth[i], truth[j]);
    }

    #[test]
    fn test_perpendicular_pair_uses_farthest_fallback() {
        let segments = vec![
            seg(0.0, 0.0, 800.0, 0.0),
            seg(2000.0, -400.0, 2000.0, 400.0),
            seg(4000.0, 0.0, 4700.0, 0.0),
        ];
        let config = ClusterConfig::default();
        let clusterer = TrackPairClusterer::new(&segments, &config);
        let (i, j, kind) = clusterer.pick_seeds(0).unwrap();
        assert_eq!(kind, SeedKind::FarthestCentroid);
        let mut pair = [i, j];
        pair.sort();
        assert_eq!(pair, [0, 2]);
    }

    #[test]
    fn test_empty_side_is_reseeded() {
        // Both rails hang off one junction, so the chain seeds leave side B empty
        // until the raw segment seeds split them.
        let segments = vec![
            seg(0.0, 0.0, 1000.0, 0.0),
            seg(1000.0, 30.0, 100.0, 30.0),
            seg(1000.0, 0.0, 1000.0, 30.0),
            seg(1000.0, 30.0, 1000.0, 500.0),
        ];
        let config = ClusterConfig::default();
        let pair = cluster_track_pair(&segments, &config).unwrap();

        assert!(pair.reseeds > 0);
        assert!(pair.labels.contains(&CorridorLabel::A));
        assert!(pair.labels.contains(&CorridorLabel::B));
    }

    #[test]
    fn test_short_clusters_are_weak() {
        let segments = vec![seg(0.0, 0.0, 100.0, 0.0), seg(0.0, 20.0, 100.0, 20.0)];
        let err = cluster_track_pair(&segments, &ClusterConfig::default()).unwrap_err();
        assert!(matches!(err, CenterlineError::WeakCluster { .. }));
    }

    #[test]
    fn test_single_segment_is_weak() {
        let segments = vec![seg(0.0, 0.0, 1000.0, 0.0)];
        assert!(matches!(
            cluster_track_pair(&segments, &ClusterConfig::default()),
            Err(CenterlineError::WeakCluster { .. })
        ));
        assert_eq!(
            cluster_track_pair(&[], &ClusterConfig::default()).unwrap_err(),
            CenterlineError::NoGeometry
        );
    }

    #[test]
    fn test_clusters_are_never_empty() {
        let (segments, _) = double_track(25, 40.0, 10.0, 1.2);
        let config = ClusterConfig {
            iterations: 6,
            ..ClusterConfig::default()
        };
        let pair = cluster_track_pair(&segments, &config).unwrap();
        assert!(pair.count(CorridorLabel::A) > 0);
        assert!(pair.count(CorridorLabel::B) > 0);
        assert_eq!(
            pair.count(CorridorLabel::A) + pair.count(CorridorLabel::B),
            segments.len()
        );
    }
}
