use crate::config::MidlineConfig;
use crate::error::CenterlineError;
use crate::geometry_utils::{
    SegmentIndex, closest_point_on, interpolate_along, longest_part, merge_lines,
};
use geo::{Coord, Distance, Euclidean, Length, LineString, MultiLineString};
use log::debug;
use ordered_float::OrderedFloat;

/// Midline between two corridors, in the corridors' metric frame.
#[derive(Debug, Clone)]
pub struct Centerline {
    pub geometry: MultiLineString,
    pub length_m: f64,
    /// Number of A/B part pairs that contributed a midline piece
    pub pairs_used: usize,
}

/// Return `b` oriented to run the same way as `a`.
///
/// The orientation whose endpoints line up better (start-start plus end-end)
/// wins; on a tie `b` is kept as given.
pub fn orient_pair(a: &LineString, b: &LineString) -> LineString {
    let (Some(a0), Some(a1), Some(b0), Some(b1)) = (a.0.first(), a.0.last(), b.0.first(), b.0.last())
    else {
        return b.clone();
    };
    let same = Euclidean.distance(*a0, *b0) + Euclidean.distance(*a1, *b1);
    let reversed = Euclidean.distance(*a0, *b1) + Euclidean.distance(*a1, *b0);
    if reversed < same {
        LineString::new(b.0.iter().rev().copied().collect())
    } else {
        b.clone()
    }
}

/// Walk `samples` even steps along `a`, pair each position with its nearest
/// point on `b` and keep the midpoints.
///
/// Midpoints closer than `dedupe_m` to the previous kept one are dropped.
/// Returns `None` when either curve is degenerate or fewer than two points survive.
pub fn sample_midline(
    a: &LineString,
    b: &LineString,
    samples: usize,
    dedupe_m: f64,
) -> Option<LineString> {
    if Euclidean.length(a) <= 0.0 || Euclidean.length(b) <= 0.0 {
        return None;
    }
    let b = orient_pair(a, b);
    let n = samples.max(1);

    let mut points: Vec<Coord> = Vec::with_capacity(n + 1);
    for i in 0..=n {
        let pa = interpolate_along(a, i as f64 / n as f64)?;
        let pb = closest_point_on(&b, pa)?;
        let mid = Coord {
            x: (pa.x + pb.x) / 2.0,
            y: (pa.y + pb.y) / 2.0,
        };
        match points.last() {
            Some(&prev) if Euclidean.distance(prev, mid) <= dedupe_m => {}
            _ => points.push(mid),
        }
    }

    (points.len() >= 2).then(|| LineString::new(points))
}

/// Synthesize the centerline between corridor clusters `a` and `b`.
///
/// The longest parts of both corridors are tried first. When they are too far
/// apart, or their midline is too short, each long part of A is paired with
/// its nearest long part of B instead; every accepted pair contributes one piece.
pub fn synthesize(
    a: &MultiLineString,
    b: &MultiLineString,
    config: &MidlineConfig,
) -> Result<Centerline, CenterlineError> {
    let (Some(main_a), Some(main_b)) = (longest_part(a), longest_part(b)) else {
        return Err(CenterlineError::MidlineSynthesis(
            "a corridor has no geometry".to_string(),
        ));
    };

    let mut pieces: Vec<LineString> = Vec::new();

    let main_gap = SegmentIndex::from_curves(std::slice::from_ref(main_b)).distance_to_curve(main_a);
    if main_gap <= config.max_pair_distance_m {
        if let Some(mid) = sample_midline(main_a, main_b, config.samples, config.dedupe_m) {
            if Euclidean.length(&mid) > config.min_length_m {
                pieces.push(mid);
            }
        }
    }

    if pieces.is_empty() {
        debug!(
            "Main parts unusable ({:.1} m apart), pairing corridor parts",
            main_gap
        );
        pieces = pair_parts(a, b, config);
    }

    if pieces.is_empty() {
        return Err(CenterlineError::MidlineSynthesis(format!(
            "no A/B part pair within {:.0} m produced a midline longer than {:.0} m",
            config.max_pair_distance_m, config.min_length_m
        )));
    }

    let pairs_used = pieces.len();
    let geometry = merge_lines(&pieces);
    let length_m = Euclidean.length(&geometry);
    debug!(
        "Midline from {} pair(s): {} part(s), {:.0} m",
        pairs_used,
        geometry.0.len(),
        length_m
    );

    Ok(Centerline {
        geometry,
        length_m,
        pairs_used,
    })
}

fn pair_parts(a: &MultiLineString, b: &MultiLineString, config: &MidlineConfig) -> Vec<LineString> {
    let long_enough = |l: &&LineString| Euclidean.length(*l) >= config.min_part_length_m;
    let parts_b: Vec<(&LineString, SegmentIndex)> = b
        .0
        .iter()
        .filter(long_enough)
        .map(|part| (part, SegmentIndex::from_curves(std::slice::from_ref(part))))
        .collect();
    let samples = config.min_part_samples.max(config.samples / 2);

    a.0.iter()
        .filter(long_enough)
        .filter_map(|part_a| {
            let (part_b, gap) = parts_b
                .iter()
                .map(|(part_b, index)| (*part_b, index.distance_to_curve(part_a)))
                .min_by_key(|&(_, d)| OrderedFloat(d))?;
            if gap > config.max_pair_distance_m {
                return None;
            }
            sample_midline(part_a, part_b, samples, config.dedupe_m)
                .filter(|mid| Euclidean.length(mid) > config.min_length_m)
        })
        .collect()
}
