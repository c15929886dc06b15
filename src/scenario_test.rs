use crate::cluster::{CorridorLabel, cluster_track_pair};
use crate::config::{ClusterConfig, MidlineConfig, PipelineConfig, RouterConfig, SelectorConfig};
use crate::error::RouteStatus;
use crate::geometry_utils::closest_point_on;
use crate::mainline::{connected_components, network_components, select_mainline};
use crate::midline::synthesize;
use crate::normalize::{RouteGeometry, TrackSegment};
use crate::pipeline::{CenterlineEngine, RouteInput};
use crate::projection::Frame;
use crate::stations::{Station, StationSet};
use crate::track_graph::{TrackGraph, route_stations};
use geo::{Coord, Distance, Euclidean, Geometry, Length, LineString, MultiLineString, line_string};

fn at(x: f64, y: f64) -> Coord {
    Coord { x, y }
}

fn straight(from: f64, to: f64, y: f64, step: f64) -> LineString {
    let n = ((to - from) / step).round().max(1.0) as usize;
    LineString::new(
        (0..=n)
            .map(|k| at(from + (to - from) * k as f64 / n as f64, y))
            .collect(),
    )
}

#[test]
fn test_two_parallel_segments_give_offset_centerline() {
    let segments = vec![
        TrackSegment::new(at(0.0, 0.0), at(1000.0, 0.0)),
        TrackSegment::new(at(0.0, 20.0), at(1000.0, 20.0)),
    ];
    let pair = cluster_track_pair(&segments, &ClusterConfig::default()).unwrap();
    assert!((pair.len_a_m - 1000.0).abs() < 1.0);
    assert!((pair.len_b_m - 1000.0).abs() < 1.0);
    assert_eq!(pair.count(CorridorLabel::A), 1);

    let centerline =
        synthesize(&pair.corridor_a, &pair.corridor_b, &MidlineConfig::default()).unwrap();
    assert!((centerline.length_m - 1000.0).abs() < 1.0);
    assert!(centerline.length_m < pair.len_a_m + pair.len_b_m);

    let a = &pair.corridor_a.0[0];
    let b = &pair.corridor_b.0[0];
    for &c in centerline.geometry.0.iter().flat_map(|l| l.0.iter()) {
        let da = Euclidean.distance(c, closest_point_on(a, c).unwrap());
        let db = Euclidean.distance(c, closest_point_on(b, c).unwrap());
        assert!((da - 10.0).abs() < 1e-6 && (db - 10.0).abs() < 1e-6);
    }
}

#[test]
fn test_gap_between_third_and_fourth_station() {
    let lines = vec![
        straight(0.0, 3000.0, 0.0, 100.0),
        straight(3002.0, 5002.0, 0.0, 100.0),
    ];
    let config = RouterConfig {
        node_grid_m: 1.0,
        snap_tolerance_m: 0.0,
        ..RouterConfig::default()
    };
    let graph = TrackGraph::from_network(&lines, &config);

    let xs = [0.0, 1500.0, 2900.0, 3100.0, 5000.0];
    let stations: Vec<Station> = xs
        .iter()
        .enumerate()
        .map(|(i, &x)| Station {
            name: Some(format!("S{}", i + 1)),
            position: at(x, 0.0),
            order_key: Some(i as f64),
        })
        .collect();
    let positions: Vec<Coord> = stations.iter().map(|s| s.position).collect();

    let routed = route_stations(&graph, &stations, &positions, &config).unwrap();
    assert!(routed.gaps() >= 1);
    assert_eq!(routed.gap_legs, vec![(2, 3)]);
    assert_eq!(routed.geometry.0.len(), 2);

    let mut spans: Vec<(f64, f64)> = routed
        .geometry
        .0
        .iter()
        .map(|part| {
            let xs: Vec<f64> = part.0.iter().map(|c| c.x).collect();
            let lo = xs.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            (lo, hi)
        })
        .collect();
    spans.sort_by(|a, b| a.0.total_cmp(&b.0));
    assert_eq!(spans[0], (0.0, 2900.0));
    assert_eq!(spans[1], (3102.0, 5002.0));
}

#[test]
fn test_three_of_ten_components_cover_the_stations() {
    let components: Vec<MultiLineString> = (0..10)
        .map(|k| MultiLineString::new(vec![straight(0.0, 2000.0, k as f64 * 1000.0, 2000.0)]))
        .collect();

    // 20 + 15 + 12 stations along components 0..3, one each near 3..6
    let mut stations = Vec::new();
    for (k, count) in [(0usize, 20usize), (1, 15), (2, 12), (3, 1), (4, 1), (5, 1)] {
        for i in 0..count {
            let x = 100.0 + i as f64 * 1800.0 / count as f64;
            stations.push(at(x, k as f64 * 1000.0 + 30.0));
        }
    }
    assert_eq!(stations.len(), 50);

    let selection = select_mainline(&components, &stations, &SelectorConfig::default()).unwrap();
    let mut chosen = selection.chosen.clone();
    chosen.sort();
    assert_eq!(chosen, vec![0, 1, 2]);
    assert_eq!(selection.stations_hit, 47);
    assert!(selection.hit_ratio >= 0.92 && selection.hit_ratio <= 1.0);
    assert!((Euclidean.length(&selection.representative) - 2000.0).abs() < 1e-9);
}

#[test]
fn test_clusterer_separates_curved_double_track() {
    // Gentle S-curve; both rails cut at the same stations along the curve.
    let centre = |t: f64| at(t, 300.0 * (t / 1500.0).sin());
    let normal = |t: f64| {
        let slope = 300.0 / 1500.0 * (t / 1500.0).cos();
        let len = (1.0 + slope * slope).sqrt();
        (-slope / len, 1.0 / len)
    };
    let rail = |t: f64, side: f64| {
        let (c, (nx, ny)) = (centre(t), normal(t));
        at(c.x + side * 6.0 * nx, c.y + side * 6.0 * ny)
    };

    let mut segments = Vec::new();
    let mut truth = Vec::new();
    for k in 0..100 {
        let (t0, t1) = (k as f64 * 40.0, k as f64 * 40.0 + 40.0);
        segments.push(TrackSegment::new(rail(t0, -1.0), rail(t1, -1.0)));
        truth.push(0);
        segments.push(TrackSegment::new(rail(t1, 1.0), rail(t0, 1.0)));
        truth.push(1);
    }

    let pair = cluster_track_pair(&segments, &ClusterConfig::default()).unwrap();
    let direct = pair
        .labels
        .iter()
        .zip(&truth)
        .filter(|(l, t)| (**l == CorridorLabel::A) == (**t == 0))
        .count();
    let accuracy = direct.max(truth.len() - direct) as f64 / truth.len() as f64;
    assert!(accuracy >= 0.95, "accuracy {}", accuracy);
}

#[test]
fn test_components_from_merged_network() {
    let merged = MultiLineString::new(vec![
        straight(0.0, 1000.0, 0.0, 1000.0),
        straight(1000.0, 2000.0, 0.0, 1000.0),
        straight(5000.0, 6000.0, 0.0, 1000.0),
    ]);
    let components = connected_components(&merged);
    assert_eq!(components.len(), 2);
}

#[test]
fn test_spur_joining_mid_line_stays_connected() {
    // The spur starts 1.6 m off a vertex in the middle of the main line.
    let lines = vec![
        straight(0.0, 2000.0, 0.0, 100.0),
        line_string![(x: 1001.5, y: 0.5), (x: 1001.5, y: 800.0)],
    ];
    assert_eq!(network_components(&lines, 5.0).len(), 1);

    let config = RouterConfig::default();
    let graph = TrackGraph::from_network(&lines, &config);
    let stations: Vec<Station> = [at(0.0, 0.0), at(1000.0, 0.0), at(1001.5, 800.0)]
        .into_iter()
        .enumerate()
        .map(|(i, position)| Station {
            name: Some(format!("S{}", i + 1)),
            position,
            order_key: Some(i as f64),
        })
        .collect();
    let positions: Vec<Coord> = stations.iter().map(|s| s.position).collect();

    let routed = route_stations(&graph, &stations, &positions, &config).unwrap();
    assert!(routed.gap_legs.is_empty(), "gaps {:?}", routed.gap_legs);
    assert_eq!(routed.legs, 2);
}

#[test]
fn test_auto_falls_through_to_station_score() {
    // Two far-apart single tracks cluster fine but have no midline; one station
    // sits nowhere near the track, so the router cannot anchor it either.
    let lines = vec![
        straight(0.0, 3000.0, 0.0, 100.0),
        straight(0.0, 800.0, 5000.0, 100.0),
    ];
    let stations = StationSet {
        frame: None,
        stations: [0.0, 1000.0, 2000.0, 3000.0]
            .iter()
            .map(|&x| Station::new(at(x, 0.0)))
            .chain(std::iter::once(Station::new(at(10000.0, 10000.0))))
            .collect(),
    };
    let input = RouteInput {
        name: "fragmented".to_string(),
        lines: RouteGeometry {
            frame: Some(Frame::Epsg(6677)),
            geometries: lines.into_iter().map(Geometry::LineString).collect(),
        },
        stations: Some(stations),
    };

    let outcome = CenterlineEngine::new(PipelineConfig::default()).process(&input);
    assert_eq!(outcome.status, RouteStatus::Ok);
    assert_eq!(
        outcome.strategy,
        Some(crate::config::Strategy::StationScore),
        "{:?}",
        outcome.diagnostics.attempts
    );
    let failed: Vec<RouteStatus> = outcome.diagnostics.attempts.iter().map(|a| a.status).collect();
    assert_eq!(
        failed,
        vec![RouteStatus::MidlineFailed, RouteStatus::UnreachableStation]
    );
    assert_eq!(outcome.diagnostics.stations_hit, Some(4));
    let ratio = outcome.diagnostics.hit_ratio.unwrap();
    assert!((ratio - 0.8).abs() < 1e-12);
    assert_eq!(outcome.source_frame, Some(Frame::Epsg(6677)));
}

#[test]
fn test_auto_reports_last_failure() {
    let input = RouteInput {
        name: "points".to_string(),
        lines: RouteGeometry {
            frame: Some(Frame::Wgs84),
            geometries: vec![Geometry::LineString(line_string![(x: 139.7, y: 35.6)])],
        },
        stations: None,
    };
    let outcome = CenterlineEngine::new(PipelineConfig::default()).process(&input);
    assert_eq!(outcome.status, RouteStatus::NoGeometry);
    assert!(outcome.centerline.is_none());
}
