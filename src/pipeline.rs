use crate::cluster::cluster_track_pair;
use crate::config::{OutputConfig, PipelineConfig, Strategy};
use crate::error::{CenterlineError, RouteStatus};
use crate::geometry_utils::{chaikin_smooth, remove_tiny_segments, simplify_multi};
use crate::mainline::{network_components, select_mainline};
use crate::midline::synthesize;
use crate::normalize::{MetricNetwork, RouteGeometry, normalize};
use crate::projection::{Frame, Reprojector, UtmReprojector};
use crate::stations::StationSet;
use crate::track_graph::{TrackGraph, route_stations};
use geo::{Euclidean, Length, LineString, MultiLineString};
use log::{info, warn};

/// Everything the core needs to derive one route's centerline.
#[derive(Debug, Clone, Default)]
pub struct RouteInput {
    pub name: String,
    pub lines: RouteGeometry,
    pub stations: Option<StationSet>,
}

/// One strategy that was tried and failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub strategy: Strategy,
    pub status: RouteStatus,
    pub message: String,
}

/// Numeric diagnostics for the reporting side.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub metric_frame: Option<Frame>,
    pub segments: usize,
    pub len_a_m: Option<f64>,
    pub len_b_m: Option<f64>,
    pub centerline_length_m: Option<f64>,
    pub stations_total: usize,
    pub stations_hit: Option<usize>,
    pub hit_ratio: Option<f64>,
    pub gaps: Option<usize>,
    pub attempts: Vec<Attempt>,
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub route: String,
    pub status: RouteStatus,
    /// Strategy that produced `centerline`
    pub strategy: Option<Strategy>,
    pub source_frame: Option<Frame>,
    /// Derived curve in the source frame
    pub centerline: Option<MultiLineString>,
    /// A and B corridors in the source frame (cluster strategy only)
    pub corridors: Option<(MultiLineString, MultiLineString)>,
    pub diagnostics: Diagnostics,
}

impl RouteOutcome {
    fn failed(route: &str, err: &CenterlineError, diagnostics: Diagnostics) -> Self {
        Self {
            route: route.to_string(),
            status: err.status(),
            strategy: None,
            source_frame: None,
            centerline: None,
            corridors: None,
            diagnostics,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RouteStatus::Ok
    }

    /// Message of the last failed attempt, if any.
    pub fn message(&self) -> Option<&str> {
        self.diagnostics
            .attempts
            .last()
            .map(|a| a.message.as_str())
    }
}

/// Metric result of one successful strategy
struct Derived {
    centerline: MultiLineString,
    corridors: Option<(MultiLineString, MultiLineString)>,
}

/// Per-route driver: normalization, strategy selection and conversion back to
/// the source frame.
pub struct CenterlineEngine<R: Reprojector = UtmReprojector> {
    config: PipelineConfig,
    reprojector: R,
}

impl CenterlineEngine<UtmReprojector> {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_reprojector(config, UtmReprojector)
    }
}

impl<R: Reprojector> CenterlineEngine<R> {
    pub fn with_reprojector(config: PipelineConfig, reprojector: R) -> Self {
        Self {
            config,
            reprojector,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Strategies tried for a route, in order.
    pub fn plan(&self, has_stations: bool) -> Vec<Strategy> {
        match self.config.strategy {
            Strategy::Auto if has_stations => vec![
                Strategy::ClusterMidline,
                Strategy::StationPath,
                Strategy::StationScore,
            ],
            Strategy::Auto => vec![Strategy::ClusterMidline, Strategy::StationScore],
            single => vec![single],
        }
    }

    /// Derive one route's centerline. Failures never escape: they are folded
    /// into the outcome's status and diagnostics.
    pub fn process(&self, input: &RouteInput) -> RouteOutcome {
        let mut diagnostics = Diagnostics {
            stations_total: input.stations.as_ref().map_or(0, StationSet::len),
            ..Diagnostics::default()
        };

        let network = match normalize(&input.lines, &self.reprojector) {
            Ok(network) => network,
            Err(err) => {
                warn!("{}: {}", input.name, err);
                diagnostics.attempts.push(Attempt {
                    strategy: self.config.strategy,
                    status: err.status(),
                    message: err.to_string(),
                });
                return RouteOutcome::failed(&input.name, &err, diagnostics);
            }
        };
        diagnostics.metric_frame = Some(network.frame);
        diagnostics.segments = network.segments(self.config.normalize.min_segment_len_m).len();

        let has_stations = input.stations.as_ref().is_some_and(|s| !s.is_empty());
        let plan = self.plan(has_stations);
        let mut last_err = CenterlineError::NoGeometry;

        for strategy in plan {
            let result = self
                .run_strategy(strategy, &network, input.stations.as_ref(), &mut diagnostics)
                .and_then(|derived| self.finish(derived, &network, &mut diagnostics));

            match result {
                Ok((centerline, corridors)) => {
                    // Corridor lengths only describe a cluster-derived centerline
                    if strategy != Strategy::ClusterMidline {
                        diagnostics.len_a_m = None;
                        diagnostics.len_b_m = None;
                    }
                    info!(
                        "{}: OK via {} ({:.0} m, {} part(s))",
                        input.name,
                        strategy,
                        diagnostics.centerline_length_m.unwrap_or(0.0),
                        centerline.0.len()
                    );
                    return RouteOutcome {
                        route: input.name.clone(),
                        status: RouteStatus::Ok,
                        strategy: Some(strategy),
                        source_frame: Some(network.source_frame),
                        centerline: Some(centerline),
                        corridors,
                        diagnostics,
                    };
                }
                Err(err) => {
                    warn!("{}: {} failed: {}", input.name, strategy, err);
                    diagnostics.attempts.push(Attempt {
                        strategy,
                        status: err.status(),
                        message: err.to_string(),
                    });
                    last_err = err;
                }
            }
        }

        info!("{}: {}", input.name, last_err.status());
        let mut outcome = RouteOutcome::failed(&input.name, &last_err, diagnostics);
        outcome.source_frame = Some(network.source_frame);
        outcome
    }

    fn station_positions(
        &self,
        network: &MetricNetwork,
        stations: Option<&StationSet>,
    ) -> Result<Vec<geo::Coord>, CenterlineError> {
        match stations {
            Some(set) => network.project_points(&set.positions(), set.frame, &self.reprojector),
            None => Ok(Vec::new()),
        }
    }

    fn run_strategy(
        &self,
        strategy: Strategy,
        network: &MetricNetwork,
        stations: Option<&StationSet>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Derived, CenterlineError> {
        let config = &self.config;
        match strategy {
            Strategy::ClusterMidline => {
                let segments = network.segments(config.normalize.min_segment_len_m);
                let pair = cluster_track_pair(&segments, &config.cluster).inspect_err(|err| {
                    if let CenterlineError::WeakCluster { len_a_m, len_b_m } = err {
                        diagnostics.len_a_m = Some(*len_a_m);
                        diagnostics.len_b_m = Some(*len_b_m);
                    }
                })?;
                let corridor_a = simplify_multi(&pair.corridor_a, config.output.simplify_m);
                let corridor_b = simplify_multi(&pair.corridor_b, config.output.simplify_m);
                diagnostics.len_a_m = Some(Euclidean.length(&corridor_a));
                diagnostics.len_b_m = Some(Euclidean.length(&corridor_b));

                let centerline = synthesize(&corridor_a, &corridor_b, &config.midline)?;
                Ok(Derived {
                    centerline: centerline.geometry,
                    corridors: Some((corridor_a, corridor_b)),
                })
            }
            Strategy::StationPath => {
                let empty = StationSet::default();
                let set = stations.unwrap_or(&empty);
                let positions = self.station_positions(network, stations)?;
                let graph = TrackGraph::from_network(&network.lines, &config.router);
                let routed = route_stations(&graph, &set.stations, &positions, &config.router)?;
                diagnostics.gaps = Some(routed.gaps());
                Ok(Derived {
                    centerline: routed.geometry,
                    corridors: None,
                })
            }
            Strategy::StationScore => {
                let positions = self.station_positions(network, stations)?;
                let components =
                    network_components(&network.lines, config.selector.snap_tolerance_m);
                let selection = select_mainline(&components, &positions, &config.selector)?;
                diagnostics.stations_hit = Some(selection.stations_hit);
                diagnostics.hit_ratio = Some(selection.hit_ratio);
                Ok(Derived {
                    centerline: MultiLineString::new(vec![selection.representative]),
                    corridors: None,
                })
            }
            // Auto is expanded by `plan` and never reaches here
            Strategy::Auto => Err(CenterlineError::NoGeometry),
        }
    }

    /// Post-process the metric result and bring it back to the source frame.
    #[allow(clippy::type_complexity)]
    fn finish(
        &self,
        derived: Derived,
        network: &MetricNetwork,
        diagnostics: &mut Diagnostics,
    ) -> Result<(MultiLineString, Option<(MultiLineString, MultiLineString)>), CenterlineError>
    {
        let centerline = post_process(&derived.centerline, &self.config.output);
        diagnostics.centerline_length_m = Some(Euclidean.length(&centerline));

        let corridors = match derived.corridors {
            Some((a, b)) if self.config.output.write_corridors => Some((
                network.to_source(&a, &self.reprojector)?,
                network.to_source(&b, &self.reprojector)?,
            )),
            _ => None,
        };
        Ok((network.to_source(&centerline, &self.reprojector)?, corridors))
    }
}

/// Simplify, then optionally smooth every part of a metric curve.
pub fn post_process(curve: &MultiLineString, config: &OutputConfig) -> MultiLineString {
    let simplified = simplify_multi(curve, config.simplify_m);
    if config.smoothing_iterations == 0 {
        return simplified;
    }
    MultiLineString::new(
        simplified
            .0
            .iter()
            .map(|part| {
                let smooth: LineString = chaikin_smooth(part, config.smoothing_iterations);
                remove_tiny_segments(&smooth, config.min_vertex_spacing_m)
            })
            .collect(),
    )
}
