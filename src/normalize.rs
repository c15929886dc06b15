use crate::error::CenterlineError;
use crate::geometry_utils::{centroid_of_line, dedupe_consecutive};
use crate::projection::{Frame, Reprojector};
use geo::{BoundingRect, Coord, Distance, Euclidean, Geometry, Length, Line, LineString, MultiLineString};
use log::debug;

/// Raw route geometry as handed over by the I/O side.
#[derive(Debug, Clone, Default)]
pub struct RouteGeometry {
    /// `None` when the source carried no frame at all
    pub frame: Option<Frame>,
    pub geometries: Vec<Geometry>,
}

/// An atomic two-point piece of track in metric coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSegment {
    pub start: Coord,
    pub end: Coord,
    pub length: f64,
    /// Direction angle in radians, `atan2(dy, dx)`
    pub angle: f64,
}

impl TrackSegment {
    pub fn new(start: Coord, end: Coord) -> Self {
        Self {
            start,
            end,
            length: Euclidean.distance(start, end),
            angle: (end.y - start.y).atan2(end.x - start.x),
        }
    }

    pub fn line(&self) -> Line {
        Line::new(self.start, self.end)
    }

    pub fn centroid(&self) -> Coord {
        centroid_of_line(&self.line())
    }
}

/// Normalized line network of one route in a single metric frame.
#[derive(Debug, Clone)]
pub struct MetricNetwork {
    /// Frame the input arrived in; results are converted back to it
    pub source_frame: Frame,
    /// Metric frame all `lines` are expressed in
    pub frame: Frame,
    pub lines: Vec<LineString>,
}

impl MetricNetwork {
    pub fn total_length(&self) -> f64 {
        self.lines.iter().map(|l| Euclidean.length(l)).sum()
    }

    /// Explode every line into atomic segments, dropping those shorter than `min_len_m`.
    pub fn segments(&self, min_len_m: f64) -> Vec<TrackSegment> {
        self.lines
            .iter()
            .flat_map(|l| l.lines())
            .filter(|l| l.start != l.end)
            .map(|l| TrackSegment::new(l.start, l.end))
            .filter(|s| s.length >= min_len_m)
            .collect()
    }

    /// Bring points from `from` (defaults to the source frame) into the metric frame.
    pub fn project_points(
        &self,
        coords: &[Coord],
        from: Option<Frame>,
        reprojector: &impl Reprojector,
    ) -> Result<Vec<Coord>, CenterlineError> {
        let from = from.unwrap_or(self.source_frame);
        reprojector.reproject_all(coords, &from, &self.frame)
    }

    /// Convert derived metric geometry back into the source frame.
    pub fn to_source(
        &self,
        geometry: &MultiLineString,
        reprojector: &impl Reprojector,
    ) -> Result<MultiLineString, CenterlineError> {
        let parts = geometry
            .0
            .iter()
            .map(|line| {
                reprojector
                    .reproject_all(&line.0, &self.frame, &self.source_frame)
                    .map(LineString::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MultiLineString::new(parts))
    }
}

/// Recursively flatten everything line-like into simple curves.
///
/// Points, polygons, empties and degenerate (single-vertex) lines are dropped.
pub fn explode_lines(geometries: &[Geometry]) -> Vec<LineString> {
    let mut out = Vec::new();
    for g in geometries {
        explode_into(g, &mut out);
    }
    out
}

fn explode_into(geometry: &Geometry, out: &mut Vec<LineString>) {
    match geometry {
        Geometry::LineString(line) => push_clean(&line.0, out),
        Geometry::MultiLineString(multi) => {
            for line in &multi.0 {
                push_clean(&line.0, out);
            }
        }
        Geometry::Line(line) => push_clean(&[line.start, line.end], out),
        Geometry::GeometryCollection(collection) => {
            for g in &collection.0 {
                explode_into(g, out);
            }
        }
        _ => {}
    }
}

fn push_clean(coords: &[Coord], out: &mut Vec<LineString>) {
    let cleaned = dedupe_consecutive(coords);
    if cleaned.len() >= 2 && cleaned.iter().all(|c| c.x.is_finite() && c.y.is_finite()) {
        out.push(LineString::new(cleaned));
    }
}

fn bbox_center(lines: &[LineString]) -> Option<Coord> {
    let rect = lines
        .iter()
        .filter_map(|l| l.bounding_rect())
        .reduce(|a, b| {
            geo::Rect::new(
                Coord {
                    x: a.min().x.min(b.min().x),
                    y: a.min().y.min(b.min().y),
                },
                Coord {
                    x: a.max().x.max(b.max().x),
                    y: a.max().y.max(b.max().y),
                },
            )
        })?;
    Some(rect.center())
}

/// Flatten the route geometry and bring it into one metric frame.
///
/// Geographic input is projected into the UTM zone around its bounding-box center;
/// metric input passes through unchanged.
pub fn normalize(
    input: &RouteGeometry,
    reprojector: &impl Reprojector,
) -> Result<MetricNetwork, CenterlineError> {
    let source_frame = input.frame.ok_or(CenterlineError::NoFrame)?;

    let lines = explode_lines(&input.geometries);
    if lines.is_empty() {
        return Err(CenterlineError::NoGeometry);
    }

    let frame = if reprojector.is_angular(&source_frame) {
        let center = bbox_center(&lines).ok_or(CenterlineError::NoGeometry)?;
        Frame::utm_zone_for(center.x, center.y)
    } else {
        source_frame
    };

    let lines = if frame == source_frame {
        lines
    } else {
        lines
            .iter()
            .map(|l| {
                reprojector
                    .reproject_all(&l.0, &source_frame, &frame)
                    .map(LineString::new)
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    debug!(
        "Normalized {} lines from {} into {}",
        lines.len(),
        source_frame,
        frame
    );

    Ok(MetricNetwork {
        source_frame,
        frame,
        lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::UtmReprojector;
    use geo::{GeometryCollection, Point, line_string, polygon};

    #[test]
    fn test_explode_drops_non_lines() {
        let geometries = vec![
            Geometry::Point(Point::new(1.0, 2.0)),
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0)]),
            Geometry::LineString(LineString::new(vec![])),
            Geometry::LineString(line_string![(x: 5.0, y: 5.0), (x: 5.0, y: 5.0)]),
            Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)]),
            Geometry::GeometryCollection(GeometryCollection::new_from(vec![
                Geometry::MultiLineString(MultiLineString::new(vec![
                    line_string![(x: 0.0, y: 1.0), (x: 10.0, y: 1.0)],
                    line_string![(x: 0.0, y: 2.0), (x: 10.0, y: 2.0), (x: 10.0, y: 2.0)],
                ])),
            ])),
        ];

        let lines = explode_lines(&geometries);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].0.len(), 2, "repeated vertex should be removed");
    }

    #[test]
    fn test_geographic_input_is_projected_to_utm() {
        let input = RouteGeometry {
            frame: Some(Frame::Wgs84),
            geometries: vec![Geometry::LineString(
                line_string![(x: 139.70, y: 35.68), (x: 139.71, y: 35.68)],
            )],
        };
        let network = normalize(&input, &UtmReprojector).unwrap();
        assert_eq!(
            network.frame,
            Frame::Utm {
                zone: 54,
                north: true
            }
        );
        // 0.01 degree of longitude at 35.68N is about 904 m.
        let len = network.total_length();
        assert!(len > 895.0 && len < 912.0, "got {}", len);
    }

    #[test]
    fn test_metric_input_passes_through() {
        let input = RouteGeometry {
            frame: Some(Frame::Epsg(6677)),
            geometries: vec![Geometry::LineString(
                line_string![(x: 100.0, y: 100.0), (x: 200.0, y: 100.0)],
            )],
        };
        let network = normalize(&input, &UtmReprojector).unwrap();
        assert_eq!(network.frame, Frame::Epsg(6677));
        assert_eq!(network.lines[0].0[0], Coord { x: 100.0, y: 100.0 });
    }

    #[test]
    fn test_failure_conditions() {
        let no_frame = RouteGeometry {
            frame: None,
            geometries: vec![Geometry::LineString(
                line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
            )],
        };
        assert_eq!(
            normalize(&no_frame, &UtmReprojector).unwrap_err(),
            CenterlineError::NoFrame
        );

        let no_lines = RouteGeometry {
            frame: Some(Frame::Wgs84),
            geometries: vec![Geometry::Point(Point::new(139.7, 35.6))],
        };
        assert_eq!(
            normalize(&no_lines, &UtmReprojector).unwrap_err(),
            CenterlineError::NoGeometry
        );
    }

    #[test]
    fn test_segments_filter_short_pieces() {
        let network = MetricNetwork {
            source_frame: Frame::Epsg(6677),
            frame: Frame::Epsg(6677),
            lines: vec![line_string![
                (x: 0.0, y: 0.0),
                (x: 100.0, y: 0.0),
                (x: 103.0, y: 0.0),
                (x: 103.0, y: 50.0)
            ]],
        };
        let segments = network.segments(12.0);
        assert_eq!(segments.len(), 2);
        assert!((segments[1].angle - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((segments[1].length - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_to_source_roundtrip() {
        let input = RouteGeometry {
            frame: Some(Frame::Wgs84),
            geometries: vec![Geometry::LineString(
                line_string![(x: 139.70, y: 35.68), (x: 139.72, y: 35.69)],
            )],
        };
        let network = normalize(&input, &UtmReprojector).unwrap();
        let back = network
            .to_source(&MultiLineString::new(network.lines.clone()), &UtmReprojector)
            .unwrap();
        let c = back.0[0].0[1];
        assert!((c.x - 139.72).abs() < 1e-7);
        assert!((c.y - 35.69).abs() < 1e-7);
    }
}
