use crate::normalize::RouteGeometry;
use crate::projection::Frame;
use crate::stations::{Station, StationSet};
use anyhow::{Context, Result};
use geo::{Centroid, Coord, Geometry, MultiLineString};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue};
use log::debug;
use regex::Regex;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Order fields tried, in this order, when none is configured
pub const ORDER_FIELD_CANDIDATES: [&str; 7] = [
    "seq",
    "order",
    "station_order",
    "idx",
    "index",
    "no",
    "station_no",
];

const NAME_FIELDS: [&str; 3] = ["name", "station_name", "title"];

pub fn read_geojson(path: &Path) -> Result<GeoJson> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    text.parse::<GeoJson>()
        .with_context(|| format!("parsing {}", path.display()))
}

/// Frame named by the legacy `crs` member. No member means WGS84; a member
/// that cannot be understood means no usable frame.
pub fn frame_of(geojson: &GeoJson) -> Option<Frame> {
    let foreign = match geojson {
        GeoJson::FeatureCollection(fc) => fc.foreign_members.as_ref(),
        GeoJson::Feature(f) => f.foreign_members.as_ref(),
        GeoJson::Geometry(g) => g.foreign_members.as_ref(),
    };
    let Some(crs) = foreign.and_then(|members| members.get("crs")) else {
        return Some(Frame::Wgs84);
    };
    crs.get("properties")
        .and_then(|p| p.get("name"))
        .and_then(JsonValue::as_str)
        .and_then(|name| name.parse::<Frame>().ok())
}

fn features(geojson: GeoJson) -> Vec<Feature> {
    match geojson {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(g) => vec![Feature {
            bbox: None,
            geometry: Some(g),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    }
}

fn to_geo(feature: &Feature) -> Option<Geometry> {
    let geometry = feature.geometry.clone()?;
    match Geometry::<f64>::try_from(geometry) {
        Ok(g) => Some(g),
        Err(e) => {
            debug!("Skipping unconvertible geometry: {}", e);
            None
        }
    }
}

/// Read every feature geometry of a route line file.
pub fn read_route_lines(path: &Path) -> Result<RouteGeometry> {
    let geojson = read_geojson(path)?;
    let frame = frame_of(&geojson);
    let geometries = features(geojson).iter().filter_map(to_geo).collect();
    Ok(RouteGeometry { frame, geometries })
}

/// Numeric value of a property, accepting numeric strings.
fn numeric(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn station_name(properties: Option<&JsonObject>) -> Option<String> {
    let properties = properties?;
    NAME_FIELDS
        .iter()
        .find_map(|field| properties.get(*field).and_then(JsonValue::as_str))
        .map(str::to_string)
}

/// Point positions of a station geometry: points as-is, multi-points exploded,
/// anything else reduced to its centroid.
fn station_points(geometry: &Geometry) -> Vec<Coord> {
    match geometry {
        Geometry::Point(p) => vec![p.0],
        Geometry::MultiPoint(mp) => mp.0.iter().map(|p| p.0).collect(),
        other => other.centroid().map(|p| p.0).into_iter().collect(),
    }
}

/// First of [`ORDER_FIELD_CANDIDATES`] present on any feature.
pub fn detect_order_field(features: &[Feature]) -> Option<&'static str> {
    ORDER_FIELD_CANDIDATES.iter().copied().find(|field| {
        features
            .iter()
            .any(|f| f.properties.as_ref().is_some_and(|p| p.contains_key(*field)))
    })
}

/// Read a station point file.
///
/// `order_field` names the property holding the route sequence; when `None`
/// the first known candidate present is used.
pub fn read_stations(path: &Path, order_field: Option<&str>) -> Result<StationSet> {
    let geojson = read_geojson(path)?;
    let frame = frame_of(&geojson);
    let features = features(geojson);
    let order_field = order_field.or_else(|| detect_order_field(&features));

    let mut stations = Vec::new();
    for feature in &features {
        let Some(geometry) = to_geo(feature) else {
            continue;
        };
        let properties = feature.properties.as_ref();
        let name = station_name(properties);
        let order_key = order_field
            .and_then(|field| properties.and_then(|p| p.get(field)))
            .and_then(numeric);

        for position in station_points(&geometry) {
            stations.push(Station {
                name: name.clone(),
                position,
                order_key,
            });
        }
    }
    debug!(
        "{}: {} stations (order field {:?})",
        path.display(),
        stations.len(),
        order_field
    );
    Ok(StationSet { frame, stations })
}

/// `<stem>_stations.geojson` when present, else the first file (by name) that
/// contains the stem and ends in `_stations.geojson`.
pub fn find_station_file(stations_dir: &Path, route_stem: &str) -> Option<PathBuf> {
    let exact = stations_dir.join(format!("{}_stations.geojson", route_stem));
    if exact.is_file() {
        return Some(exact);
    }
    let mut hits: Vec<PathBuf> = std::fs::read_dir(stations_dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(route_stem) && n.ends_with("_stations.geojson"))
        })
        .collect();
    hits.sort();
    hits.into_iter().next()
}

/// Translate a shell-style file pattern (`*`, `?`) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).with_context(|| format!("invalid file pattern '{}'", pattern))
}

/// Write one curve as a single-feature collection, tagging non-WGS84 frames
/// with a `crs` member.
pub fn write_curve(
    path: &Path,
    curve: &MultiLineString,
    frame: Frame,
    properties: JsonObject,
) -> Result<()> {
    let feature = Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(curve))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    };

    let foreign_members = (frame != Frame::Wgs84).then(|| {
        let mut members = JsonObject::new();
        members.insert(
            "crs".to_string(),
            serde_json::json!({
                "type": "name",
                "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", frame.epsg()) }
            }),
        );
        members
    });

    let geojson = GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features: vec![feature],
        foreign_members,
    });

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer(file, &geojson)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sumac_io_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_frame_from_crs_member() {
        let metric: GeoJson = r#"{"type":"FeatureCollection","features":[],
            "crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:EPSG::6677"}}}"#
            .parse()
            .unwrap();
        assert_eq!(frame_of(&metric), Some(Frame::Epsg(6677)));

        let plain: GeoJson = r#"{"type":"FeatureCollection","features":[]}"#.parse().unwrap();
        assert_eq!(frame_of(&plain), Some(Frame::Wgs84));

        let crs84: GeoJson = r#"{"type":"FeatureCollection","features":[],
            "crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:OGC:1.3:CRS84"}}}"#
            .parse()
            .unwrap();
        assert_eq!(frame_of(&crs84), Some(Frame::Wgs84));

        let broken: GeoJson = r#"{"type":"FeatureCollection","features":[],
            "crs":{"type":"name","properties":{"name":"local grid"}}}"#
            .parse()
            .unwrap();
        assert_eq!(frame_of(&broken), None);
    }

    #[test]
    fn test_read_stations_coerces_and_orders() {
        let dir = scratch_dir("stations");
        let path = dir.join("ginza_stations.geojson");
        std::fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[
              {"type":"Feature","properties":{"name":"A","seq":"2"},
               "geometry":{"type":"Point","coordinates":[139.70,35.68]}},
              {"type":"Feature","properties":{"name":"B","seq":1},
               "geometry":{"type":"Polygon","coordinates":[[[0,0],[2,0],[2,2],[0,2],[0,0]]]}},
              {"type":"Feature","properties":{"seq":3},
               "geometry":{"type":"MultiPoint","coordinates":[[1,1],[3,3]]}},
              {"type":"Feature","properties":{"seq":4},"geometry":null}
            ]}"#,
        )
        .unwrap();

        let set = read_stations(&path, None).unwrap();
        assert_eq!(set.frame, Some(Frame::Wgs84));
        assert_eq!(set.len(), 4);
        assert_eq!(set.stations[0].order_key, Some(2.0));
        assert_eq!(set.stations[1].name.as_deref(), Some("B"));
        assert_eq!(set.stations[1].position, Coord { x: 1.0, y: 1.0 });
        assert!(set.has_explicit_order());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_find_station_file() {
        let dir = scratch_dir("find");
        std::fs::write(dir.join("x-tokyo-metro-ginza_stations.geojson"), "{}").unwrap();
        std::fs::write(dir.join("a-tokyo-metro-ginza_stations.geojson"), "{}").unwrap();
        std::fs::write(dir.join("tokyo-metro-hibiya_stations.geojson"), "{}").unwrap();

        assert_eq!(
            find_station_file(&dir, "tokyo-metro-hibiya"),
            Some(dir.join("tokyo-metro-hibiya_stations.geojson"))
        );
        assert_eq!(
            find_station_file(&dir, "tokyo-metro-ginza"),
            Some(dir.join("a-tokyo-metro-ginza_stations.geojson"))
        );
        assert_eq!(find_station_file(&dir, "toei-oedo"), None);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("tokyo-metro-*.geojson").unwrap();
        assert!(re.is_match("tokyo-metro-ginza.geojson"));
        assert!(!re.is_match("tokyo-metro-ginza.geojson.bak"));
        assert!(!re.is_match("toei-tokyo-metro-ginza.geojson"));
    }

    #[test]
    fn test_write_then_read_curve() {
        let dir = scratch_dir("write");
        let path = dir.join("out.geojson");
        let curve = MultiLineString::new(vec![line_string![(x: 0.0, y: 0.0), (x: 10.0, y: 5.0)]]);
        let mut props = JsonObject::new();
        props.insert("route".to_string(), "ginza".into());
        write_curve(&path, &curve, Frame::Epsg(6677), props).unwrap();

        let back = read_route_lines(&path).unwrap();
        assert_eq!(back.frame, Some(Frame::Epsg(6677)));
        assert_eq!(back.geometries.len(), 1);
        assert!(matches!(back.geometries[0], Geometry::MultiLineString(_)));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
