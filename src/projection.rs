// ===========================================================================
// Coordinate frames and UTM conversion (WGS84 <-> transverse Mercator)
// ===========================================================================
use crate::error::CenterlineError;
use geo::Coord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const WGS84_A: f64 = 6378137.0;
pub const WGS84_F: f64 = 1.0 / 298.257223563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// A coordinate reference frame the core knows how to reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frame {
    /// Geographic longitude/latitude in degrees (EPSG:4326 and aliases)
    Wgs84,
    /// A 6 degree UTM zone on WGS84 (EPSG:326xx / 327xx)
    Utm { zone: u8, north: bool },
    /// Any other frame identified by EPSG code; assumed metric
    Epsg(u32),
}

impl Frame {
    pub fn epsg(&self) -> u32 {
        match self {
            Frame::Wgs84 => 4326,
            Frame::Utm { zone, north: true } => 32600 + *zone as u32,
            Frame::Utm { zone, north: false } => 32700 + *zone as u32,
            Frame::Epsg(code) => *code,
        }
    }

    pub fn from_epsg(code: u32) -> Self {
        match code {
            4326 | 4258 | 6668 | 4612 => Frame::Wgs84,
            32601..=32660 => Frame::Utm {
                zone: (code - 32600) as u8,
                north: true,
            },
            32701..=32760 => Frame::Utm {
                zone: (code - 32700) as u8,
                north: false,
            },
            other => Frame::Epsg(other),
        }
    }

    /// UTM zone surrounding a geographic position: 6 degree wide, hemisphere by latitude sign.
    pub fn utm_zone_for(lon: f64, lat: f64) -> Self {
        let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u8;
        Frame::Utm {
            zone,
            north: lat >= 0.0,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Frame {
    type Err = String;

    /// Accepts `EPSG:4326`, `urn:ogc:def:crs:EPSG::32654`, `urn:ogc:def:crs:OGC:1.3:CRS84`
    /// and bare codes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.to_ascii_uppercase().ends_with("CRS84") {
            return Ok(Frame::Wgs84);
        }
        let code = trimmed
            .rsplit(':')
            .find(|part| !part.is_empty())
            .ok_or_else(|| format!("unrecognised frame identifier '{}'", s))?;
        code.parse::<u32>()
            .map(Frame::from_epsg)
            .map_err(|_| format!("unrecognised frame identifier '{}'", s))
    }
}

/// The two capabilities the core needs from a reprojection collaborator.
pub trait Reprojector {
    /// Is this frame angular (degrees) rather than metric?
    fn is_angular(&self, frame: &Frame) -> bool;

    /// Reproject one coordinate between frames.
    fn reproject(&self, coord: Coord, from: &Frame, to: &Frame) -> Result<Coord, CenterlineError>;

    fn reproject_all(
        &self,
        coords: &[Coord],
        from: &Frame,
        to: &Frame,
    ) -> Result<Vec<Coord>, CenterlineError> {
        coords
            .iter()
            .map(|c| self.reproject(*c, from, to))
            .collect()
    }
}

/// Built-in reprojector covering WGS84 and the UTM zones.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtmReprojector;

impl Reprojector for UtmReprojector {
    fn is_angular(&self, frame: &Frame) -> bool {
        matches!(frame, Frame::Wgs84)
    }

    fn reproject(&self, coord: Coord, from: &Frame, to: &Frame) -> Result<Coord, CenterlineError> {
        if from == to {
            return Ok(coord);
        }
        match (from, to) {
            (Frame::Wgs84, Frame::Utm { zone, north }) => {
                let (x, y) = lon_lat_to_utm(coord.x, coord.y, *zone, *north);
                Ok(Coord { x, y })
            }
            (Frame::Utm { zone, north }, Frame::Wgs84) => {
                let (lon, lat) = utm_to_lon_lat(coord.x, coord.y, *zone, *north);
                Ok(Coord { x: lon, y: lat })
            }
            (Frame::Utm { .. }, Frame::Utm { .. }) => {
                let geographic = self.reproject(coord, from, &Frame::Wgs84)?;
                self.reproject(geographic, &Frame::Wgs84, to)
            }
            _ => Err(CenterlineError::Reprojection(format!(
                "no conversion from {} to {}",
                from, to
            ))),
        }
    }
}

fn central_meridian(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

fn meridian_arc(phi: f64, e2: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Convert lon/lat degrees to UTM easting/northing in meters (Snyder series).
pub fn lon_lat_to_utm(lon: f64, lat: f64, zone: u8, north: bool) -> (f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let ep2 = e2 / (1.0 - e2);

    let phi = lat.to_radians();
    let dlambda = (lon - central_meridian(zone)).to_radians();

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = phi.tan().powi(2);
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * dlambda;
    let m = meridian_arc(phi, e2);

    let x = UTM_K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;

    let mut y = UTM_K0
        * (m + n
            * phi.tan()
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    if !north {
        y += UTM_FALSE_NORTHING_SOUTH;
    }
    (x, y)
}

/// Convert UTM easting/northing in meters back to lon/lat degrees.
pub fn utm_to_lon_lat(x: f64, y: f64, zone: u8, north: bool) -> (f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let ep2 = e2 / (1.0 - e2);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let northing = if north { y } else { y - UTM_FALSE_NORTHING_SOUTH };
    let m = northing / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let n1 = WGS84_A / (1.0 - e2 * sin_phi1 * sin_phi1).sqrt();
    let t1 = phi1.tan().powi(2);
    let c1 = ep2 * cos_phi1 * cos_phi1;
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = (x - UTM_FALSE_EASTING) / (n1 * UTM_K0);

    let phi = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);
    let lambda = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
            / 120.0)
        / cos_phi1;

    (central_meridian(zone) + lambda.to_degrees(), phi.to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_selection() {
        // Tokyo
        assert_eq!(
            Frame::utm_zone_for(139.7, 35.68),
            Frame::Utm {
                zone: 54,
                north: true
            }
        );
        // Sydney
        assert_eq!(
            Frame::utm_zone_for(151.2, -33.87),
            Frame::Utm {
                zone: 56,
                north: false
            }
        );
        assert_eq!(Frame::utm_zone_for(180.0, 0.0).epsg(), 32660);
    }

    #[test]
    fn test_central_meridian_maps_to_false_easting() {
        let (x, y) = lon_lat_to_utm(141.0, 0.0, 54, true);
        assert!((x - 500_000.0).abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_utm_roundtrip() {
        let (x, y) = lon_lat_to_utm(139.7671, 35.6812, 54, true);
        let (lon, lat) = utm_to_lon_lat(x, y, 54, true);
        assert!((lon - 139.7671).abs() < 1e-7);
        assert!((lat - 35.6812).abs() < 1e-7);

        let (x, y) = lon_lat_to_utm(-58.38, -34.60, 21, false);
        let (lon, lat) = utm_to_lon_lat(x, y, 21, false);
        assert!((lon + 58.38).abs() < 1e-7);
        assert!((lat + 34.60).abs() < 1e-7);
    }

    #[test]
    fn test_utm_distances_are_metric() {
        // One hundredth of a degree of latitude is roughly 1109 m near 35N.
        let (_, y1) = lon_lat_to_utm(139.7, 35.68, 54, true);
        let (_, y2) = lon_lat_to_utm(139.7, 35.69, 54, true);
        let d = y2 - y1;
        assert!(d > 1105.0 && d < 1113.0, "got {}", d);
    }

    #[test]
    fn test_frame_parsing() {
        assert_eq!("EPSG:4326".parse::<Frame>().unwrap(), Frame::Wgs84);
        assert_eq!(
            "urn:ogc:def:crs:OGC:1.3:CRS84".parse::<Frame>().unwrap(),
            Frame::Wgs84
        );
        assert_eq!(
            "urn:ogc:def:crs:EPSG::32654".parse::<Frame>().unwrap(),
            Frame::Utm {
                zone: 54,
                north: true
            }
        );
        assert_eq!("2451".parse::<Frame>().unwrap(), Frame::Epsg(2451));
        assert!("not-a-frame".parse::<Frame>().is_err());
    }

    #[test]
    fn test_reprojector_rejects_unknown_frames() {
        let r = UtmReprojector;
        assert!(r.is_angular(&Frame::Wgs84));
        assert!(!r.is_angular(&Frame::Epsg(2451)));
        let err = r
            .reproject(Coord { x: 1.0, y: 2.0 }, &Frame::Epsg(2451), &Frame::Wgs84)
            .unwrap_err();
        assert_eq!(err.status(), crate::error::RouteStatus::NoFrame);
    }
}
