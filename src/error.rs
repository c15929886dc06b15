use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure kinds raised by the centerline strategies.
///
/// Every variant maps onto exactly one [`RouteStatus`] so a batch driver can
/// report it without inspecting messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CenterlineError {
    #[error("input geometry carries no coordinate frame")]
    NoFrame,

    #[error("no line geometry survived normalization")]
    NoGeometry,

    #[error("clustering did not produce two tracks (A: {len_a_m:.1} m, B: {len_b_m:.1} m)")]
    WeakCluster { len_a_m: f64, len_b_m: f64 },

    #[error("midline synthesis failed: {0}")]
    MidlineSynthesis(String),

    #[error("station #{index} ({name}) has no track graph node within the search radius")]
    UnreachableStation { index: usize, name: String },

    #[error("none of the {legs} station-to-station legs could be routed")]
    RouteFragmented { legs: usize },

    #[error("no component available to choose from")]
    ChooseFailed,

    #[error("reprojection failed: {0}")]
    Reprojection(String),
}

impl CenterlineError {
    pub fn status(&self) -> RouteStatus {
        match self {
            CenterlineError::NoFrame | CenterlineError::Reprojection(_) => RouteStatus::NoFrame,
            CenterlineError::NoGeometry | CenterlineError::ChooseFailed => RouteStatus::NoGeometry,
            CenterlineError::WeakCluster { .. } => RouteStatus::WeakCluster,
            CenterlineError::MidlineSynthesis(_) => RouteStatus::MidlineFailed,
            CenterlineError::UnreachableStation { .. } => RouteStatus::UnreachableStation,
            CenterlineError::RouteFragmented { .. } => RouteStatus::RouteFragmented,
        }
    }
}

/// Closed set of per-route status codes handed to the reporting side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteStatus {
    Ok,
    NoGeometry,
    NoFrame,
    WeakCluster,
    MidlineFailed,
    RouteFragmented,
    UnreachableStation,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::Ok => "OK",
            RouteStatus::NoGeometry => "NO_GEOMETRY",
            RouteStatus::NoFrame => "NO_FRAME",
            RouteStatus::WeakCluster => "WEAK_CLUSTER",
            RouteStatus::MidlineFailed => "MIDLINE_FAILED",
            RouteStatus::RouteFragmented => "ROUTE_FRAGMENTED",
            RouteStatus::UnreachableStation => "UNREACHABLE_STATION",
        }
    }
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
