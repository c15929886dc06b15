use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which derivation strategy a route runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Strategy {
    /// Cluster-and-bisect first, then the station router, then component selection.
    #[default]
    Auto,
    ClusterMidline,
    StationPath,
    StationScore,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Auto => "auto",
            Strategy::ClusterMidline => "cluster_midline",
            Strategy::StationPath => "station_path",
            Strategy::StationScore => "station_score",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for geometry normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Atomic segments shorter than this are digitizing noise (meters)
    pub min_segment_len_m: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            min_segment_len_m: 12.0,
        }
    }
}

/// Configuration for the two-track clusterer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Parallel seed partner must be at least this far away (meters)
    pub seed_min_distance_m: f64,
    /// Parallel seed partner must be at most this far away (meters)
    pub seed_max_distance_m: f64,
    /// Maximum orientation difference for a parallel seed partner (degrees)
    pub seed_max_angle_deg: f64,
    /// How many of the longest segments are tried as seeds
    pub seed_candidates: usize,
    /// Fixed number of assign/merge rounds before the final assignment
    pub iterations: usize,
    /// Endpoint snap tolerance used when merging a cluster into a curve (meters)
    pub snap_tolerance_m: f64,
    /// Each merged side must reach this length (meters)
    pub min_cluster_length_m: f64,
    pub min_segments: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seed_min_distance_m: 5.0,
            seed_max_distance_m: 120.0,
            seed_max_angle_deg: 45.0,
            seed_candidates: 300,
            iterations: 5,
            snap_tolerance_m: 3.0,
            min_cluster_length_m: 500.0,
            min_segments: 2,
        }
    }
}

/// Configuration for midline sampling between two corridors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MidlineConfig {
    /// Evenly spaced samples along curve A
    pub samples: usize,
    /// Consecutive midpoints closer than this are dropped (meters)
    pub dedupe_m: f64,
    /// A/B parts further apart than this are never paired (meters)
    pub max_pair_distance_m: f64,
    /// Parts shorter than this are ignored during part pairing (meters)
    pub min_part_length_m: f64,
    pub min_part_samples: usize,
    /// Synthesized midlines shorter than this are rejected (meters)
    pub min_length_m: f64,
}

impl Default for MidlineConfig {
    fn default() -> Self {
        Self {
            samples: 500,
            dedupe_m: 0.5,
            max_pair_distance_m: 600.0,
            min_part_length_m: 300.0,
            min_part_samples: 200,
            min_length_m: 200.0,
        }
    }
}

/// Configuration for the station-path router
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Grid cell size used to quantize graph nodes (meters)
    pub node_grid_m: f64,
    /// Endpoint snap tolerance applied before the graph is built (meters)
    pub snap_tolerance_m: f64,
    /// Station anchoring gives up after this many rings of grid cells
    pub search_radius_cells: i64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            node_grid_m: 3.0,
            snap_tolerance_m: 5.0,
            search_radius_cells: 50,
        }
    }
}

/// Configuration for station-scored component selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub snap_tolerance_m: f64,
    /// A station within this distance of a component counts as covered (meters)
    pub station_hit_m: f64,
    /// Stop adding components once this share of stations is covered
    pub target_ratio: f64,
    pub max_components: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            snap_tolerance_m: 5.0,
            station_hit_m: 60.0,
            target_ratio: 0.92,
            max_components: 3,
        }
    }
}

/// Post-processing applied to every derived curve
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Douglas-Peucker tolerance (meters, 0 disables)
    pub simplify_m: f64,
    /// Chaikin corner-cutting passes (0 disables)
    pub smoothing_iterations: usize,
    /// Vertices closer than this to their predecessor are dropped after smoothing (meters)
    pub min_vertex_spacing_m: f64,
    /// Also emit the A/B corridor geometry of the cluster strategy
    pub write_corridors: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            simplify_m: 6.0,
            smoothing_iterations: 0,
            min_vertex_spacing_m: 0.2,
            write_corridors: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub strategy: Strategy,
    pub normalize: NormalizeConfig,
    pub cluster: ClusterConfig,
    pub midline: MidlineConfig,
    pub router: RouterConfig,
    pub selector: SelectorConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Load a (possibly partial) configuration from a RON file.
    pub fn from_ron_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    pub fn from_ron_str(text: &str) -> anyhow::Result<Self> {
        let config: PipelineConfig = ron::from_str(text)?;
        Ok(config)
    }
}
