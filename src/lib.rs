// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_unit_value,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::deprecated_clippy_cfg_attr,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

//! Rail corridor centerline derivation.
//!
//! Messy multi-track line geometry goes in; one clean centerline per route comes
//! out, through one of three strategies: cluster the two tracks and bisect them,
//! thread a path through a quantized track graph in station order, or pick the
//! network components that cover the most stations.

pub mod cluster;
pub mod config;
pub mod error;
pub mod geometry_utils;
pub mod io;
pub mod mainline;
pub mod midline;
pub mod normalize;
pub mod pipeline;
pub mod projection;
pub mod stations;
pub mod track_graph;

#[cfg(test)]
mod scenario_test;

pub use config::{PipelineConfig, Strategy};
pub use error::{CenterlineError, RouteStatus};
pub use pipeline::{CenterlineEngine, RouteInput, RouteOutcome};
