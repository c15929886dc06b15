use centerline::RouteOutcome;
use serde::Serialize;
use std::path::Path;

/// One line of `_summary.csv`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryRow {
    pub route: String,
    pub status: String,
    pub strategy: Option<String>,
    pub metric_frame: Option<String>,
    pub segments: Option<usize>,
    pub len_a_m: Option<f64>,
    pub len_b_m: Option<f64>,
    pub centerline_length_m: Option<f64>,
    pub stations_total: Option<usize>,
    pub stations_hit: Option<usize>,
    pub hit_ratio: Option<f64>,
    pub gaps: Option<usize>,
    pub message: String,
}

fn round2(v: Option<f64>) -> Option<f64> {
    v.map(|v| (v * 100.0).round() / 100.0)
}

impl SummaryRow {
    pub fn from_outcome(outcome: &RouteOutcome) -> Self {
        let d = &outcome.diagnostics;
        Self {
            route: outcome.route.clone(),
            status: outcome.status.to_string(),
            strategy: outcome.strategy.map(|s| s.to_string()),
            metric_frame: d.metric_frame.map(|f| f.to_string()),
            segments: Some(d.segments),
            len_a_m: round2(d.len_a_m),
            len_b_m: round2(d.len_b_m),
            centerline_length_m: round2(d.centerline_length_m),
            stations_total: Some(d.stations_total),
            stations_hit: d.stations_hit,
            hit_ratio: d.hit_ratio.map(|r| (r * 1000.0).round() / 1000.0),
            gaps: d.gaps,
            message: if outcome.is_ok() {
                String::new()
            } else {
                outcome.message().unwrap_or_default().to_string()
            },
        }
    }

    /// Row for a route whose inputs could not be read or written.
    pub fn error(route: &str, err: &anyhow::Error) -> Self {
        Self {
            route: route.to_string(),
            status: "ERROR".to_string(),
            message: format!("ERROR: {:#}", err),
            ..Self::default()
        }
    }
}

pub fn write_summary(path: &Path, rows: &[SummaryRow]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
