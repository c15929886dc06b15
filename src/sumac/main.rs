mod summary;

use anyhow::{Context, Result};
use centerline::io::{find_station_file, glob_to_regex, read_route_lines, read_stations, write_curve};
use centerline::{CenterlineEngine, PipelineConfig, RouteInput, RouteOutcome, Strategy};
use clap::Parser;
use geojson::JsonObject;
use log::{error, info};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use summary::{SummaryRow, write_summary};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of route line GeoJSON files
    #[arg(long, env = "SUMAC_LINES_DIR")]
    lines_dir: PathBuf,

    /// Directory of `<route>_stations.geojson` files
    #[arg(long, env = "SUMAC_STATIONS_DIR")]
    stations_dir: Option<PathBuf>,

    /// Where centerlines and `_summary.csv` are written
    #[arg(long, env = "SUMAC_OUT_DIR")]
    out_dir: PathBuf,

    /// File name pattern for route line files (`*` and `?` wildcards)
    #[arg(long, default_value = "*.geojson")]
    pattern: String,

    /// RON file with a (partial) pipeline configuration
    #[arg(long, env = "SUMAC_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the strategy of the configuration
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// Station property holding the route sequence
    #[arg(long)]
    order_field: Option<String>,
}

fn route_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn discover_routes(lines_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = glob_to_regex(pattern)?;
    let mut files: Vec<PathBuf> = std::fs::read_dir(lines_dir)
        .with_context(|| format!("reading {}", lines_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| matcher.is_match(n) && !n.ends_with("_stations.geojson"))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn load_route(path: &Path, args: &Args) -> Result<RouteInput> {
    let name = route_stem(path);
    let lines = read_route_lines(path)?;
    let stations = match args
        .stations_dir
        .as_deref()
        .and_then(|dir| find_station_file(dir, &name))
    {
        Some(station_path) => Some(read_stations(&station_path, args.order_field.as_deref())?),
        None => None,
    };
    Ok(RouteInput {
        name,
        lines,
        stations,
    })
}

fn write_outputs(outcome: &RouteOutcome, out_dir: &Path) -> Result<()> {
    let (Some(centerline), Some(frame)) = (&outcome.centerline, outcome.source_frame) else {
        return Ok(());
    };

    let mut properties = JsonObject::new();
    properties.insert("route".to_string(), outcome.route.clone().into());
    if let Some(strategy) = outcome.strategy {
        properties.insert("strategy".to_string(), strategy.as_str().into());
    }
    if let Some(length) = outcome.diagnostics.centerline_length_m {
        properties.insert("length_m".to_string(), length.into());
    }
    write_curve(
        &out_dir.join(format!("{}_centerline.geojson", outcome.route)),
        centerline,
        frame,
        properties,
    )?;

    if let Some((a, b)) = &outcome.corridors {
        for (label, corridor) in [("A", a), ("B", b)] {
            let mut properties = JsonObject::new();
            properties.insert("route".to_string(), outcome.route.clone().into());
            properties.insert("corridor".to_string(), label.into());
            write_curve(
                &out_dir.join(format!("{}_{}_oneline.geojson", outcome.route, label)),
                corridor,
                frame,
                properties,
            )?;
        }
    }
    Ok(())
}

fn run_route(path: &Path, args: &Args, engine: &CenterlineEngine) -> SummaryRow {
    let name = route_stem(path);
    let result = load_route(path, args).and_then(|input| {
        let outcome = engine.process(&input);
        write_outputs(&outcome, &args.out_dir)?;
        Ok(outcome)
    });
    match result {
        Ok(outcome) => SummaryRow::from_outcome(&outcome),
        Err(err) => {
            error!("{}: {:#}", name, err);
            SummaryRow::error(&name, &err)
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_ron_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }

    let routes = discover_routes(&args.lines_dir, &args.pattern)?;
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    info!(
        "{} route file(s) in {}, strategy {}",
        routes.len(),
        args.lines_dir.display(),
        config.strategy
    );

    let start = Instant::now();
    let engine = CenterlineEngine::new(config);
    let rows: Vec<SummaryRow> = routes
        .par_iter()
        .map(|path| run_route(path, &args, &engine))
        .collect();

    let ok = rows.iter().filter(|r| r.status == "OK").count();
    let summary_path = args.out_dir.join("_summary.csv");
    write_summary(&summary_path, &rows)?;

    println!(
        "{} of {} route(s) OK in {:.1?}; summary at {}",
        ok,
        rows.len(),
        start.elapsed(),
        summary_path.display()
    );
    Ok(())
}
