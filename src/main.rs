use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use geo::Rect;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use rayon::prelude::*;

use routegen::osm_extract::{extract_pbf, parse_bbox};
use routegen::sample::{load_samples, route_geojson, write_records};
use routegen::{ErrorCategory, MapExtract, RouteBuilderConfig, RouteOutcome, build_route};

#[derive(Parser)]
#[command(name = "routegen")]
#[command(about = "Reconstructs the route ahead of a vehicle from OSM road data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a link extract from an OSM PBF file
    Extract {
        /// Input OSM PBF file
        #[arg(short, long)]
        input: PathBuf,

        /// Output extract (.json for JSON, anything else for binary)
        #[arg(short, long)]
        output: PathBuf,

        /// Limit to min_lon,min_lat,max_lon,max_lat
        #[arg(long, value_parser = parse_bbox)]
        bbox: Option<Rect<f64>>,
    },

    /// Build the best matching route for every sample
    Route {
        /// Link extract produced by `extract`
        #[arg(short, long)]
        map: PathBuf,

        /// JSON array of samples
        #[arg(short, long)]
        samples: PathBuf,

        /// Output JSON file for the route records
        #[arg(short, long)]
        output: PathBuf,

        /// JSON file overriding builder settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for per-sample GeoJSON debug files
        #[arg(long)]
        geojson_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Extract {
            input,
            output,
            bbox,
        } => {
            let extract = extract_pbf(&input, bbox)?;
            extract.save(&output)?;
        }
        Commands::Route {
            map,
            samples,
            output,
            config,
            geojson_dir,
        } => run_routes(&map, &samples, &output, config.as_deref(), geojson_dir.as_deref())?,
    }
    Ok(())
}

fn run_routes(
    map: &Path,
    samples: &Path,
    output: &Path,
    config: Option<&Path>,
    geojson_dir: Option<&Path>,
) -> Result<()> {
    let config = match config {
        Some(path) => RouteBuilderConfig::load(path)?,
        None => RouteBuilderConfig::default(),
    };
    debug!("Using {:?}", config);

    let extract = MapExtract::load(map)?;
    let samples = load_samples(samples)?;
    info!("Building routes for {} samples over {} links", samples.len(), extract.len());

    if let Some(dir) = geojson_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create GeoJSON directory {:?}", dir))?;
    }

    let pb = ProgressBar::new(samples.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) - Building routes")?
            .progress_chars("##-"),
    );

    let rejected = AtomicUsize::new(0);
    let incomplete_maps = AtomicUsize::new(0);
    let integrity_failures = AtomicUsize::new(0);

    let records: Vec<_> = samples
        .par_iter()
        .filter_map(|sample| {
            let result = build_route(sample, &extract, &config);
            pb.inc(1);
            match result {
                Ok(outcome) => {
                    if !outcome.report.unresolved_links.is_empty() {
                        incomplete_maps.fetch_add(1, Ordering::Relaxed);
                    }
                    if let Some(dir) = geojson_dir {
                        let path = dir.join(format!("{}.geojson", sample.sample_id));
                        if let Err(e) = write_geojson(&path, &outcome) {
                            warn!("Failed to write {:?}: {}", path, e);
                        }
                    }
                    Some(outcome.record)
                }
                Err(e) => {
                    if e.category() == ErrorCategory::Integrity {
                        integrity_failures.fetch_add(1, Ordering::Relaxed);
                        error!("Sample {} failed: {}", sample.sample_id, e);
                    } else {
                        rejected.fetch_add(1, Ordering::Relaxed);
                        debug!("Sample {} skipped: {}", sample.sample_id, e);
                    }
                    None
                }
            }
        })
        .collect();

    pb.finish_with_message("Done");

    write_records(output, &records)?;
    info!(
        "Wrote {} routes to {:?} ({} rejected, {} built on incomplete map data)",
        records.len(),
        output,
        rejected.load(Ordering::Relaxed),
        incomplete_maps.load(Ordering::Relaxed)
    );

    let failures = integrity_failures.load(Ordering::Relaxed);
    if failures > 0 {
        bail!("{} samples failed route graph integrity checks", failures);
    }
    Ok(())
}

fn write_geojson(path: &Path, outcome: &RouteOutcome) -> Result<()> {
    let geojson = route_geojson(
        &outcome.best_route,
        &outcome.candidates,
        &outcome.ground_truth,
    );
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), &geojson)?;
    Ok(())
}
