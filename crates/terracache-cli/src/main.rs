//! `terracache` command-line front end.
//!
//! Examples:
//!
//! ```text
//! terracache point 47.086476 12.679198
//! terracache --dataset srtm30m region 47.08 12.67 47.09 12.68 --spacing 50 --obj peak.obj
//! terracache precache-radius 47.086476 12.679198 2000
//! terracache --config terracache.yaml prefetch 47.086476 12.679198 --seconds 120
//! ```
//!
//! Log verbosity is controlled through `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use terracache::{
    format_bytes, Interpolation, JsonFileStorage, MeshOptions, PrefetchMode, PrefetchScheduler, PrefetchTarget,
    ProviderSelection, RequestOrchestrator, Result, TerraConfig, TileCache,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "terracache", version, about = "Query and prefetch elevation data through a local tile cache")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding persisted tiles
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Tiles per degree
    #[arg(long, global = true)]
    divisions: Option<u16>,

    /// Maximum sample spacing inside tiles, in meters
    #[arg(long, global = true)]
    precision: Option<f64>,

    /// Use this OpenTopoData dataset
    #[arg(long, global = true, conflicts_with = "gpxz_key")]
    dataset: Option<String>,

    /// Use GPXZ with this API key
    #[arg(long, global = true)]
    gpxz_key: Option<String>,

    /// Interpolation between samples: nearest, linear or cubic
    #[arg(short, long, global = true, default_value = "linear")]
    interpolation: Interpolation,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Elevation of a single coordinate
    #[command(allow_negative_numbers = true)]
    Point { lat: f64, lon: f64 },

    /// Elevation grid over a region
    #[command(allow_negative_numbers = true)]
    Region {
        lat0: f64,
        lon0: f64,
        lat1: f64,
        lon1: f64,
        /// Sample spacing of the output grid, in meters
        #[arg(long, default_value_t = 30.0)]
        spacing: f64,
        /// Write the grid as a Wavefront OBJ mesh
        #[arg(long)]
        obj: Option<PathBuf>,
    },

    /// Fill every tile sample inside a region
    #[command(allow_negative_numbers = true)]
    PrecacheRegion { lat0: f64, lon0: f64, lat1: f64, lon1: f64 },

    /// Fill every tile sample within a radius (meters) of a coordinate
    #[command(allow_negative_numbers = true)]
    PrecacheRadius { lat: f64, lon: f64, radius: f64 },

    /// Prefetch in growing circles around a coordinate
    #[command(allow_negative_numbers = true)]
    Prefetch {
        lat: f64,
        lon: f64,
        /// How long to run
        #[arg(long, default_value_t = 60)]
        seconds: u64,
        /// Stop growing at this radius, in meters
        #[arg(long)]
        max_radius: Option<f64>,
    },

    /// Delete all persisted tiles of the selected provider and geometry
    Clear,
}

fn load_config(cli: &Cli) -> Result<TerraConfig> {
    let mut config = match &cli.config {
        Some(path) => TerraConfig::from_file(path)?,
        None => TerraConfig::default(),
    };

    if let Some(dir) = &cli.cache_dir {
        config.cache.cache_dir = dir.clone();
    }
    if let Some(divisions) = cli.divisions {
        config.cache.cell_divisions = divisions;
    }
    if let Some(precision) = cli.precision {
        config.cache.precision_m = precision;
    }
    if let Some(dataset) = &cli.dataset {
        config.provider = ProviderSelection::OpenTopoData {
            dataset: dataset.clone(),
            base_url: None,
        };
    }
    if let Some(key) = &cli.gpxz_key {
        config.provider = ProviderSelection::Gpxz {
            api_key: key.clone(),
            base_url: None,
        };
    }

    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let provider = config.provider.build()?;
    let provider_id = provider.id().to_string();
    info!(
        provider = %provider_id,
        divisions = config.cache.cell_divisions,
        precision_m = config.cache.precision_m,
        cache_dir = %config.cache.cache_dir.display(),
        "opening elevation cache"
    );

    let storage = Arc::new(JsonFileStorage::new(
        &config.cache.cache_dir,
        &provider_id,
        config.cache.cell_divisions,
        config.cache.precision_m,
    ));
    let orchestrator = Arc::new(RequestOrchestrator::with_config(provider, &config.orchestrator));
    let mut cache = TileCache::new(orchestrator.clone(), storage, &config.cache)?;
    let mode = cli.interpolation;
    let start = Instant::now();

    match cli.command {
        Command::Point { lat, lon } => {
            let sample = cache.get_point(lat, lon, mode)?;
            println!("{:.6} {:.6} {:.2}", sample.lat, sample.lon, sample.elevation);
        }
        Command::Region {
            lat0,
            lon0,
            lat1,
            lon1,
            spacing,
            obj,
        } => {
            let grid = cache.get_region(lat0, lon0, lat1, lon1, spacing, mode)?;
            let size = grid.size();
            println!(
                "{}x{} samples, elevation {:.2} to {:.2} m",
                size.size_lon,
                size.size_lat,
                grid.min_elevation().unwrap_or(f64::NAN),
                grid.max_elevation().unwrap_or(f64::NAN)
            );
            if let Some(path) = obj {
                grid.write_obj(BufWriter::new(File::create(&path)?), MeshOptions::default())?;
                println!("Mesh written to {}", path.display());
            }
        }
        Command::PrecacheRegion { lat0, lon0, lat1, lon1 } => {
            let requested = cache.precache_region(lat0, lon0, lat1, lon1)?;
            println!("Requested {} samples", requested);
        }
        Command::PrecacheRadius { lat, lon, radius } => {
            let requested = cache.precache_radius(lat, lon, radius)?;
            println!("Requested {} samples", requested);
        }
        Command::Prefetch {
            lat,
            lon,
            seconds,
            max_radius,
        } => {
            let cache = Arc::new(Mutex::new(cache));
            let mut scheduler = PrefetchScheduler::new(cache.clone(), &config.scheduler);
            let target = PrefetchTarget::with_radius(
                lat,
                lon,
                config.scheduler.initial_radius_m,
                max_radius.unwrap_or(config.scheduler.max_radius_m),
            )
            .into_handle();
            scheduler.set_target(target.clone());
            scheduler.set_mode(PrefetchMode::SingleTarget);

            scheduler.start()?;
            std::thread::sleep(Duration::from_secs(seconds));
            scheduler.stop()?;

            let stats = scheduler.stats();
            println!(
                "{} rounds, {} samples requested, {} errors, radius {:.0} m",
                stats.rounds,
                stats.points_requested,
                stats.errors,
                target.lock().radius
            );
            cache.lock().unload_all()?;
            info!(requests = orchestrator.total_requests(), elapsed_s = start.elapsed().as_secs_f64(), "done");
            return Ok(());
        }
        Command::Clear => {
            let removed = cache.clear()?;
            println!("Removed {} tiles", removed);
        }
    }

    cache.unload_all()?;
    info!(
        requests = orchestrator.total_requests(),
        memory = %format_bytes(cache.memory()),
        elapsed_s = start.elapsed().as_secs_f64(),
        "done"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
