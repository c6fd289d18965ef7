//! Example: Query elevation through the tile cache.
//!
//! Usage: cargo run --example query_elevation -- <lat> <lon> [dataset] [cache_dir]

use std::env;
use std::sync::Arc;
use std::time::Instant;
use terracache::{CacheConfig, Interpolation, JsonFileStorage, OpenTopoDataProvider, RequestOrchestrator, TileCache};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <lat> <lon> [dataset] [cache_dir]", args[0]);
        eprintln!("Example: {} 47.086476 12.679198 eudem25m ./elevation-cache", args[0]);
        std::process::exit(1);
    }

    let lat: f64 = args[1].parse().expect("Invalid latitude");
    let lon: f64 = args[2].parse().expect("Invalid longitude");
    let dataset = args.get(3).map(|s| s.as_str()).unwrap_or("eudem25m");
    let mut config = CacheConfig::default();
    if let Some(dir) = args.get(4) {
        config.cache_dir = dir.into();
    }

    let provider = Arc::new(OpenTopoDataProvider::new(dataset).expect("Failed to create HTTP client"));
    let storage = Arc::new(JsonFileStorage::new(
        &config.cache_dir,
        &format!("otd_{}", dataset),
        config.cell_divisions,
        config.precision_m,
    ));
    let orchestrator = Arc::new(RequestOrchestrator::new(provider));
    let mut cache = TileCache::new(orchestrator.clone(), storage, &config).expect("Invalid cache configuration");

    println!("Querying elevation at ({}, {})...", lat, lon);
    let query_start = Instant::now();

    match cache.get_point(lat, lon, Interpolation::Linear) {
        Ok(sample) => {
            println!(
                "Elevation: {:.2} meters ({} requests, {:.2}s)",
                sample.elevation,
                orchestrator.total_requests(),
                query_start.elapsed().as_secs_f64()
            );
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    // Second query should be served from the tile
    let query_start = Instant::now();
    if let Ok(nearest) = cache.get_point(lat, lon, Interpolation::Nearest) {
        println!(
            "Elevation (nearest): {:.2} meters (cached: {:.6}s)",
            nearest.elevation,
            query_start.elapsed().as_secs_f64()
        );
    }

    println!("Cache: {}", cache.summary());
}
