//! # terracache
//!
//! Disk-backed, tile-partitioned elevation cache filled on demand from
//! remote elevation APIs.
//!
//! ## Overview
//!
//! The globe is split into square cells of `1 / divisions` degrees. Each
//! resident cell is a [`CacheTile`]: a grid of samples at most
//! `precision_m` meters apart plus a mask of which samples are known.
//!
//! A query resolves the covering tile, loads it from storage if needed and
//! reads the grid. Reading an unknown sample triggers the miss pipeline: the
//! unknown neighbourhood of the sample (nearest rings first, up to one
//! provider batch) is fetched in a single request and written back.
//!
//! All provider traffic goes through one [`RequestOrchestrator`], which
//! paces requests to the provider's per-second limit and splits oversized
//! batches.
//!
//! Supported providers:
//! - OpenTopoData datasets (`otd_<dataset>`, 100 locations per request)
//! - GPXZ (`gpxz`, 50 locations per request, API key required)
//!
//! ## Examples
//!
//! ### Querying points and regions
//!
//! ```no_run
//! use std::sync::Arc;
//! use terracache::{
//!     CacheConfig, Interpolation, JsonFileStorage, OpenTopoDataProvider, RequestOrchestrator, TileCache,
//! };
//!
//! let provider = Arc::new(OpenTopoDataProvider::new("eudem25m")?);
//! let config = CacheConfig::default();
//! let storage = Arc::new(JsonFileStorage::new(&config.cache_dir, "otd_eudem25m", config.cell_divisions, config.precision_m));
//! let orchestrator = Arc::new(RequestOrchestrator::new(provider));
//! let mut cache = TileCache::new(orchestrator, storage, &config)?;
//!
//! let sample = cache.get_point(47.086476, 12.679198, Interpolation::Linear)?;
//! println!("Elevation: {} meters", sample.elevation);
//!
//! let grid = cache.get_region(47.08, 12.67, 47.09, 12.68, 50.0, Interpolation::Linear)?;
//! println!("Highest point: {:?}", grid.max_elevation());
//! # Ok::<(), terracache::TerraError>(())
//! ```
//!
//! ### Background prefetching
//!
//! ```no_run
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use terracache::{PrefetchMode, PrefetchScheduler, SchedulerConfig, TileCache};
//!
//! # fn demo(cache: TileCache) -> terracache::Result<()> {
//! let cache = Arc::new(Mutex::new(cache));
//! let mut scheduler = PrefetchScheduler::new(cache.clone(), &SchedulerConfig::default());
//!
//! let target = scheduler.create_target(47.086476, 12.679198);
//! scheduler.set_target(target.clone());
//! scheduler.set_mode(PrefetchMode::SingleTarget);
//! scheduler.start()?;
//!
//! // The caller keeps moving the target as it travels
//! target.lock().move_to(47.09, 12.70, 1.0);
//!
//! scheduler.stop()?;
//! # Ok(())
//! # }
//! ```

mod addressing;
mod cache;
mod config;
mod error;
mod geo;
mod grid;
mod orchestrator;
mod provider;
mod scheduler;
mod storage;
mod tile;

pub use addressing::{
    calculate_grid_size, cell_bounds, cell_id_for, cell_origin, cells_for_region, from_cell_id, from_cell_xy,
    is_valid_coordinate, reference_latitude, to_cell_id, to_cell_xy, GridSize,
};
pub use cache::{MissResolver, TileCache};
pub use config::{
    CacheConfig, OrchestratorConfig, ProviderSelection, SchedulerConfig, TerraConfig, DEFAULT_CELL_DIVISIONS,
    DEFAULT_MISS_RING_RADIUS, DEFAULT_PRECISION_M,
};
pub use error::TerraError;
pub use geo::{
    degrees_to_meters, format_bytes, interpolate, meters_to_degrees, GeoBounds, Position, Sample, METERS_PER_DEGREE,
};
pub use grid::{ElevationGrid, Interpolation, MeshOptions, Stencil};
pub use orchestrator::{default_user_agent, RateState, RequestOrchestrator};
pub use provider::{
    build_locations_query, ElevationProvider, GpxzProvider, HttpClient, OpenTopoDataProvider, ProviderConfig,
    ProviderResponse, ProviderStatus, ReqwestClient,
};
pub use scheduler::{PrefetchMode, PrefetchScheduler, PrefetchTarget, SchedulerState, SchedulerStats, TargetHandle};
pub use storage::{JsonFileStorage, MemoryStorage, TileStorage};
pub use tile::{CacheTile, GapRecord, MissHandler};

/// Result type for elevation cache operations.
pub type Result<T> = std::result::Result<T, TerraError>;
