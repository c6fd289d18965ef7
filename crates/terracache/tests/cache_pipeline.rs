//! End-to-end tests of the query, miss and precache pipeline against an
//! in-process provider.

use approx::assert_relative_eq;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use terracache::{
    cell_id_for, CacheConfig, ElevationProvider, GeoBounds, Interpolation, JsonFileStorage, MemoryStorage, Position,
    ProviderConfig, ProviderResponse, RequestOrchestrator, Result, Sample, TileCache,
};

/// Provider answering from a tilted plane and recording every request.
struct PlaneProvider {
    config: ProviderConfig,
    requests: AtomicUsize,
    points: Mutex<Vec<Position>>,
}

impl PlaneProvider {
    fn new(locations_per_request: usize) -> Self {
        Self {
            config: ProviderConfig {
                id: "plane".to_string(),
                name: "Plane".to_string(),
                base_url: String::new(),
                locations_per_request,
                requests_per_second: 1000,
                requests_per_day: 100_000,
                separator: "|".to_string(),
            },
            requests: AtomicUsize::new(0),
            points: Mutex::new(Vec::new()),
        }
    }

    fn elevation(lat: f64, lon: f64) -> f64 {
        1000.0 + 5000.0 * (lat - 47.0) + 2000.0 * (lon - 12.0)
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl ElevationProvider for PlaneProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn request(&self, positions: &[Position], _user_agent: &str) -> Result<ProviderResponse> {
        assert!(positions.len() <= self.config.locations_per_request);
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.points.lock().extend_from_slice(positions);
        Ok(ProviderResponse::ok(
            positions
                .iter()
                .map(|p| Sample::new(p.lat, p.lon, Self::elevation(p.lat, p.lon)))
                .collect(),
        ))
    }
}

fn cache_with(provider: Arc<PlaneProvider>, storage: Arc<dyn terracache::TileStorage>) -> TileCache {
    let orchestrator = Arc::new(RequestOrchestrator::new(provider));
    TileCache::new(orchestrator, storage, &CacheConfig::default()).unwrap()
}

#[test]
fn test_point_query_single_request() {
    let provider = Arc::new(PlaneProvider::new(100));
    let mut cache = cache_with(provider.clone(), Arc::new(MemoryStorage::new()));

    let sample = cache.get_point(47.086476, 12.679198, Interpolation::Linear).unwrap();
    assert_relative_eq!(sample.elevation, PlaneProvider::elevation(47.086476, 12.679198), epsilon = 1e-6);
    assert_eq!(provider.requests(), 1);
    assert_eq!(provider.points.lock().len(), 100);

    let id = cell_id_for(47.086476, 12.679198, 100);
    assert!(cache.is_tile_loaded(id));
    let tile = cache.tile(id).unwrap();
    assert_eq!(tile.grid().size_lat(), 113);
    assert_eq!(tile.filled_count(), 100);

    // The neighbourhood of the first miss already covers the second query
    cache.get_point(47.086476, 12.679198, Interpolation::Nearest).unwrap();
    assert_eq!(provider.requests(), 1);
}

#[test]
fn test_precache_region_leaves_no_resident_tiles() {
    let provider = Arc::new(PlaneProvider::new(100));
    let storage = Arc::new(MemoryStorage::new());
    let mut cache = cache_with(provider.clone(), storage.clone());

    let region = GeoBounds::from_corners(47.0855, 12.6785, 47.0875, 12.6815);
    let requested = cache
        .precache_region(region.lat0, region.lon0, region.lat1, region.lon1)
        .unwrap();

    assert!(requested > 0);
    assert_eq!(provider.points.lock().len(), requested);
    assert_eq!(cache.tiles_loaded(), 0);
    // Spans the 12.68 tile boundary
    assert_eq!(storage.len(), 2);
    for p in provider.points.lock().iter() {
        assert!(p.lat >= region.lat0 - 1e-9 && p.lat <= region.lat1 + 1e-9);
        assert!(p.lon >= region.lon0 - 1e-9 && p.lon <= region.lon1 + 1e-9);
    }

    // Everything inside the region is now answered from storage
    let before = provider.requests();
    let sample = cache.get_point(47.0865, 12.6795, Interpolation::Linear).unwrap();
    assert_relative_eq!(sample.elevation, PlaneProvider::elevation(47.0865, 12.6795), epsilon = 1e-6);
    assert_eq!(provider.requests(), before);
}

#[test]
fn test_tiles_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::default();
    let storage = || {
        Arc::new(JsonFileStorage::new(
            dir.path(),
            "plane",
            config.cell_divisions,
            config.precision_m,
        ))
    };

    let first = Arc::new(PlaneProvider::new(100));
    {
        let mut cache = cache_with(first.clone(), storage());
        cache.get_point(47.086476, 12.679198, Interpolation::Linear).unwrap();
        // Dropping persists dirty tiles
    }
    assert_eq!(first.requests(), 1);

    let second = Arc::new(PlaneProvider::new(100));
    let mut cache = cache_with(second.clone(), storage());
    let sample = cache.get_point(47.086476, 12.679198, Interpolation::Linear).unwrap();
    assert_relative_eq!(sample.elevation, PlaneProvider::elevation(47.086476, 12.679198), epsilon = 1e-6);
    assert_eq!(second.requests(), 0);

    assert_eq!(cache.clear().unwrap(), 1);
    cache.get_point(47.086476, 12.679198, Interpolation::Linear).unwrap();
    assert_eq!(second.requests(), 1);
}

#[test]
fn test_concurrent_queries_fill_once() {
    let provider = Arc::new(PlaneProvider::new(100));
    let cache = Arc::new(Mutex::new(cache_with(provider.clone(), Arc::new(MemoryStorage::new()))));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || cache.lock().get_point(47.0865, 12.6795, Interpolation::Linear).unwrap())
        })
        .collect();

    let expected = PlaneProvider::elevation(47.0865, 12.6795);
    for handle in handles {
        assert_relative_eq!(handle.join().unwrap().elevation, expected, epsilon = 1e-6);
    }
    assert_eq!(provider.requests(), 1);
    assert_eq!(cache.lock().tiles_loaded(), 1);
}

#[test]
fn test_region_grid() {
    let provider = Arc::new(PlaneProvider::new(100));
    let mut cache = cache_with(provider, Arc::new(MemoryStorage::new()));

    let grid = cache
        .get_region_sized(47.0862, 12.6788, 47.0866, 12.6794, 3, 4, Interpolation::Linear)
        .unwrap();
    assert_eq!(grid.size_filled(), 12);
    let (lat, lon) = grid.grid_to_pos(3, 2);
    assert_relative_eq!(grid.at(3, 2).unwrap(), PlaneProvider::elevation(lat, lon), epsilon = 1e-6);
}
