//! The tile registry and its query, precache and miss-resolution operations.

use crate::addressing::{cell_id_for, cells_for_region, is_valid_coordinate};
use crate::config::CacheConfig;
use crate::geo::{format_bytes, GeoBounds, Position, Sample};
use crate::grid::{ElevationGrid, Interpolation};
use crate::orchestrator::RequestOrchestrator;
use crate::storage::TileStorage;
use crate::tile::{CacheTile, GapRecord, MissHandler};
use crate::{Result, TerraError};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Resolves tile misses by fetching the missing cell and its unfilled
/// neighbourhood in one provider request.
pub struct MissResolver<'a> {
    orchestrator: &'a RequestOrchestrator,
    ring_radius: u32,
}

impl<'a> MissResolver<'a> {
    /// Create a resolver searching `ring_radius` rings around each miss.
    pub fn new(orchestrator: &'a RequestOrchestrator, ring_radius: u32) -> Self {
        Self {
            orchestrator,
            ring_radius,
        }
    }
}

impl MissHandler for MissResolver<'_> {
    fn on_gap(&self, tile: &mut CacheTile, gap: GapRecord) -> Result<()> {
        let gaps = tile.report_neighbor_gaps(gap.x, gap.y, self.ring_radius, self.orchestrator.capacity());
        let positions: Vec<Position> = gaps.iter().map(GapRecord::position).collect();

        let response = self.orchestrator.request_raw(&positions)?;
        let written = tile.apply_gap_results(&gaps, &response.samples)?;
        debug!(tile = tile.id(), x = gap.x, y = gap.y, requested = gaps.len(), written, "resolved miss");

        if !response.status.is_ok() {
            let provider = self.orchestrator.provider();
            return Err(TerraError::provider(provider.id(), response.status, response.error));
        }
        Ok(())
    }
}

/// Registry of resident tiles.
///
/// Tiles are created on first touch, hydrated from storage, filled on demand
/// and persisted when unloaded, flushed or dropped. There is no eviction.
///
/// Not internally synchronised; share it as `Arc<parking_lot::Mutex<TileCache>>`.
pub struct TileCache {
    tiles: HashMap<u64, CacheTile>,
    orchestrator: Arc<RequestOrchestrator>,
    storage: Arc<dyn TileStorage>,
    divisions: u16,
    precision_m: f64,
    miss_ring_radius: u32,
}

/// How a tile became resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Residency {
    /// Already resident.
    Resident,
    /// Created and hydrated from storage.
    Hydrated,
    /// Created with nothing persisted for it.
    Blank,
}

/// Fetch a resident tile, creating and hydrating it if needed.
fn resident_tile<'a>(
    tiles: &'a mut HashMap<u64, CacheTile>,
    storage: &dyn TileStorage,
    id: u64,
    divisions: u16,
    precision_m: f64,
) -> Result<(&'a mut CacheTile, Residency)> {
    match tiles.entry(id) {
        Entry::Occupied(entry) => Ok((entry.into_mut(), Residency::Resident)),
        Entry::Vacant(entry) => {
            let mut tile = CacheTile::new(id, divisions, precision_m);
            let hydrated = storage.load(&mut tile)?;
            debug!(tile = id, hydrated, "tile loaded");
            let residency = if hydrated { Residency::Hydrated } else { Residency::Blank };
            Ok((entry.insert(tile), residency))
        }
    }
}

impl TileCache {
    /// Create an empty cache.
    pub fn new(orchestrator: Arc<RequestOrchestrator>, storage: Arc<dyn TileStorage>, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tiles: HashMap::new(),
            orchestrator,
            storage,
            divisions: config.cell_divisions,
            precision_m: config.precision_m,
            miss_ring_radius: config.miss_ring_radius,
        })
    }

    /// Shared request orchestrator.
    pub fn orchestrator(&self) -> &Arc<RequestOrchestrator> {
        &self.orchestrator
    }

    /// Tiles per degree.
    pub fn divisions(&self) -> u16 {
        self.divisions
    }

    /// Maximum sample spacing in meters.
    pub fn precision(&self) -> f64 {
        self.precision_m
    }

    /// Make a tile resident. Returns `true` if it was not resident before.
    pub fn load_tile(&mut self, id: u64) -> Result<bool> {
        let (_, residency) = resident_tile(&mut self.tiles, self.storage.as_ref(), id, self.divisions, self.precision_m)?;
        Ok(residency != Residency::Resident)
    }

    /// Persist and remove a tile. Returns `false` if it was not resident.
    ///
    /// A tile that fails to persist stays resident.
    pub fn unload_tile(&mut self, id: u64) -> Result<bool> {
        let Some(mut tile) = self.tiles.remove(&id) else {
            return Ok(false);
        };
        if let Err(e) = self.storage.store(&mut tile) {
            self.tiles.insert(id, tile);
            return Err(e);
        }
        debug!(tile = id, "tile unloaded");
        Ok(true)
    }

    /// Persist and remove every tile. Returns how many were resident.
    pub fn unload_all(&mut self) -> Result<usize> {
        self.flush()?;
        let count = self.tiles.len();
        self.tiles.clear();
        Ok(count)
    }

    /// Persist every dirty resident tile. Returns how many were written.
    pub fn flush(&mut self) -> Result<usize> {
        let mut written = 0;
        for tile in self.tiles.values_mut() {
            if self.storage.store(tile)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Whether a tile is resident.
    pub fn is_tile_loaded(&self, id: u64) -> bool {
        self.tiles.contains_key(&id)
    }

    /// A resident tile.
    pub fn tile(&self, id: u64) -> Option<&CacheTile> {
        self.tiles.get(&id)
    }

    /// Number of resident tiles.
    pub fn tiles_loaded(&self) -> usize {
        self.tiles.len()
    }

    /// Ids of resident tiles in ascending order.
    pub fn loaded_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.tiles.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Elevation at a coordinate, filling the covering tile on a miss.
    pub fn get_point(&mut self, lat: f64, lon: f64, mode: Interpolation) -> Result<Sample> {
        if !is_valid_coordinate(lat, lon) {
            return Err(TerraError::OutOfBounds {
                lat,
                lon,
                min_lat: -90.0,
                max_lat: 90.0,
                min_lon: -180.0,
                max_lon: 180.0,
            });
        }
        let id = cell_id_for(lat, lon, self.divisions);
        let (tile, _) = resident_tile(&mut self.tiles, self.storage.as_ref(), id, self.divisions, self.precision_m)?;
        let resolver = MissResolver::new(self.orchestrator.as_ref(), self.miss_ring_radius);
        let elevation = tile.get(lat, lon, mode, &resolver)?;
        Ok(Sample::new(lat, lon, elevation))
    }

    /// Elevations at several coordinates, in order.
    pub fn get_points(&mut self, positions: &[Position], mode: Interpolation) -> Result<Vec<Sample>> {
        positions.iter().map(|p| self.get_point(p.lat, p.lon, mode)).collect()
    }

    /// Elevation grid over a region with samples at most `precision_m` apart.
    pub fn get_region(
        &mut self,
        lat0: f64,
        lon0: f64,
        lat1: f64,
        lon1: f64,
        precision_m: f64,
        mode: Interpolation,
    ) -> Result<ElevationGrid> {
        if !(precision_m.is_finite() && precision_m > 0.0) {
            return Err(TerraError::InvalidConfig(format!("region precision must be positive, got {}", precision_m)));
        }
        let mut grid = ElevationGrid::with_precision(GeoBounds::from_corners(lat0, lon0, lat1, lon1), precision_m);
        self.fill_region(&mut grid, mode)?;
        Ok(grid)
    }

    /// Elevation grid over a region with explicit dimensions.
    #[allow(clippy::too_many_arguments)]
    pub fn get_region_sized(
        &mut self,
        lat0: f64,
        lon0: f64,
        lat1: f64,
        lon1: f64,
        size_lat: u32,
        size_lon: u32,
        mode: Interpolation,
    ) -> Result<ElevationGrid> {
        let size = crate::addressing::GridSize { size_lat, size_lon };
        let mut grid = ElevationGrid::with_size(GeoBounds::from_corners(lat0, lon0, lat1, lon1), size);
        self.fill_region(&mut grid, mode)?;
        Ok(grid)
    }

    /// Fill every sample of `grid` from the cache.
    pub fn fill_region(&mut self, grid: &mut ElevationGrid, mode: Interpolation) -> Result<()> {
        let start = Instant::now();
        for y in 0..grid.size_lat() {
            for x in 0..grid.size_lon() {
                let (lat, lon) = grid.grid_to_pos(x, y);
                let sample = self.get_point(lat, lon, mode)?;
                grid.set(x, y, sample.elevation)?;
            }
        }
        debug!(
            samples = grid.size_total(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "region filled"
        );
        Ok(())
    }

    /// Run `fill` on each tile, loading tiles that are not resident and
    /// unloading them again afterwards.
    ///
    /// Tiles that were created blank and are still empty are discarded
    /// instead of persisted.
    fn for_each_tile<F>(&mut self, ids: &[u64], mut fill: F) -> Result<usize>
    where
        F: FnMut(&mut CacheTile, &RequestOrchestrator) -> Result<usize>,
    {
        let mut total = 0;
        for &id in ids {
            let (tile, residency) = resident_tile(&mut self.tiles, self.storage.as_ref(), id, self.divisions, self.precision_m)?;
            let result = fill(&mut *tile, self.orchestrator.as_ref());
            let empty = tile.filled_count() == 0;
            match residency {
                Residency::Resident => {}
                Residency::Blank if empty => {
                    self.tiles.remove(&id);
                }
                _ => {
                    self.unload_tile(id)?;
                }
            }
            total += result?;
        }
        Ok(total)
    }

    /// Fill whole tiles. Returns the number of samples requested.
    pub fn precache_cells(&mut self, ids: &[u64]) -> Result<usize> {
        let requested = self.for_each_tile(ids, |tile, orchestrator| tile.fill_whole(orchestrator))?;
        info!(tiles = ids.len(), requested, "precached cells");
        Ok(requested)
    }

    /// Fill all samples inside a region. Returns the number of samples requested.
    pub fn precache_region(&mut self, lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> Result<usize> {
        let region = GeoBounds::from_corners(lat0, lon0, lat1, lon1);
        let ids = cells_for_region(region.lat0, region.lon0, region.lat1, region.lon1, self.divisions);
        let requested = self.for_each_tile(&ids, |tile, orchestrator| tile.fill_region(orchestrator, &region))?;
        debug!(tiles = ids.len(), requested, "precached region");
        Ok(requested)
    }

    /// Fill all samples within `radius_m` meters of a center. Returns the
    /// number of samples requested.
    pub fn precache_radius(&mut self, lat: f64, lon: f64, radius_m: f64) -> Result<usize> {
        let area = GeoBounds::around(lat, lon, radius_m);
        let ids = cells_for_region(area.lat0, area.lon0, area.lat1, area.lon1, self.divisions);
        let requested = self.for_each_tile(&ids, |tile, orchestrator| tile.fill_radius(orchestrator, lat, lon, radius_m))?;
        debug!(tiles = ids.len(), radius_m, requested, "precached radius");
        Ok(requested)
    }

    /// Unknown samples of resident tiles, by ascending tile id; `limit == 0` means all.
    pub fn report_gaps(&self, limit: usize) -> Vec<GapRecord> {
        let mut gaps = Vec::new();
        for id in self.loaded_ids() {
            let remaining = if limit == 0 { 0 } else { limit - gaps.len() };
            if let Some(tile) = self.tiles.get(&id) {
                gaps.extend(tile.report_gaps(remaining));
            }
            if limit > 0 && gaps.len() >= limit {
                break;
            }
        }
        gaps
    }

    /// Fetch `gaps` in one orchestrated request and write the results into
    /// their tiles. Gaps of tiles that are no longer resident are dropped.
    ///
    /// Returns the number of samples written.
    pub fn process_gaps(&mut self, gaps: &[GapRecord]) -> Result<usize> {
        if gaps.is_empty() {
            return Ok(0);
        }
        let positions: Vec<Position> = gaps.iter().map(GapRecord::position).collect();
        let response = self.orchestrator.request_raw(&positions)?;
        let written = self.apply_gap_results(gaps, &response.samples)?;

        if !response.status.is_ok() {
            let provider = self.orchestrator.provider();
            return Err(TerraError::provider(provider.id(), response.status, response.error));
        }
        Ok(written)
    }

    /// Write provider results for `gaps` into their resident tiles.
    ///
    /// Samples are placed by coordinates, so a response missing the samples
    /// of a failed batch leaves exactly those gaps unfilled.
    pub fn apply_gap_results(&mut self, gaps: &[GapRecord], samples: &[Sample]) -> Result<usize> {
        let mut ids: Vec<u64> = gaps.iter().map(|gap| gap.tile_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut written = 0;
        for id in ids {
            if let Some(tile) = self.tiles.get_mut(&id) {
                written += tile.apply_gap_results(gaps, samples)?;
            }
        }
        debug!(gaps = gaps.len(), written, "applied gap results");
        Ok(written)
    }

    /// Unknown sample positions within `radius_m` meters of a center,
    /// without fetching anything.
    ///
    /// Returns the intersecting tile ids along with the positions; pass both
    /// to [`apply_samples`](Self::apply_samples) once the samples are fetched.
    pub fn radius_candidates(&mut self, lat: f64, lon: f64, radius_m: f64) -> Result<(Vec<u64>, Vec<Position>)> {
        let area = GeoBounds::around(lat, lon, radius_m);
        let ids = cells_for_region(area.lat0, area.lon0, area.lat1, area.lon1, self.divisions);
        let mut candidates = Vec::new();
        self.for_each_tile(&ids, |tile, _| {
            let found = tile.unfilled_in_radius(lat, lon, radius_m);
            let count = found.len();
            candidates.extend(found);
            Ok(count)
        })?;
        Ok((ids, candidates))
    }

    /// Write fetched samples into the tiles `ids` they fall on, loading and
    /// unloading tiles like the precache operations do.
    ///
    /// Returns the number of samples written.
    pub fn apply_samples(&mut self, ids: &[u64], samples: &[Sample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        self.for_each_tile(ids, |tile, _| tile.write_samples(samples))
    }

    /// Drop every resident tile without persisting and purge storage.
    ///
    /// Returns the number of persisted tiles removed.
    pub fn clear(&mut self) -> Result<usize> {
        let dropped = self.tiles.len();
        self.tiles.clear();
        let purged = self.storage.purge()?;
        info!(dropped, purged, "cache cleared");
        Ok(purged)
    }

    /// Forget known samples inside a region. Returns how many were cleared.
    pub fn clear_region(&mut self, lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> Result<usize> {
        let region = GeoBounds::from_corners(lat0, lon0, lat1, lon1);
        let ids = cells_for_region(region.lat0, region.lon0, region.lat1, region.lon1, self.divisions);
        self.for_each_tile(&ids, |tile, _| Ok(tile.clear_region(&region)))
    }

    /// Forget known samples within `radius_m` meters of a center.
    pub fn clear_radius(&mut self, lat: f64, lon: f64, radius_m: f64) -> Result<usize> {
        let area = GeoBounds::around(lat, lon, radius_m);
        let ids = cells_for_region(area.lat0, area.lon0, area.lat1, area.lon1, self.divisions);
        self.for_each_tile(&ids, |tile, _| Ok(tile.clear_radius(lat, lon, radius_m)))
    }

    /// Known samples across resident tiles.
    pub fn size(&self) -> usize {
        self.tiles.values().map(CacheTile::filled_count).sum()
    }

    /// Total samples across resident tiles.
    pub fn size_total(&self) -> usize {
        self.tiles.values().map(|t| t.grid().size_total()).sum()
    }

    /// Approximate footprint of the resident tiles in bytes.
    pub fn memory(&self) -> usize {
        std::mem::size_of::<Self>() + self.tiles.values().map(CacheTile::memory).sum::<usize>()
    }

    /// One-line summary for logs and the command line.
    pub fn summary(&self) -> String {
        format!(
            "{} tiles, {}/{} samples, {}",
            self.tiles_loaded(),
            self.size(),
            self.size_total(),
            format_bytes(self.memory())
        )
    }
}

impl Drop for TileCache {
    fn drop(&mut self) {
        for tile in self.tiles.values_mut() {
            if let Err(e) = self.storage.store(tile) {
                warn!(tile = tile.id(), error = %e, "failed to persist tile on shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use crate::provider::ProviderStatus;
    use crate::storage::MemoryStorage;
    use approx::assert_relative_eq;

    fn plane(lat: f64, lon: f64) -> f64 {
        1000.0 + (lat - 47.08) * 10_000.0 + (lon - 12.67) * 1_000.0
    }

    struct Fixture {
        provider: Arc<MockProvider>,
        storage: Arc<MemoryStorage>,
        cache: TileCache,
    }

    /// Tiles of 4 rows by 3 columns around 47.08 N.
    fn fixture(capacity: usize) -> Fixture {
        let provider = Arc::new(MockProvider::new(capacity, 1000, plane));
        let storage = Arc::new(MemoryStorage::new());
        let config = CacheConfig {
            precision_m: 500.0,
            ..Default::default()
        };
        let orchestrator = Arc::new(RequestOrchestrator::new(provider.clone()));
        let cache = TileCache::new(orchestrator, storage.clone(), &config).unwrap();
        Fixture { provider, storage, cache }
    }

    #[test]
    fn test_miss_fetches_neighbourhood_once() {
        let mut f = fixture(100);

        let sample = f.cache.get_point(47.086476, 12.679198, Interpolation::Linear).unwrap();
        assert_relative_eq!(sample.elevation, plane(47.086476, 12.679198), epsilon = 1e-6);
        // The whole 12-sample tile fits in one neighbourhood batch
        assert_eq!(f.provider.request_count(), 1);
        assert_eq!(f.provider.requested_points(), 12);

        f.cache.get_point(47.081, 12.671, Interpolation::Nearest).unwrap();
        assert_eq!(f.provider.request_count(), 1);
        assert_eq!(f.cache.tiles_loaded(), 1);
        assert_eq!(f.cache.size(), 12);
    }

    #[test]
    fn test_miss_batch_bounded_by_capacity() {
        let mut f = fixture(5);
        f.cache.get_point(47.086476, 12.679198, Interpolation::Nearest).unwrap();
        assert_eq!(f.provider.request_count(), 1);
        assert_eq!(f.provider.requested_points(), 5);
    }

    #[test]
    fn test_cubic_rejected_without_request() {
        let mut f = fixture(100);
        let err = f.cache.get_point(47.085, 12.675, Interpolation::Cubic).unwrap_err();
        assert!(matches!(err, TerraError::UnsupportedInterpolation(_)));
        assert_eq!(f.provider.request_count(), 0);
    }

    #[test]
    fn test_unload_persists_and_reload_hydrates() {
        let mut f = fixture(100);
        f.cache.get_point(47.085, 12.675, Interpolation::Linear).unwrap();
        let id = cell_id_for(47.085, 12.675, 100);

        assert!(f.cache.unload_tile(id).unwrap());
        assert!(!f.cache.unload_tile(id).unwrap());
        assert_eq!(f.storage.stored_samples(id), Some(12));

        assert!(f.cache.load_tile(id).unwrap());
        assert!(!f.cache.load_tile(id).unwrap());
        assert!(!f.cache.tile(id).unwrap().is_dirty());
        f.cache.get_point(47.085, 12.675, Interpolation::Linear).unwrap();
        assert_eq!(f.provider.request_count(), 1);
    }

    #[test]
    fn test_precache_region_restores_residency() {
        let mut f = fixture(100);
        // Spans two tiles of longitude
        let requested = f.cache.precache_region(47.081, 12.675, 47.089, 12.685).unwrap();

        assert!(requested > 0);
        assert_eq!(f.cache.tiles_loaded(), 0);
        assert_eq!(f.storage.len(), 2);
        for batch in f.provider.batches.lock().unwrap().iter() {
            for p in batch {
                assert!(p.lat >= 47.081 - 1e-9 && p.lat <= 47.089 + 1e-9);
                assert!(p.lon >= 12.675 - 1e-9 && p.lon <= 12.685 + 1e-9);
            }
        }
    }

    #[test]
    fn test_precache_keeps_resident_tiles() {
        let mut f = fixture(100);
        let id = cell_id_for(47.085, 12.675, 100);
        f.cache.load_tile(id).unwrap();

        assert_eq!(f.cache.precache_cells(&[id]).unwrap(), 12);
        assert!(f.cache.is_tile_loaded(id));
        assert_eq!(f.cache.tile(id).unwrap().filled_count(), 12);
    }

    #[test]
    fn test_precache_radius() {
        let mut f = fixture(100);
        let id = cell_id_for(47.085, 12.675, 100);
        f.cache.load_tile(id).unwrap();
        let (lat, lon) = f.cache.tile(id).unwrap().grid().grid_to_pos(1, 1);

        assert_eq!(f.cache.precache_radius(lat, lon, 1.0).unwrap(), 1);
        assert_eq!(f.cache.precache_radius(lat, lon, 1.0).unwrap(), 0);
        assert_eq!(f.provider.request_count(), 1);
    }

    #[test]
    fn test_report_and_process_gaps() {
        let mut f = fixture(100);
        f.cache.load_tile(cell_id_for(47.085, 12.675, 100)).unwrap();
        f.cache.load_tile(cell_id_for(47.085, 12.685, 100)).unwrap();

        assert_eq!(f.cache.report_gaps(0).len(), 24);
        let gaps = f.cache.report_gaps(15);
        assert_eq!(gaps.len(), 15);

        assert_eq!(f.cache.process_gaps(&gaps).unwrap(), 15);
        assert_eq!(f.cache.size(), 15);
        assert_eq!(f.cache.report_gaps(0).len(), 9);
        assert_eq!(f.cache.process_gaps(&[]).unwrap(), 0);
    }

    #[test]
    fn test_process_gaps_with_failed_batch_keeps_values_correct() {
        let provider = Arc::new(MockProvider::new(2, 1000, plane).failing_on(0));
        let orchestrator = Arc::new(RequestOrchestrator::new(provider.clone()));
        let config = CacheConfig {
            precision_m: 500.0,
            ..Default::default()
        };
        let mut cache = TileCache::new(orchestrator, Arc::new(MemoryStorage::new()), &config).unwrap();
        let id = cell_id_for(47.085, 12.675, 100);
        cache.load_tile(id).unwrap();

        let gaps = cache.report_gaps(6);
        let err = cache.process_gaps(&gaps).unwrap_err();
        assert!(matches!(err, TerraError::Provider { status: ProviderStatus::ServerError, .. }));
        assert_eq!(provider.request_count(), 3);

        let tile = cache.tile(id).unwrap();
        assert_eq!(tile.filled_count(), 4);
        for gap in &gaps[..2] {
            assert!(!tile.is_filled(gap.x, gap.y));
        }
        for gap in &gaps[2..] {
            assert_relative_eq!(tile.grid().at(gap.x, gap.y).unwrap(), plane(gap.lat, gap.lon), epsilon = 1e-9);
        }

        // The failed gaps are reported again and fill correctly
        let retry = cache.report_gaps(0);
        assert_eq!(retry.len(), 8);
        assert_eq!((retry[0].x, retry[0].y), (gaps[0].x, gaps[0].y));
    }

    #[test]
    fn test_antimeridian_and_pole_queries() {
        let mut f = fixture(100);

        let east = f.cache.get_point(47.085, 180.0, Interpolation::Linear).unwrap();
        assert_relative_eq!(east.elevation, plane(47.085, 180.0), epsilon = 1e-6);
        assert!(f.cache.is_tile_loaded(cell_id_for(47.085, 179.995, 100)));

        let north = f.cache.get_point(90.0, 12.675, Interpolation::Nearest).unwrap();
        assert!(north.elevation.is_finite());
        assert!(f.cache.is_tile_loaded(cell_id_for(89.995, 12.675, 100)));
        assert_eq!(f.cache.tiles_loaded(), 2);
    }

    #[test]
    fn test_off_globe_coordinates_rejected() {
        let mut f = fixture(100);
        for (lat, lon) in [(47.0, 180.5), (47.0, -180.5), (90.5, 0.0), (-91.0, 0.0), (f64::NAN, 0.0)] {
            let err = f.cache.get_point(lat, lon, Interpolation::Linear).unwrap_err();
            assert!(matches!(err, TerraError::OutOfBounds { .. }));
        }
        assert_eq!(f.cache.tiles_loaded(), 0);
        assert_eq!(f.provider.request_count(), 0);
    }

    #[test]
    fn test_radius_candidates_then_apply() {
        let mut f = fixture(100);
        let (ids, candidates) = f.cache.radius_candidates(47.085, 12.675, 300.0).unwrap();
        assert!(!candidates.is_empty());
        assert_eq!(f.cache.tiles_loaded(), 0);
        assert!(f.storage.is_empty());

        let response = f.cache.orchestrator().request_raw(&candidates).unwrap();
        let written = f.cache.apply_samples(&ids, &response.samples).unwrap();
        assert!(written >= candidates.len());
        assert_eq!(f.cache.tiles_loaded(), 0);

        let (_, remaining) = f.cache.radius_candidates(47.085, 12.675, 300.0).unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_clear_and_clear_region() {
        let mut f = fixture(100);
        f.cache.get_point(47.085, 12.675, Interpolation::Linear).unwrap();

        let cleared = f.cache.clear_region(47.079, 12.669, 47.0801, 12.681).unwrap();
        assert_eq!(cleared, 3);
        assert_eq!(f.cache.size(), 9);

        f.cache.flush().unwrap();
        assert_eq!(f.storage.len(), 1);
        assert_eq!(f.cache.clear().unwrap(), 1);
        assert_eq!(f.cache.tiles_loaded(), 0);
        assert!(f.storage.is_empty());
    }

    #[test]
    fn test_get_region() {
        let mut f = fixture(100);
        let grid = f
            .cache
            .get_region_sized(47.081, 12.671, 47.089, 12.679, 3, 3, Interpolation::Linear)
            .unwrap();
        assert_eq!(grid.size_total(), 9);
        let (lat, lon) = grid.grid_to_pos(1, 1);
        assert_relative_eq!(grid.at(1, 1).unwrap(), plane(lat, lon), epsilon = 1e-6);

        let grid = f
            .cache
            .get_region(47.081, 12.671, 47.089, 12.679, 250.0, Interpolation::Nearest)
            .unwrap();
        assert_eq!(grid.size_filled(), grid.size_total());
        assert!(f.cache.get_region(47.0, 12.0, 47.1, 12.1, 0.0, Interpolation::Linear).is_err());
    }

    #[test]
    fn test_drop_persists_dirty_tiles() {
        let f = fixture(100);
        let Fixture { storage, mut cache, .. } = f;
        cache.get_point(47.085, 12.675, Interpolation::Linear).unwrap();
        drop(cache);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_diagnostics() {
        let mut f = fixture(100);
        assert_eq!(f.cache.size_total(), 0);
        f.cache.get_point(47.085, 12.675, Interpolation::Linear).unwrap();
        assert_eq!(f.cache.size_total(), 12);
        assert!(f.cache.memory() > 12 * std::mem::size_of::<f64>());
        assert!(f.cache.summary().starts_with("1 tiles, 12/12 samples"));
    }
}
