//! A single cache tile: one addressing cell with a filled mask over its grid.

use crate::addressing::{cell_bounds, from_cell_id};
use crate::geo::{in_ellipse, meters_to_degrees, GeoBounds, Position, Sample};
use crate::grid::{ElevationGrid, Interpolation};
use crate::orchestrator::RequestOrchestrator;
use crate::{Result, TerraError};
use std::collections::HashSet;
use tracing::{debug, trace};

/// A cell of a tile that has no known elevation yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapRecord {
    /// Tile the gap belongs to.
    pub tile_id: u64,
    /// Longitude (column) index.
    pub x: u32,
    /// Latitude (row) index.
    pub y: u32,
    /// Latitude of the cell.
    pub lat: f64,
    /// Longitude of the cell.
    pub lon: f64,
}

impl GapRecord {
    /// Position of the gap.
    pub fn position(&self) -> Position {
        Position::new(self.lat, self.lon)
    }
}

/// Resolves a read of an unfilled cell.
///
/// Called synchronously from [`CacheTile::read`] with the tile that missed.
/// After it returns the tile re-checks the cell; a cell that is still
/// unfilled fails the read with [`TerraError::Unresolved`].
pub trait MissHandler {
    /// Fill `gap` (and whatever else is worth fetching) into `tile`.
    fn on_gap(&self, tile: &mut CacheTile, gap: GapRecord) -> Result<()>;
}

/// Elevation grid of one addressing cell plus a mask of known samples.
#[derive(Debug, Clone)]
pub struct CacheTile {
    id: u64,
    x: u64,
    y: u64,
    divisions: u16,
    grid: ElevationGrid,
    filled: Vec<bool>,
    dirty: bool,
}

impl CacheTile {
    /// Create an empty tile for a cell id. New tiles are dirty.
    pub fn new(id: u64, divisions: u16, precision_m: f64) -> Self {
        let (x, y) = from_cell_id(id, divisions);
        let grid = ElevationGrid::with_precision(cell_bounds(id, divisions), precision_m);
        let filled = vec![false; grid.size_total()];
        Self {
            id,
            x,
            y,
            divisions,
            grid,
            filled,
            dirty: true,
        }
    }

    /// Cell id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cell column.
    pub fn x(&self) -> u64 {
        self.x
    }

    /// Cell row.
    pub fn y(&self) -> u64 {
        self.y
    }

    /// Divisions per degree this tile was addressed with.
    pub fn divisions(&self) -> u16 {
        self.divisions
    }

    /// Underlying grid. Unfilled samples are NaN.
    pub fn grid(&self) -> &ElevationGrid {
        &self.grid
    }

    /// Geographic bounds.
    pub fn bounds(&self) -> GeoBounds {
        self.grid.bounds()
    }

    /// Whether the tile changed since it was last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the tile as persisted.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.grid.size_lon() as usize + x as usize
    }

    /// Whether the sample at `(x, y)` is known. Out-of-range indices are not.
    pub fn is_filled(&self, x: u32, y: u32) -> bool {
        self.grid.in_grid(x, y) && self.filled[self.index(x, y)]
    }

    /// Number of known samples.
    pub fn filled_count(&self) -> usize {
        self.filled.iter().filter(|f| **f).count()
    }

    /// Known samples as `(x, y, elevation)`, row-major.
    pub fn filled_cells(&self) -> impl Iterator<Item = (u32, u32, f64)> + '_ {
        let size_lon = self.grid.size_lon();
        self.filled.iter().enumerate().filter(|(_, f)| **f).filter_map(move |(i, _)| {
            let x = i as u32 % size_lon;
            let y = i as u32 / size_lon;
            self.grid.at(x, y).ok().map(|e| (x, y, e))
        })
    }

    /// Approximate footprint in bytes.
    pub fn memory(&self) -> usize {
        self.grid.memory() + self.filled.capacity() * std::mem::size_of::<bool>()
    }

    fn gap_record(&self, x: u32, y: u32) -> GapRecord {
        let (lat, lon) = self.grid.grid_to_pos(x, y);
        GapRecord {
            tile_id: self.id,
            x,
            y,
            lat,
            lon,
        }
    }

    /// Read a sample, resolving it through `handler` if it is unknown.
    pub fn read(&mut self, x: u32, y: u32, handler: &dyn MissHandler) -> Result<f64> {
        self.grid.check_index(x, y)?;
        if !self.is_filled(x, y) {
            let gap = self.gap_record(x, y);
            trace!(tile = self.id, x, y, "cache miss");
            handler.on_gap(self, gap)?;
            if !self.is_filled(x, y) {
                return Err(TerraError::Unresolved { tile_id: self.id, x, y });
            }
        }
        self.grid.at(x, y)
    }

    /// Store a sample and mark it known.
    pub fn write(&mut self, x: u32, y: u32, value: f64) -> Result<()> {
        self.grid.set(x, y, value)?;
        let idx = self.index(x, y);
        self.filled[idx] = true;
        self.dirty = true;
        Ok(())
    }

    /// Forget a sample. Returns whether it was known.
    pub fn clear_cell(&mut self, x: u32, y: u32) -> Result<bool> {
        self.grid.set(x, y, f64::NAN)?;
        let idx = self.index(x, y);
        let was_filled = std::mem::replace(&mut self.filled[idx], false);
        self.dirty = true;
        Ok(was_filled)
    }

    /// Elevation at a position, reading samples through `handler`.
    pub fn get(&mut self, lat: f64, lon: f64, mode: Interpolation, handler: &dyn MissHandler) -> Result<f64> {
        let stencil = self.grid.stencil(lat, lon, mode)?;
        stencil.evaluate(|x, y| self.read(x, y, handler))
    }

    /// Unknown samples in row-major order; `limit == 0` means all.
    pub fn report_gaps(&self, limit: usize) -> Vec<GapRecord> {
        let mut gaps = Vec::new();
        for y in 0..self.grid.size_lat() {
            for x in 0..self.grid.size_lon() {
                if !self.is_filled(x, y) {
                    gaps.push(self.gap_record(x, y));
                    if limit > 0 && gaps.len() >= limit {
                        return gaps;
                    }
                }
            }
        }
        gaps
    }

    /// Unknown samples around an origin, nearest ring first.
    ///
    /// Ring `r` is the border of the square of Chebyshev radius `r`; ring 0
    /// is the origin itself. Cells outside the tile are skipped. Stops once
    /// `limit` gaps are collected (`0` means no limit).
    pub fn report_neighbor_gaps(&self, origin_x: u32, origin_y: u32, max_ring: u32, limit: usize) -> Vec<GapRecord> {
        let mut gaps = Vec::new();
        let mut seen = HashSet::new();
        let size_lon = self.grid.size_lon() as i64;
        let size_lat = self.grid.size_lat() as i64;
        let (ox, oy) = (origin_x as i64, origin_y as i64);
        // Beyond this every ring lies entirely outside the tile
        let reach = (ox.max(size_lon - 1 - ox)).max(oy.max(size_lat - 1 - oy)).max(0) as u32;

        for ring in 0..=max_ring.min(reach) {
            let r = ring as i64;
            let mut border = Vec::with_capacity((8 * r).max(1) as usize);
            for dx in -r..=r {
                border.push((ox + dx, oy - r));
                border.push((ox + dx, oy + r));
            }
            for dy in (-r + 1)..r {
                border.push((ox - r, oy + dy));
                border.push((ox + r, oy + dy));
            }

            for (x, y) in border {
                if x < 0 || y < 0 || x >= size_lon || y >= size_lat {
                    continue;
                }
                let (x, y) = (x as u32, y as u32);
                if !seen.insert((x, y)) || self.is_filled(x, y) {
                    continue;
                }
                gaps.push(self.gap_record(x, y));
                if limit > 0 && gaps.len() >= limit {
                    return gaps;
                }
            }
        }
        gaps
    }

    /// Grid index of a sample inside this tile.
    fn locate(&self, sample: &Sample) -> Option<(u32, u32)> {
        if !self.grid.contains(sample.lat, sample.lon) {
            trace!(tile = self.id, lat = sample.lat, lon = sample.lon, "sample outside tile");
            return None;
        }
        Some(self.grid.pos_to_grid(sample.lat, sample.lon))
    }

    /// Write provider results for `gaps`.
    ///
    /// Each sample is placed by its own coordinates, so samples missing from
    /// a partially failed response leave their gaps unfilled. Samples that
    /// land on a cell not listed in `gaps` for this tile, or on one already
    /// written by an earlier sample, are ignored. Returns the number of cells
    /// written.
    pub fn apply_gap_results(&mut self, gaps: &[GapRecord], samples: &[Sample]) -> Result<usize> {
        let mut requested: HashSet<(u32, u32)> = gaps
            .iter()
            .filter(|gap| gap.tile_id == self.id)
            .map(|gap| (gap.x, gap.y))
            .collect();
        if requested.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for sample in samples {
            match self.locate(sample) {
                Some((x, y)) if requested.remove(&(x, y)) => {
                    self.write(x, y, sample.elevation)?;
                    written += 1;
                }
                _ => {}
            }
        }
        Ok(written)
    }

    /// Write samples into the unknown cells they fall on.
    ///
    /// Samples outside the tile or on known cells are skipped. Returns the
    /// number of samples written.
    pub fn write_samples(&mut self, samples: &[Sample]) -> Result<usize> {
        let mut written = 0;
        for sample in samples {
            if let Some((x, y)) = self.locate(sample) {
                if !self.is_filled(x, y) {
                    self.write(x, y, sample.elevation)?;
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    /// Unknown sample positions matching `predicate(lat, lon)`.
    fn unfilled_matching<P>(&self, predicate: P) -> Vec<Position>
    where
        P: Fn(f64, f64) -> bool,
    {
        let mut positions = Vec::new();
        for y in 0..self.grid.size_lat() {
            for x in 0..self.grid.size_lon() {
                if self.is_filled(x, y) {
                    continue;
                }
                let (lat, lon) = self.grid.grid_to_pos(x, y);
                if predicate(lat, lon) {
                    positions.push(Position::new(lat, lon));
                }
            }
        }
        positions
    }

    fn fill_matching<P>(&mut self, orchestrator: &RequestOrchestrator, predicate: P) -> Result<usize>
    where
        P: Fn(f64, f64) -> bool,
    {
        let candidates = self.unfilled_matching(predicate);
        if candidates.is_empty() {
            return Ok(0);
        }

        let response = orchestrator.request_raw(&candidates)?;
        let written = self.write_samples(&response.samples)?;
        debug!(tile = self.id, requested = candidates.len(), written, "tile fill");

        if !response.status.is_ok() {
            let provider = orchestrator.provider();
            return Err(TerraError::provider(provider.id(), response.status, response.error));
        }
        Ok(candidates.len())
    }

    /// Fill every unknown sample. Returns the number of samples requested.
    pub fn fill_whole(&mut self, orchestrator: &RequestOrchestrator) -> Result<usize> {
        self.fill_matching(orchestrator, |_, _| true)
    }

    /// Fill unknown samples inside `region`.
    pub fn fill_region(&mut self, orchestrator: &RequestOrchestrator, region: &GeoBounds) -> Result<usize> {
        self.fill_matching(orchestrator, |lat, lon| region.contains(lat, lon))
    }

    /// Fill unknown samples within `radius_m` meters of a center.
    pub fn fill_radius(&mut self, orchestrator: &RequestOrchestrator, lat: f64, lon: f64, radius_m: f64) -> Result<usize> {
        let (rx, ry) = radius_degrees(lat, radius_m);
        self.fill_matching(orchestrator, |plat, plon| in_ellipse(plon, plat, lon, lat, rx, ry))
    }

    /// Unknown sample positions within `radius_m` meters of a center.
    pub fn unfilled_in_radius(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<Position> {
        let (rx, ry) = radius_degrees(lat, radius_m);
        self.unfilled_matching(|plat, plon| in_ellipse(plon, plat, lon, lat, rx, ry))
    }

    fn clear_matching<P>(&mut self, predicate: P) -> usize
    where
        P: Fn(f64, f64) -> bool,
    {
        let mut cleared = 0;
        for y in 0..self.grid.size_lat() {
            for x in 0..self.grid.size_lon() {
                if !self.is_filled(x, y) {
                    continue;
                }
                let (lat, lon) = self.grid.grid_to_pos(x, y);
                if predicate(lat, lon) && self.clear_cell(x, y).unwrap_or(false) {
                    cleared += 1;
                }
            }
        }
        cleared
    }

    /// Forget known samples inside `region`. Returns how many were cleared.
    pub fn clear_region(&mut self, region: &GeoBounds) -> usize {
        self.clear_matching(|lat, lon| region.contains(lat, lon))
    }

    /// Forget known samples within `radius_m` meters of a center.
    pub fn clear_radius(&mut self, lat: f64, lon: f64, radius_m: f64) -> usize {
        let (rx, ry) = radius_degrees(lat, radius_m);
        self.clear_matching(|plat, plon| in_ellipse(plon, plat, lon, lat, rx, ry))
    }
}

/// Longitude and latitude radii in degrees of a metric radius around `lat`.
fn radius_degrees(lat: f64, radius_m: f64) -> (f64, f64) {
    (meters_to_degrees(radius_m, lat), meters_to_degrees(radius_m, 0.0))
}
