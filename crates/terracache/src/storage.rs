//! Tile persistence.
//!
//! [`JsonFileStorage`] writes one sparse JSON document per tile:
//!
//! ```json
//! {"cache": {"id": 493507267, "x": 19267, "y": 13708, "sizeLat": 113, "sizeLon": 78,
//!            "data": [{"x": 0, "y": 0, "elevation": 1432.5}]}}
//! ```
//!
//! Only known samples are stored.

use crate::tile::CacheTile;
use crate::{Result, TerraError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extension of persisted tiles.
pub const TILE_EXTENSION: &str = "edc";

/// Backend that hydrates and persists tiles.
pub trait TileStorage: Send + Sync {
    /// Fill `tile` from persisted data. Returns `false` if nothing is stored for it.
    ///
    /// A successfully loaded tile is clean.
    fn load(&self, tile: &mut CacheTile) -> Result<bool>;

    /// Persist `tile` if it is dirty and mark it clean. Returns whether anything was written.
    fn store(&self, tile: &mut CacheTile) -> Result<bool>;

    /// Delete everything this backend persisted. Returns the number of tiles removed.
    fn purge(&self) -> Result<usize>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TileDocument {
    cache: TileRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TileRecord {
    id: u64,
    x: u64,
    y: u64,
    size_lat: u32,
    size_lon: u32,
    #[serde(default)]
    data: Vec<CellRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CellRecord {
    x: u32,
    y: u32,
    elevation: f64,
}

impl TileRecord {
    fn from_tile(tile: &CacheTile) -> Self {
        Self {
            id: tile.id(),
            x: tile.x(),
            y: tile.y(),
            size_lat: tile.grid().size_lat(),
            size_lon: tile.grid().size_lon(),
            data: tile
                .filled_cells()
                .map(|(x, y, elevation)| CellRecord { x, y, elevation })
                .collect(),
        }
    }

    fn check_matches(&self, tile: &CacheTile) -> Result<()> {
        let mismatch = |reason: String| TerraError::PersistenceSchema {
            tile_id: tile.id(),
            reason,
        };
        if self.id != tile.id() {
            return Err(mismatch(format!("id {} != {}", self.id, tile.id())));
        }
        if (self.x, self.y) != (tile.x(), tile.y()) {
            return Err(mismatch(format!(
                "cell ({}, {}) != ({}, {})",
                self.x,
                self.y,
                tile.x(),
                tile.y()
            )));
        }
        let size = tile.grid().size();
        if (self.size_lat, self.size_lon) != (size.size_lat, size.size_lon) {
            return Err(mismatch(format!(
                "size {}x{} != {}x{}",
                self.size_lon, self.size_lat, size.size_lon, size.size_lat
            )));
        }
        Ok(())
    }

    fn apply_to(&self, tile: &mut CacheTile) -> Result<()> {
        self.check_matches(tile)?;
        for cell in &self.data {
            tile.write(cell.x, cell.y, cell.elevation)?;
        }
        tile.mark_clean();
        Ok(())
    }
}

/// Stores tiles as JSON files under
/// `<root>/<provider id>/<divisions:04>/<precision bits as hex>/<id>.edc`.
///
/// The directory layout keeps caches of different providers and grid
/// geometries apart.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    /// Create a storage rooted at `root` for one provider and grid geometry.
    pub fn new(root: impl AsRef<Path>, provider_id: &str, divisions: u16, precision_m: f64) -> Self {
        let dir = root
            .as_ref()
            .join(provider_id)
            .join(format!("{:04}", divisions))
            .join(format!("{:016x}", precision_m.to_bits()));
        Self { dir }
    }

    /// Directory holding the tile files.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// File path of a tile.
    pub fn tile_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{:02}.{}", id, TILE_EXTENSION))
    }
}

impl TileStorage for JsonFileStorage {
    fn load(&self, tile: &mut CacheTile) -> Result<bool> {
        let path = self.tile_path(tile.id());
        if !path.exists() {
            return Ok(false);
        }

        let document: TileDocument = serde_json::from_reader(BufReader::new(File::open(&path)?))?;
        document.cache.apply_to(tile)?;
        debug!(tile = tile.id(), samples = document.cache.data.len(), path = %path.display(), "loaded tile");
        Ok(true)
    }

    fn store(&self, tile: &mut CacheTile) -> Result<bool> {
        if !tile.is_dirty() {
            return Ok(false);
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.tile_path(tile.id());
        let tmp = path.with_extension(format!("{}.tmp", TILE_EXTENSION));
        let document = TileDocument {
            cache: TileRecord::from_tile(tile),
        };

        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, &document)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &path)?;

        tile.mark_clean();
        debug!(tile = tile.id(), samples = document.cache.data.len(), path = %path.display(), "stored tile");
        Ok(true)
    }

    fn purge(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == TILE_EXTENSION) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        info!(removed, dir = %self.dir.display(), "purged tile cache");
        Ok(removed)
    }
}

/// Keeps persisted tiles in memory. Useful for tests and throwaway caches.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tiles: Mutex<HashMap<u64, TileRecord>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tiles.
    pub fn len(&self) -> usize {
        self.tiles.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.tiles.lock().is_empty()
    }

    /// Whether a tile is stored.
    pub fn contains(&self, id: u64) -> bool {
        self.tiles.lock().contains_key(&id)
    }

    /// Number of known samples stored for a tile.
    pub fn stored_samples(&self, id: u64) -> Option<usize> {
        self.tiles.lock().get(&id).map(|r| r.data.len())
    }
}

impl TileStorage for MemoryStorage {
    fn load(&self, tile: &mut CacheTile) -> Result<bool> {
        let record = match self.tiles.lock().get(&tile.id()) {
            Some(record) => record.clone(),
            None => return Ok(false),
        };
        record.apply_to(tile)?;
        Ok(true)
    }

    fn store(&self, tile: &mut CacheTile) -> Result<bool> {
        if !tile.is_dirty() {
            return Ok(false);
        }
        self.tiles.lock().insert(tile.id(), TileRecord::from_tile(tile));
        tile.mark_clean();
        Ok(true)
    }

    fn purge(&self) -> Result<usize> {
        let mut tiles = self.tiles.lock();
        let removed = tiles.len();
        tiles.clear();
        Ok(removed)
    }
}
