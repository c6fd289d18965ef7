//! Bounded elevation grid with coordinate mapping and interpolation.

use crate::addressing::{grid_size_for, GridSize};
use crate::geo::{interpolate, round_digits, GeoBounds, COORDINATE_DIGITS};
use crate::{Result, TerraError};
use std::io::Write;

/// How to derive an elevation between grid samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Value of the nearest grid sample.
    Nearest,
    /// Bilinear interpolation of the four surrounding samples.
    #[default]
    Linear,
    /// Bicubic interpolation (not implemented).
    Cubic,
}

impl std::str::FromStr for Interpolation {
    type Err = TerraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Interpolation::Nearest),
            "linear" => Ok(Interpolation::Linear),
            "cubic" => Ok(Interpolation::Cubic),
            other => Err(TerraError::InvalidConfig(format!("unknown interpolation '{}'", other))),
        }
    }
}

/// The grid cells a sample reads and how to combine them.
///
/// Computed from the grid geometry alone so callers can route the cell
/// reads through their own accessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stencil {
    /// Read a single cell.
    Nearest {
        /// Column index.
        x: u32,
        /// Row index.
        y: u32,
    },
    /// Bilinear combination of the cells bounding a fractional grid coordinate.
    Linear {
        /// Fractional column coordinate.
        gx: f64,
        /// Fractional row coordinate.
        gy: f64,
        /// `floor(gx)`
        x0: u32,
        /// `ceil(gx)`
        x1: u32,
        /// `floor(gy)`
        y0: u32,
        /// `ceil(gy)`
        y1: u32,
    },
}

impl Stencil {
    /// Evaluate the stencil, reading cells through `read(x, y)`.
    pub fn evaluate<F>(&self, mut read: F) -> Result<f64>
    where
        F: FnMut(u32, u32) -> Result<f64>,
    {
        match *self {
            Stencil::Nearest { x, y } => read(x, y),
            Stencil::Linear { gx, gy, x0, x1, y0, y1 } => {
                let q00 = read(x0, y0)?;
                let q01 = read(x0, y1)?;
                let q10 = read(x1, y0)?;
                let q11 = read(x1, y1)?;

                let r0 = interpolate(gx, x0 as f64, q00, x1 as f64, q10);
                let r1 = interpolate(gx, x0 as f64, q01, x1 as f64, q11);
                Ok(interpolate(gy, y0 as f64, r0, y1 as f64, r1))
            }
        }
    }
}

/// Options for [`ElevationGrid::write_obj`].
#[derive(Debug, Clone, Copy)]
pub struct MeshOptions {
    /// Uniform scale applied to all vertex coordinates.
    pub scale: f64,
    /// Move the horizontal center of the grid to the origin.
    pub center_horizontal: bool,
    /// Move the mid elevation to zero.
    pub center_vertical: bool,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            center_horizontal: true,
            center_vertical: true,
        }
    }
}

/// A rectangular buffer of elevation samples spanning a bounding box.
///
/// Samples sit on both edges: column 0 is at `lon0`, column `size_lon - 1`
/// at `lon1`, and likewise for rows and latitude. Grid indices are always
/// `(x, y)` with `x` the longitude (column) index and `y` the latitude (row)
/// index. Unknown samples are NaN.
#[derive(Debug, Clone)]
pub struct ElevationGrid {
    bounds: GeoBounds,
    size: GridSize,
    /// Row-major samples, `y * size_lon + x`.
    data: Vec<f64>,
}

impl ElevationGrid {
    /// Create a grid whose samples are at most `precision_m` meters apart.
    pub fn with_precision(bounds: GeoBounds, precision_m: f64) -> Self {
        let size = grid_size_for(&bounds, precision_m);
        Self::with_size(bounds, size)
    }

    /// Create a grid with explicit dimensions (each clamped to at least 2).
    pub fn with_size(bounds: GeoBounds, size: GridSize) -> Self {
        let size = GridSize {
            size_lat: size.size_lat.max(2),
            size_lon: size.size_lon.max(2),
        };
        Self {
            bounds,
            size,
            data: vec![f64::NAN; size.size_lat as usize * size.size_lon as usize],
        }
    }

    /// Geographic bounds.
    pub fn bounds(&self) -> GeoBounds {
        self.bounds
    }

    /// Grid dimensions.
    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Number of rows.
    pub fn size_lat(&self) -> u32 {
        self.size.size_lat
    }

    /// Number of columns.
    pub fn size_lon(&self) -> u32 {
        self.size.size_lon
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.size.size_lon as usize + x as usize
    }

    /// Whether `(x, y)` is a valid grid index.
    pub fn in_grid(&self, x: u32, y: u32) -> bool {
        x < self.size.size_lon && y < self.size.size_lat
    }

    pub(crate) fn check_index(&self, x: u32, y: u32) -> Result<()> {
        if self.in_grid(x, y) {
            Ok(())
        } else {
            Err(TerraError::InvalidGridIndex {
                x,
                y,
                size_lon: self.size.size_lon,
                size_lat: self.size.size_lat,
            })
        }
    }

    /// Raw sample at a grid index.
    pub fn at(&self, x: u32, y: u32) -> Result<f64> {
        self.check_index(x, y)?;
        Ok(self.data[self.index(x, y)])
    }

    /// Set the raw sample at a grid index.
    pub fn set(&mut self, x: u32, y: u32, value: f64) -> Result<()> {
        self.check_index(x, y)?;
        let idx = self.index(x, y);
        self.data[idx] = value;
        Ok(())
    }

    /// Fractional grid coordinate `(gx, gy)` of a position.
    pub fn pos_to_grid_float(&self, lat: f64, lon: f64) -> (f64, f64) {
        let b = &self.bounds;
        let gx = interpolate(lon, b.lon0, 0.0, b.lon1, self.size.size_lon as f64 - 1.0);
        let gy = interpolate(lat, b.lat0, 0.0, b.lat1, self.size.size_lat as f64 - 1.0);
        (gx, gy)
    }

    /// Position `(lat, lon)` of a fractional grid coordinate.
    pub fn grid_float_to_pos(&self, gx: f64, gy: f64) -> (f64, f64) {
        let b = &self.bounds;
        let lat = interpolate(gy, 0.0, b.lat0, self.size.size_lat as f64 - 1.0, b.lat1);
        let lon = interpolate(gx, 0.0, b.lon0, self.size.size_lon as f64 - 1.0, b.lon1);
        (lat, lon)
    }

    /// Nearest grid index `(x, y)` of a position, clamped into the grid.
    pub fn pos_to_grid(&self, lat: f64, lon: f64) -> (u32, u32) {
        let (gx, gy) = self.pos_to_grid_float(lat, lon);
        let x = gx.round().clamp(0.0, self.size.size_lon as f64 - 1.0) as u32;
        let y = gy.round().clamp(0.0, self.size.size_lat as f64 - 1.0) as u32;
        (x, y)
    }

    /// Position `(lat, lon)` of a grid index.
    pub fn grid_to_pos(&self, x: u32, y: u32) -> (f64, f64) {
        self.grid_float_to_pos(x as f64, y as f64)
    }

    /// Tolerant containment check.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.bounds.contains(lat, lon)
    }

    /// Compute which cells a lookup at `(lat, lon)` reads.
    ///
    /// The coordinate is rounded to [`COORDINATE_DIGITS`] decimals before the
    /// bounds check so that values drifting across an edge through repeated
    /// arithmetic are still accepted.
    pub fn stencil(&self, lat: f64, lon: f64, mode: Interpolation) -> Result<Stencil> {
        let lat = round_digits(lat, COORDINATE_DIGITS);
        let lon = round_digits(lon, COORDINATE_DIGITS);
        if !self.contains(lat, lon) {
            return Err(TerraError::OutOfBounds {
                lat,
                lon,
                min_lat: self.bounds.lat0,
                max_lat: self.bounds.lat1,
                min_lon: self.bounds.lon0,
                max_lon: self.bounds.lon1,
            });
        }

        let max_x = self.size.size_lon as f64 - 1.0;
        let max_y = self.size.size_lat as f64 - 1.0;
        let (gx, gy) = self.pos_to_grid_float(lat, lon);
        // Tolerated positions can land a hair outside [0, max]
        let gx = gx.clamp(0.0, max_x);
        let gy = gy.clamp(0.0, max_y);

        match mode {
            Interpolation::Nearest => Ok(Stencil::Nearest {
                x: gx.round() as u32,
                y: gy.round() as u32,
            }),
            Interpolation::Linear => Ok(Stencil::Linear {
                gx,
                gy,
                x0: gx.floor() as u32,
                x1: gx.ceil() as u32,
                y0: gy.floor() as u32,
                y1: gy.ceil() as u32,
            }),
            Interpolation::Cubic => Err(TerraError::UnsupportedInterpolation(mode)),
        }
    }

    /// Elevation at a position.
    pub fn get(&self, lat: f64, lon: f64, mode: Interpolation) -> Result<f64> {
        self.stencil(lat, lon, mode)?.evaluate(|x, y| self.at(x, y))
    }

    /// Smallest known elevation, or `None` if no sample is known.
    pub fn min_elevation(&self) -> Option<f64> {
        self.data.iter().copied().filter(|v| !v.is_nan()).reduce(f64::min)
    }

    /// Largest known elevation, or `None` if no sample is known.
    pub fn max_elevation(&self) -> Option<f64> {
        self.data.iter().copied().filter(|v| !v.is_nan()).reduce(f64::max)
    }

    /// Number of known samples.
    pub fn size_filled(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    /// Total number of samples.
    pub fn size_total(&self) -> usize {
        self.data.len()
    }

    /// Approximate heap and inline footprint in bytes.
    pub fn memory(&self) -> usize {
        std::mem::size_of::<Self>() + self.data.capacity() * std::mem::size_of::<f64>()
    }

    /// Write the grid as a Wavefront OBJ mesh.
    ///
    /// Vertices are laid out in meters with `x` east, `y` north and `z` up,
    /// one vertex and one UV per sample, one quad per grid square.
    pub fn write_obj<W: Write>(&self, mut out: W, options: MeshOptions) -> Result<()> {
        let b = &self.bounds;
        let reference = crate::addressing::reference_latitude(b.lat0, b.lat1);
        let meters_lat = crate::geo::degrees_to_meters(b.lat_span(), 0.0);
        let meters_lon = crate::geo::degrees_to_meters(b.lon_span(), reference);
        let cols = self.size.size_lon;
        let rows = self.size.size_lat;
        let cell_width = meters_lon / (cols as f64 - 1.0);
        let cell_height = meters_lat / (rows as f64 - 1.0);

        let (center_x, center_y) = if options.center_horizontal {
            (meters_lon / 2.0, meters_lat / 2.0)
        } else {
            (0.0, 0.0)
        };
        let offset = match (options.center_vertical, self.min_elevation(), self.max_elevation()) {
            (true, Some(min), Some(max)) => -(min + max) / 2.0,
            _ => 0.0,
        };

        writeln!(out, "# terracache {}", env!("CARGO_PKG_VERSION"))?;
        for y in 0..rows {
            for x in 0..cols {
                let z = self.data[self.index(x, y)];
                let z = if z.is_nan() { 0.0 } else { z + offset };
                writeln!(
                    out,
                    "v {} {} {}",
                    options.scale * (x as f64 * cell_width - center_x),
                    options.scale * (y as f64 * cell_height - center_y),
                    options.scale * z
                )?;
            }
        }
        for y in 0..rows {
            for x in 0..cols {
                writeln!(
                    out,
                    "vt {} {}",
                    x as f64 / (cols as f64 - 1.0),
                    y as f64 / (rows as f64 - 1.0)
                )?;
            }
        }
        for y in 0..rows - 1 {
            for x in 0..cols - 1 {
                let i0 = 1 + y * cols + x;
                let i1 = i0 + cols;
                let i2 = i1 + 1;
                let i3 = i0 + 1;
                writeln!(out, "f {i0}/{i0} {i1}/{i1} {i2}/{i2} {i3}/{i3}")?;
            }
        }
        Ok(())
    }
}
