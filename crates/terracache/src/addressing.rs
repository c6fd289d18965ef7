//! Deterministic mapping between coordinates, cell coordinates and cell ids.
//!
//! The globe is divided into a virtual grid of `360 × divisions` columns and
//! `180 × divisions` rows. Cell `(0, 0)` has its south-west corner at
//! `(-90°, -180°)`. Cell ids are a row-major index over that grid.

use crate::geo::{degrees_to_meters, round_digits, GeoBounds, COORDINATE_DIGITS};

/// Grid dimensions of a bounded grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    /// Number of samples along the latitude axis (rows).
    pub size_lat: u32,
    /// Number of samples along the longitude axis (columns).
    pub size_lon: u32,
}

/// Number of cell columns around the globe.
pub fn columns(divisions: u16) -> u64 {
    360 * divisions as u64
}

/// Number of cell rows from pole to pole.
pub fn rows(divisions: u16) -> u64 {
    180 * divisions as u64
}

/// Whether a coordinate lies on the globe (`-90..=90`, `-180..=180`).
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Convert a coordinate to cell `(x, y)`.
///
/// The eastern and northern edges (`lon = 180`, `lat = 90`) belong to the
/// last column and row. Coordinates off the globe are clamped to the edge
/// cells; callers reject them with [`is_valid_coordinate`] first.
pub fn to_cell_xy(lat: f64, lon: f64, divisions: u16) -> (u64, u64) {
    let d = divisions as f64;
    let last_x = (columns(divisions) - 1) as f64;
    let last_y = (rows(divisions) - 1) as f64;
    let x = ((lon + 180.0) * d).floor().clamp(0.0, last_x) as u64;
    let y = ((lat + 90.0) * d).floor().clamp(0.0, last_y) as u64;
    (x, y)
}

/// South-west corner `(lat, lon)` of cell `(x, y)`.
pub fn from_cell_xy(x: u64, y: u64, divisions: u16) -> (f64, f64) {
    let d = divisions as f64;
    (y as f64 / d - 90.0, x as f64 / d - 180.0)
}

/// Row-major cell id of cell `(x, y)`.
pub fn to_cell_id(x: u64, y: u64, divisions: u16) -> u64 {
    y * columns(divisions) + x
}

/// Cell `(x, y)` of a cell id.
pub fn from_cell_id(id: u64, divisions: u16) -> (u64, u64) {
    let columns = columns(divisions);
    (id % columns, id / columns)
}

/// Id of the cell covering a coordinate.
pub fn cell_id_for(lat: f64, lon: f64, divisions: u16) -> u64 {
    let (x, y) = to_cell_xy(lat, lon, divisions);
    to_cell_id(x, y, divisions)
}

/// South-west corner of a cell id.
pub fn cell_origin(id: u64, divisions: u16) -> (f64, f64) {
    let (x, y) = from_cell_id(id, divisions);
    from_cell_xy(x, y, divisions)
}

/// Bounds of a cell, with corners rounded to stabilise edge comparisons.
pub fn cell_bounds(id: u64, divisions: u16) -> GeoBounds {
    let (lat0, lon0) = cell_origin(id, divisions);
    let lat0 = round_digits(lat0, COORDINATE_DIGITS);
    let lon0 = round_digits(lon0, COORDINATE_DIGITS);
    let span = 1.0 / divisions as f64;
    GeoBounds {
        lat0,
        lon0,
        lat1: round_digits(lat0 + span, COORDINATE_DIGITS),
        lon1: round_digits(lon0 + span, COORDINATE_DIGITS),
    }
}

/// Ids of every cell intersecting a region, inclusive on all sides.
///
/// Corners may be passed in any order.
pub fn cells_for_region(lat0: f64, lon0: f64, lat1: f64, lon1: f64, divisions: u16) -> Vec<u64> {
    let bounds = GeoBounds::from_corners(lat0, lon0, lat1, lon1);
    let (x0, y0) = to_cell_xy(bounds.lat0, bounds.lon0, divisions);
    let (x1, y1) = to_cell_xy(bounds.lat1, bounds.lon1, divisions);

    let mut ids = Vec::with_capacity(((x1 - x0 + 1) * (y1 - y0 + 1)) as usize);
    for y in y0..=y1 {
        for x in x0..=x1 {
            ids.push(to_cell_id(x, y, divisions));
        }
    }
    ids
}

/// Latitude used for sizing a longitude span: the smaller magnitude of the two edges.
///
/// Longitude degrees are longest there, so the resulting grid is the denser one.
pub fn reference_latitude(lat0: f64, lat1: f64) -> f64 {
    lat0.abs().min(lat1.abs())
}

/// Grid dimensions for a region so that neighbouring samples are at most
/// `precision_m` meters apart.
pub fn calculate_grid_size(d_lat: f64, d_lon: f64, reference_lat: f64, precision_m: f64) -> GridSize {
    let meters_lat = degrees_to_meters(d_lat, 0.0);
    let meters_lon = degrees_to_meters(d_lon, reference_lat);

    let divisions_lat = (meters_lat / precision_m).ceil().max(1.0) as u32;
    let divisions_lon = (meters_lon / precision_m).ceil().max(1.0) as u32;

    GridSize {
        size_lat: divisions_lat.saturating_add(1),
        size_lon: divisions_lon.saturating_add(1),
    }
}

/// Grid dimensions for a bounding box.
pub fn grid_size_for(bounds: &GeoBounds, precision_m: f64) -> GridSize {
    calculate_grid_size(
        bounds.lat_span(),
        bounds.lon_span(),
        reference_latitude(bounds.lat0, bounds.lat1),
        precision_m,
    )
}
