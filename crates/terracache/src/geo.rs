//! Small geodesic and floating point helpers shared by the grid code.

/// Length of one degree of latitude (and of longitude at the equator) in meters.
///
/// One nautical mile per arc minute.
pub const METERS_PER_DEGREE: f64 = 60.0 * 1852.0;

/// Number of decimal digits coordinates are rounded to before grid lookups.
pub const COORDINATE_DIGITS: u32 = 9;

/// A geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Latitude in decimal degrees (positive = north).
    pub lat: f64,
    /// Longitude in decimal degrees (positive = east).
    pub lon: f64,
}

impl Position {
    /// Create a new position.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A resolved elevation sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Elevation in meters.
    pub elevation: f64,
}

impl Sample {
    /// Create a new sample.
    pub fn new(lat: f64, lon: f64, elevation: f64) -> Self {
        Self { lat, lon, elevation }
    }

    /// The sample's position.
    pub fn position(&self) -> Position {
        Position::new(self.lat, self.lon)
    }
}

/// Geographic bounds of a grid, tile or query region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    /// Southern edge.
    pub lat0: f64,
    /// Western edge.
    pub lon0: f64,
    /// Northern edge.
    pub lat1: f64,
    /// Eastern edge.
    pub lon1: f64,
}

impl GeoBounds {
    /// Create bounds from two corners in any order.
    pub fn from_corners(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> Self {
        Self {
            lat0: lat_a.min(lat_b),
            lon0: lon_a.min(lon_b),
            lat1: lat_a.max(lat_b),
            lon1: lon_a.max(lon_b),
        }
    }

    /// Bounding box of an ellipse of `radius_m` meters around a center.
    pub fn around(lat: f64, lon: f64, radius_m: f64) -> Self {
        let radius_lat = meters_to_degrees(radius_m, 0.0);
        let radius_lon = meters_to_degrees(radius_m, lat);
        Self::from_corners(lat - radius_lat, lon - radius_lon, lat + radius_lat, lon + radius_lon)
    }

    /// Tolerant containment check (see [`check_bounds`]).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        check_bounds(lat, lon, self.lat0, self.lat1, self.lon0, self.lon1)
    }

    /// Latitude span in degrees.
    pub fn lat_span(&self) -> f64 {
        self.lat1 - self.lat0
    }

    /// Longitude span in degrees.
    pub fn lon_span(&self) -> f64 {
        self.lon1 - self.lon0
    }
}

/// Convert an arc along a parallel from degrees to meters.
pub fn degrees_to_meters(degrees: f64, latitude: f64) -> f64 {
    METERS_PER_DEGREE * degrees.abs() * latitude.to_radians().cos()
}

/// Convert an arc along a parallel from meters to degrees.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    meters / (METERS_PER_DEGREE * latitude.to_radians().cos())
}

/// Linear interpolation of `x` between `(x0, y0)` and `(x1, y1)`.
///
/// Returns `y0` when the two abscissae coincide.
pub fn interpolate(x: f64, x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    if x0 == x1 {
        return y0;
    }
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

/// Round a value to a number of decimal digits.
pub fn round_digits(value: f64, digits: u32) -> f64 {
    let multiplier = 10f64.powi(digits as i32);
    (value * multiplier).round() / multiplier
}

/// Whether `(x, y)` lies inside the axis-aligned ellipse centered on `(cx, cy)`.
pub fn in_ellipse(x: f64, y: f64, cx: f64, cy: f64, rx: f64, ry: f64) -> bool {
    if rx <= 0.0 || ry <= 0.0 {
        return false;
    }
    (x - cx).powi(2) * ry.powi(2) + (y - cy).powi(2) * rx.powi(2) <= rx.powi(2) * ry.powi(2)
}

fn tolerance(a: f64, b: f64) -> f64 {
    f64::EPSILON * a.abs().max(b.abs())
}

/// `a > b` beyond the relative tolerance.
pub fn check_greater(a: f64, b: f64) -> bool {
    (a - b) > tolerance(a, b)
}

/// `a < b` beyond the relative tolerance.
pub fn check_less(a: f64, b: f64) -> bool {
    (b - a) > tolerance(a, b)
}

/// `lower <= value <= upper`, accepting values within the relative tolerance of either edge.
pub fn check_range(value: f64, lower: f64, upper: f64) -> bool {
    !check_less(value, lower) && !check_greater(value, upper)
}

/// Tolerant two-axis range check.
pub fn check_bounds(lat: f64, lon: f64, lat0: f64, lat1: f64, lon0: f64, lon1: f64) -> bool {
    check_range(lat, lat0, lat1) && check_range(lon, lon0, lon1)
}

/// Format a byte count with a binary unit suffix, e.g. `1.50 MB`.
pub fn format_bytes(bytes: usize) -> String {
    const SUFFIX: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SUFFIX.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, SUFFIX[unit])
}
