//! Error types for the elevation cache.

use crate::provider::ProviderStatus;
use thiserror::Error;

/// Errors that can occur when querying or filling the elevation cache.
#[derive(Debug, Error)]
pub enum TerraError {
    /// I/O error reading or writing a persisted tile.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP transport error talking to a provider.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Coordinate is outside the bounds of a grid.
    #[error("Coordinate ({lat}, {lon}) is outside grid bounds ({min_lat}-{max_lat}, {min_lon}-{max_lon})")]
    OutOfBounds {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
        /// Grid minimum latitude.
        min_lat: f64,
        /// Grid maximum latitude.
        max_lat: f64,
        /// Grid minimum longitude.
        min_lon: f64,
        /// Grid maximum longitude.
        max_lon: f64,
    },

    /// Grid index outside of the grid dimensions.
    #[error("Grid index ({x}, {y}) is outside grid of size {size_lon}x{size_lat}")]
    InvalidGridIndex {
        /// Longitude (column) index.
        x: u32,
        /// Latitude (row) index.
        y: u32,
        /// Number of columns.
        size_lon: u32,
        /// Number of rows.
        size_lat: u32,
    },

    /// The requested interpolation mode is not implemented.
    #[error("{0:?} interpolation is not supported")]
    UnsupportedInterpolation(crate::Interpolation),

    /// The provider answered with a non-OK status.
    #[error("Provider {provider} returned {status:?}: {message}")]
    Provider {
        /// Provider identifier.
        provider: String,
        /// Status reported by the provider.
        status: ProviderStatus,
        /// Message reported by the provider (may be empty).
        message: String,
    },

    /// The provider has no elevation data for a location.
    #[error("Provider {provider} has no data for ({lat}, {lon})")]
    NoData {
        /// Provider identifier.
        provider: String,
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
    },

    /// A gap was processed but the provider result did not fill it.
    #[error("Cell ({x}, {y}) of tile {tile_id} is still unresolved after a fill request")]
    Unresolved {
        /// Tile identifier.
        tile_id: u64,
        /// Longitude (column) index.
        x: u32,
        /// Latitude (row) index.
        y: u32,
    },

    /// Persisted tile data disagrees with the tile being hydrated.
    #[error("Persisted tile {tile_id} does not match: {reason}")]
    PersistenceSchema {
        /// Tile identifier.
        tile_id: u64,
        /// Which field mismatched.
        reason: String,
    },

    /// The provider's daily request budget has been used up.
    #[error("Daily request limit of {limit} reached for provider {provider}")]
    DailyLimitReached {
        /// Provider identifier.
        provider: String,
        /// Configured requests per day.
        limit: u32,
    },

    /// Configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Single-target prefetching was selected without a target.
    #[error("No prefetch target configured")]
    NoPrefetchTarget,

    /// The scheduler was asked to do something its current state forbids.
    #[error("Scheduler is {0:?}")]
    SchedulerState(crate::SchedulerState),

    /// The scheduler thread panicked.
    #[error("Scheduler thread panicked")]
    SchedulerPanicked,
}

impl TerraError {
    /// Build a provider error from a status and optional message.
    pub fn provider(provider: &str, status: ProviderStatus, message: Option<String>) -> Self {
        TerraError::Provider {
            provider: provider.to_string(),
            status,
            message: message.unwrap_or_default(),
        }
    }
}
