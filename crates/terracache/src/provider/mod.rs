//! Elevation provider abstraction.
//!
//! A provider answers batched elevation queries for a list of positions.
//! Static limits (batch size, request rate, daily budget) are plain data on
//! [`ProviderConfig`]; the [`RequestOrchestrator`](crate::RequestOrchestrator)
//! enforces them.
//!
//! Concrete HTTP providers share [`build_locations_query`] and
//! [`HttpClient`] rather than a common base type.

mod gpxz;
mod http;
mod open_topo_data;

pub use gpxz::{GpxzProvider, DEFAULT_BASE_URL as GPXZ_BASE_URL};
pub use http::{HttpClient, ReqwestClient};
pub use open_topo_data::{OpenTopoDataProvider, DEFAULT_BASE_URL as OTD_BASE_URL};

use crate::geo::{Position, Sample};
use crate::{Result, TerraError};

/// Status reported by a provider for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Request succeeded.
    Ok,
    /// The provider rejected the request.
    InvalidRequest,
    /// The provider failed internally.
    ServerError,
    /// Any other status.
    Undefined,
}

impl ProviderStatus {
    /// Map a provider status string to a status.
    pub fn from_status_str(status: &str) -> Self {
        match status {
            "OK" => ProviderStatus::Ok,
            "INVALID_REQUEST" => ProviderStatus::InvalidRequest,
            "SERVER_ERROR" => ProviderStatus::ServerError,
            _ => ProviderStatus::Undefined,
        }
    }

    /// Whether this is [`ProviderStatus::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, ProviderStatus::Ok)
    }
}

/// Result of a provider request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    /// Resolved samples, in request order.
    pub samples: Vec<Sample>,
    /// Status reported by the provider.
    pub status: ProviderStatus,
    /// Error message accompanying a non-OK status.
    pub error: Option<String>,
}

impl ProviderResponse {
    /// A successful response.
    pub fn ok(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            status: ProviderStatus::Ok,
            error: None,
        }
    }

    /// A failed response without samples.
    pub fn failed(status: ProviderStatus, error: impl Into<String>) -> Self {
        Self {
            samples: Vec::new(),
            status,
            error: Some(error.into()),
        }
    }
}

/// Static description and limits of a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Stable identifier, used for rate accounting and storage paths.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Endpoint base URL.
    pub base_url: String,
    /// Maximum number of positions per request.
    pub locations_per_request: usize,
    /// Maximum requests per second.
    pub requests_per_second: u32,
    /// Maximum requests per day.
    pub requests_per_day: u32,
    /// Separator between encoded positions.
    pub separator: String,
}

impl ProviderConfig {
    /// Check that the limits describe a usable provider.
    pub fn validate(&self) -> Result<()> {
        if self.locations_per_request == 0 {
            return Err(TerraError::InvalidConfig(format!(
                "provider {} must accept at least one location per request",
                self.id
            )));
        }
        if self.requests_per_second == 0 {
            return Err(TerraError::InvalidConfig(format!(
                "provider {} must allow at least one request per second",
                self.id
            )));
        }
        Ok(())
    }
}

/// A source of elevation data.
pub trait ElevationProvider: Send + Sync {
    /// Static configuration of this provider.
    fn config(&self) -> &ProviderConfig;

    /// Resolve elevations for a batch of positions.
    ///
    /// Transport failures are returned as errors; provider-level failures
    /// are reported through [`ProviderResponse::status`].
    fn request(&self, positions: &[Position], user_agent: &str) -> Result<ProviderResponse>;

    /// Stable identifier of this provider.
    fn id(&self) -> &str {
        &self.config().id
    }
}

/// Encode positions as `lat,lon` pairs joined by `separator`.
pub fn build_locations_query(positions: &[Position], separator: &str) -> String {
    positions
        .iter()
        .map(|p| format!("{},{}", p.lat, p.lon))
        .collect::<Vec<_>>()
        .join(separator)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_locations_query() {
        let positions = [Position::new(47.08, 12.67), Position::new(-33.5, 151.25)];
        assert_eq!(build_locations_query(&positions, "|"), "47.08,12.67|-33.5,151.25");
        assert_eq!(build_locations_query(&[], "|"), "");
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(ProviderStatus::from_status_str("OK"), ProviderStatus::Ok);
        assert_eq!(ProviderStatus::from_status_str("INVALID_REQUEST"), ProviderStatus::InvalidRequest);
        assert_eq!(ProviderStatus::from_status_str("SERVER_ERROR"), ProviderStatus::ServerError);
        assert_eq!(ProviderStatus::from_status_str("OVER_QUERY_LIMIT"), ProviderStatus::Undefined);
    }

    #[test]
    fn test_config_validation() {
        let provider = mock::MockProvider::new(10, 1, |_, _| 0.0);
        assert!(provider.config().validate().is_ok());

        let mut config = provider.config().clone();
        config.locations_per_request = 0;
        assert!(matches!(config.validate(), Err(TerraError::InvalidConfig(_))));

        let mut config = provider.config().clone();
        config.requests_per_second = 0;
        assert!(matches!(config.validate(), Err(TerraError::InvalidConfig(_))));
    }
}
