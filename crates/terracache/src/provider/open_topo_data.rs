//! OpenTopoData adapter.
//!
//! See <https://www.opentopodata.org/api/>. Requests look like
//! `https://api.opentopodata.org/v1/<dataset>?locations=lat,lon|lat,lon`.

use super::http::{HttpClient, ReqwestClient};
use super::{build_locations_query, ElevationProvider, ProviderConfig, ProviderResponse, ProviderStatus};
use crate::geo::{Position, Sample};
use crate::{Result, TerraError};
use serde::Deserialize;
use tracing::debug;

/// Public OpenTopoData endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.opentopodata.org/v1/";

#[derive(Debug, Deserialize)]
struct OtdResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Vec<OtdResult>,
}

#[derive(Debug, Deserialize)]
struct OtdResult {
    elevation: Option<f64>,
    location: OtdLocation,
}

#[derive(Debug, Deserialize)]
struct OtdLocation {
    lat: f64,
    lng: f64,
}

/// Elevation provider backed by an OpenTopoData dataset.
pub struct OpenTopoDataProvider {
    config: ProviderConfig,
    dataset: String,
    client: Box<dyn HttpClient>,
}

impl OpenTopoDataProvider {
    /// Create a provider for `dataset` (e.g. `eudem25m`, `srtm30m`) on the public endpoint.
    pub fn new(dataset: &str) -> Result<Self> {
        Ok(Self::with_client(dataset, DEFAULT_BASE_URL, Box::new(ReqwestClient::new()?)))
    }

    /// Create a provider with a custom endpoint and HTTP client.
    pub fn with_client(dataset: &str, base_url: &str, client: Box<dyn HttpClient>) -> Self {
        let config = ProviderConfig {
            id: format!("otd_{}", dataset),
            name: format!("OpenTopoData ({})", dataset),
            base_url: base_url.to_string(),
            locations_per_request: 100,
            requests_per_second: 1,
            requests_per_day: 1000,
            separator: "|".to_string(),
        };
        Self {
            config,
            dataset: dataset.to_string(),
            client,
        }
    }

    /// Dataset name.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Request URL for a batch of positions.
    pub fn request_url(&self, positions: &[Position]) -> String {
        format!(
            "{}{}?locations={}",
            self.config.base_url,
            self.dataset,
            build_locations_query(positions, &self.config.separator)
        )
    }

    /// Parse a response body.
    ///
    /// A result without elevation means the dataset does not cover that
    /// location and fails the whole response with [`TerraError::NoData`].
    pub fn parse_response(&self, body: &str) -> Result<ProviderResponse> {
        let parsed: OtdResponse = serde_json::from_str(body)?;

        let mut samples = Vec::with_capacity(parsed.results.len());
        for result in parsed.results {
            let elevation = result.elevation.ok_or_else(|| TerraError::NoData {
                provider: self.config.id.clone(),
                lat: result.location.lat,
                lon: result.location.lng,
            })?;
            samples.push(Sample::new(result.location.lat, result.location.lng, elevation));
        }

        let status = ProviderStatus::from_status_str(&parsed.status);
        let error = match status {
            ProviderStatus::Ok => None,
            _ => parsed.error.or(Some(parsed.status)),
        };
        Ok(ProviderResponse { samples, status, error })
    }
}

impl ElevationProvider for OpenTopoDataProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn request(&self, positions: &[Position], user_agent: &str) -> Result<ProviderResponse> {
        let url = self.request_url(positions);
        debug!(provider = %self.config.id, locations = positions.len(), "requesting elevations");
        let body = self.client.get(&url, user_agent)?;
        self.parse_response(&body)
    }
}
