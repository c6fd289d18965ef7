//! GPXZ adapter.
//!
//! Requests look like
//! `https://api.gpxz.io/v1/elevation/points?api-key=KEY&latlons=lat,lon|lat,lon`.

use super::http::{HttpClient, ReqwestClient};
use super::{build_locations_query, ElevationProvider, ProviderConfig, ProviderResponse, ProviderStatus};
use crate::geo::{Position, Sample};
use crate::Result;
use serde::Deserialize;
use tracing::debug;

/// Public GPXZ point endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.gpxz.io/v1/elevation/points";

#[derive(Debug, Deserialize)]
struct GpxzResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Vec<GpxzResult>,
}

#[derive(Debug, Deserialize)]
struct GpxzResult {
    lat: f64,
    lon: f64,
    elevation: f64,
}

/// Elevation provider backed by the GPXZ API.
pub struct GpxzProvider {
    config: ProviderConfig,
    api_key: String,
    client: Box<dyn HttpClient>,
}

impl GpxzProvider {
    /// Create a provider on the public endpoint. The key is passed through verbatim.
    pub fn new(api_key: &str) -> Result<Self> {
        Ok(Self::with_client(api_key, DEFAULT_BASE_URL, Box::new(ReqwestClient::new()?)))
    }

    /// Create a provider with a custom endpoint and HTTP client.
    pub fn with_client(api_key: &str, base_url: &str, client: Box<dyn HttpClient>) -> Self {
        Self {
            config: ProviderConfig {
                id: "gpxz".to_string(),
                name: "gpxz.io".to_string(),
                base_url: base_url.to_string(),
                locations_per_request: 50,
                requests_per_second: 1,
                requests_per_day: 100,
                separator: "|".to_string(),
            },
            api_key: api_key.to_string(),
            client,
        }
    }

    /// Request URL for a batch of positions.
    pub fn request_url(&self, positions: &[Position]) -> String {
        format!(
            "{}?api-key={}&latlons={}",
            self.config.base_url,
            self.api_key,
            build_locations_query(positions, &self.config.separator)
        )
    }

    /// Parse a response body.
    pub fn parse_response(&self, body: &str) -> Result<ProviderResponse> {
        let parsed: GpxzResponse = serde_json::from_str(body)?;
        let samples = parsed
            .results
            .into_iter()
            .map(|r| Sample::new(r.lat, r.lon, r.elevation))
            .collect();

        let status = ProviderStatus::from_status_str(&parsed.status);
        let error = match status {
            ProviderStatus::Ok => None,
            _ => parsed.error.or(Some(parsed.status)),
        };
        Ok(ProviderResponse { samples, status, error })
    }
}

impl ElevationProvider for GpxzProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn request(&self, positions: &[Position], user_agent: &str) -> Result<ProviderResponse> {
        debug!(provider = %self.config.id, locations = positions.len(), "requesting elevations");
        let body = self.client.get(&self.request_url(positions), user_agent)?;
        self.parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::super::http::tests::MockHttpClient;
    use super::*;

    #[test]
    fn test_request_and_parse() {
        let body = r#"{"status":"OK","results":[{"lat":-33.5,"lon":151.25,"elevation":12.5,"data_source":"x"}]}"#;
        let provider = GpxzProvider::with_client("secret", DEFAULT_BASE_URL, Box::new(MockHttpClient::new(body)));
        assert_eq!(provider.config().locations_per_request, 50);
        assert_eq!(provider.config().requests_per_day, 100);
        assert_eq!(
            provider.request_url(&[Position::new(-33.5, 151.25)]),
            "https://api.gpxz.io/v1/elevation/points?api-key=secret&latlons=-33.5,151.25"
        );

        let response = provider.request(&[Position::new(-33.5, 151.25)], "agent").unwrap();
        assert_eq!(response.status, ProviderStatus::Ok);
        assert_eq!(response.samples, vec![Sample::new(-33.5, 151.25, 12.5)]);
    }

    #[test]
    fn test_server_error() {
        let provider = GpxzProvider::with_client("k", DEFAULT_BASE_URL, Box::new(MockHttpClient::new("")));
        let response = provider
            .parse_response(r#"{"status":"SERVER_ERROR","error":"upstream timeout"}"#)
            .unwrap();
        assert_eq!(response.status, ProviderStatus::ServerError);
        assert_eq!(response.error.as_deref(), Some("upstream timeout"));
    }
}
