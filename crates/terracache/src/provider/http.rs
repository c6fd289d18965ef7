//! HTTP client abstraction for testability.

use crate::{Result, TerraError};
use std::time::Duration;

/// Default request timeout for provider calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Minimal blocking HTTP GET capability.
///
/// Providers talk to this trait so tests can inject canned responses.
pub trait HttpClient: Send + Sync {
    /// GET `url` and return the response body as text.
    fn get(&self, url: &str, user_agent: &str) -> Result<String>;
}

/// [`HttpClient`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Create a client with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, user_agent: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()?;

        // Providers report failures in the JSON body along with a 4xx/5xx
        // status, so the body is returned whenever it is present.
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() && body.trim().is_empty() {
            return Err(TerraError::Io(std::io::Error::other(format!("HTTP {} from {}", status, url))));
        }
        Ok(body)
    }
}
