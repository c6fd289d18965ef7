//! Rate-limited, batch-splitting access to the active elevation provider.
//!
//! All outbound traffic passes through one critical section, so two callers
//! never talk to a provider at the same time and the per-second spacing is
//! honoured across threads.

use crate::config::OrchestratorConfig;
use crate::geo::Position;
use crate::provider::{ElevationProvider, ProviderResponse, ProviderStatus};
use crate::{Result, TerraError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Length of the daily request window.
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Default user agent sent to providers.
pub fn default_user_agent() -> String {
    format!("terracache/{}", env!("CARGO_PKG_VERSION"))
}

/// Request bookkeeping for one provider.
#[derive(Debug, Clone, Default)]
pub struct RateState {
    /// When the last request to this provider completed.
    pub last_request: Option<Instant>,
    /// Requests made since the orchestrator was created.
    pub total_requests: u64,
    /// Start of the current 24 hour window.
    pub day_started: Option<Instant>,
    /// Requests made in the current 24 hour window.
    pub requests_today: u32,
}

impl RateState {
    fn roll_day(&mut self, now: Instant) {
        match self.day_started {
            Some(start) if now.duration_since(start) < DAY => {}
            _ => {
                self.day_started = Some(now);
                self.requests_today = 0;
            }
        }
    }
}

/// Serialises and paces requests to the active provider.
pub struct RequestOrchestrator {
    provider: RwLock<Arc<dyn ElevationProvider>>,
    user_agent: String,
    enforce_daily_limit: bool,
    rates: Mutex<HashMap<String, RateState>>,
}

impl RequestOrchestrator {
    /// Create an orchestrator with default settings.
    pub fn new(provider: Arc<dyn ElevationProvider>) -> Self {
        Self::with_config(provider, &OrchestratorConfig::default())
    }

    /// Create an orchestrator from configuration.
    pub fn with_config(provider: Arc<dyn ElevationProvider>, config: &OrchestratorConfig) -> Self {
        Self {
            provider: RwLock::new(provider),
            user_agent: config.user_agent.clone().unwrap_or_else(default_user_agent),
            enforce_daily_limit: config.enforce_daily_limit,
            rates: Mutex::new(HashMap::new()),
        }
    }

    /// The active provider.
    pub fn provider(&self) -> Arc<dyn ElevationProvider> {
        self.provider.read().clone()
    }

    /// Replace the active provider. Rate state of every provider is kept.
    pub fn set_provider(&self, provider: Arc<dyn ElevationProvider>) {
        debug!(provider = %provider.id(), "switching elevation provider");
        *self.provider.write() = provider;
    }

    /// User agent sent with every request.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Maximum number of positions the active provider accepts per request.
    pub fn capacity(&self) -> usize {
        self.provider().config().locations_per_request
    }

    /// Requests made to all providers.
    pub fn total_requests(&self) -> u64 {
        self.rates.lock().values().map(|s| s.total_requests).sum()
    }

    /// Requests made to one provider.
    pub fn total_requests_for(&self, provider_id: &str) -> u64 {
        self.rates.lock().get(provider_id).map_or(0, |s| s.total_requests)
    }

    /// Snapshot of one provider's bookkeeping.
    pub fn rate_state(&self, provider_id: &str) -> Option<RateState> {
        self.rates.lock().get(provider_id).cloned()
    }

    /// Perform a single provider request, waiting out the per-second spacing.
    ///
    /// The timestamp and counters are updated whether or not the request
    /// succeeds.
    pub fn request_managed(&self, positions: &[Position]) -> Result<ProviderResponse> {
        let provider = self.provider();
        let config = provider.config();
        config.validate()?;

        let mut rates = self.rates.lock();
        let state = rates.entry(config.id.clone()).or_default();

        state.roll_day(Instant::now());
        if state.requests_today >= config.requests_per_day {
            if self.enforce_daily_limit {
                return Err(TerraError::DailyLimitReached {
                    provider: config.id.clone(),
                    limit: config.requests_per_day,
                });
            }
            if state.requests_today == config.requests_per_day {
                warn!(provider = %config.id, limit = config.requests_per_day, "daily request budget exceeded");
            }
        }

        let spacing = Duration::from_millis(1000 / config.requests_per_second as u64);
        if let Some(last) = state.last_request {
            let elapsed = last.elapsed();
            if elapsed < spacing {
                let wait = spacing - elapsed;
                trace!(provider = %config.id, wait_ms = wait.as_millis() as u64, "rate limiting");
                std::thread::sleep(wait);
            }
        }

        let result = provider.request(positions, &self.user_agent);

        state.last_request = Some(Instant::now());
        state.total_requests += 1;
        state.requests_today += 1;
        debug!(
            provider = %config.id,
            locations = positions.len(),
            total = state.total_requests,
            "provider request complete"
        );
        result
    }

    /// Request any number of positions, splitting into sequential batches of
    /// at most [`capacity`](Self::capacity) positions.
    ///
    /// Samples are concatenated in request order. Every batch is executed;
    /// the first non-OK status and its message are reported. A transport
    /// error in one batch of a split request is reported as
    /// [`ProviderStatus::Undefined`] so the remaining batches still run.
    pub fn request_raw(&self, positions: &[Position]) -> Result<ProviderResponse> {
        if positions.is_empty() {
            return Ok(ProviderResponse::ok(Vec::new()));
        }

        let provider = self.provider();
        provider.config().validate()?;
        let capacity = provider.config().locations_per_request;
        if positions.len() <= capacity {
            return self.request_managed(positions);
        }

        debug!(
            locations = positions.len(),
            batches = positions.len().div_ceil(capacity),
            "splitting provider request"
        );

        let mut combined = ProviderResponse::ok(Vec::with_capacity(positions.len()));
        for batch in positions.chunks(capacity) {
            let response = match self.request_managed(batch) {
                Ok(response) => response,
                Err(e @ TerraError::DailyLimitReached { .. }) => return Err(e),
                Err(e) => {
                    warn!(error = %e, "provider batch failed");
                    ProviderResponse::failed(ProviderStatus::Undefined, e.to_string())
                }
            };

            if !response.status.is_ok() && combined.status.is_ok() {
                combined.status = response.status;
                combined.error = response.error;
            }
            combined.samples.extend(response.samples);
        }
        Ok(combined)
    }
}
