//! YAML-loadable configuration.
//!
//! Every section has defaults, so an empty document is a valid configuration:
//!
//! ```yaml
//! cache:
//!   cell_divisions: 100
//!   precision_m: 10.0
//!   cache_dir: ./elevation-cache
//! orchestrator:
//!   enforce_daily_limit: true
//! provider:
//!   kind: open_topo_data
//!   dataset: eudem25m
//! ```

use crate::provider::{ElevationProvider, GpxzProvider, HttpClient, OpenTopoDataProvider, ReqwestClient};
use crate::{Result, TerraError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default number of tile divisions per degree.
pub const DEFAULT_CELL_DIVISIONS: u16 = 100;

/// Default maximum distance between grid samples in meters.
pub const DEFAULT_PRECISION_M: f64 = 10.0;

/// Default Chebyshev ring radius searched for neighbouring gaps on a miss.
pub const DEFAULT_MISS_RING_RADIUS: u32 = 32;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TerraConfig {
    /// Tile geometry and persistence.
    pub cache: CacheConfig,
    /// Outbound request handling.
    pub orchestrator: OrchestratorConfig,
    /// Background prefetching.
    pub scheduler: SchedulerConfig,
    /// Which provider to use.
    pub provider: ProviderSelection,
}

impl TerraConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Check value ranges of all sections.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.scheduler.validate()?;
        self.provider.validate()
    }
}

/// Tile geometry and persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Tiles per degree along each axis.
    pub cell_divisions: u16,
    /// Maximum distance between neighbouring samples in meters.
    pub precision_m: f64,
    /// Ring radius of the neighbour search performed on a cache miss.
    pub miss_ring_radius: u32,
    /// Root directory of persisted tiles.
    pub cache_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cell_divisions: DEFAULT_CELL_DIVISIONS,
            precision_m: DEFAULT_PRECISION_M,
            miss_ring_radius: DEFAULT_MISS_RING_RADIUS,
            cache_dir: PathBuf::from("elevation-cache"),
        }
    }
}

impl CacheConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.cell_divisions == 0 {
            return Err(TerraError::InvalidConfig("cell_divisions must be greater than 0".into()));
        }
        if !(self.precision_m.is_finite() && self.precision_m > 0.0) {
            return Err(TerraError::InvalidConfig(format!(
                "precision_m must be a positive number, got {}",
                self.precision_m
            )));
        }
        Ok(())
    }
}

/// Outbound request settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// User agent sent with every request; `terracache/<version>` when unset.
    pub user_agent: Option<String>,
    /// Reject requests once the provider's daily budget is used up.
    pub enforce_daily_limit: bool,
}

/// Background prefetch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Sleep between idle iterations and after a failed round, in milliseconds.
    pub idle_interval_ms: u64,
    /// Initial radius of new prefetch targets in meters.
    pub initial_radius_m: f64,
    /// Radius at which prefetch targets stop growing, in meters.
    pub max_radius_m: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: 1000,
            initial_radius_m: 1.0,
            max_radius_m: 100_000.0,
        }
    }
}

impl SchedulerConfig {
    /// Idle interval as a duration.
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_radius_m >= 0.0 && self.initial_radius_m <= self.max_radius_m) {
            return Err(TerraError::InvalidConfig(format!(
                "initial_radius_m ({}) must be within 0..=max_radius_m ({})",
                self.initial_radius_m, self.max_radius_m
            )));
        }
        Ok(())
    }
}

/// Provider selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderSelection {
    /// An OpenTopoData dataset.
    OpenTopoData {
        /// Dataset name, e.g. `eudem25m`.
        dataset: String,
        /// Endpoint override.
        #[serde(default)]
        base_url: Option<String>,
    },
    /// The GPXZ API.
    Gpxz {
        /// API key, passed through verbatim.
        api_key: String,
        /// Endpoint override.
        #[serde(default)]
        base_url: Option<String>,
    },
}

impl Default for ProviderSelection {
    fn default() -> Self {
        ProviderSelection::OpenTopoData {
            dataset: "eudem25m".to_string(),
            base_url: None,
        }
    }
}

impl ProviderSelection {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        match self {
            ProviderSelection::OpenTopoData { dataset, .. } if dataset.trim().is_empty() => {
                Err(TerraError::InvalidConfig("OpenTopoData dataset must not be empty".into()))
            }
            ProviderSelection::Gpxz { api_key, .. } if api_key.trim().is_empty() => {
                Err(TerraError::InvalidConfig("GPXZ api_key must not be empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// Construct the selected provider with a real HTTP client.
    pub fn build(&self) -> Result<Arc<dyn ElevationProvider>> {
        self.validate()?;
        let client: Box<dyn HttpClient> = Box::new(ReqwestClient::new()?);
        let provider: Arc<dyn ElevationProvider> = match self {
            ProviderSelection::OpenTopoData { dataset, base_url } => {
                let base = base_url.as_deref().unwrap_or(crate::provider::OTD_BASE_URL);
                Arc::new(OpenTopoDataProvider::with_client(dataset, base, client))
            }
            ProviderSelection::Gpxz { api_key, base_url } => {
                let base = base_url.as_deref().unwrap_or(crate::provider::GPXZ_BASE_URL);
                Arc::new(GpxzProvider::with_client(api_key, base, client))
            }
        };
        provider.config().validate()?;
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = TerraConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, TerraConfig::default());
        assert_eq!(config.cache.cell_divisions, 100);
        assert_eq!(config.cache.miss_ring_radius, 32);
        assert_eq!(config.scheduler.idle_interval(), Duration::from_secs(1));
        assert!(!config.orchestrator.enforce_daily_limit);
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
cache:
  cell_divisions: 10
  precision_m: 30.0
  cache_dir: /tmp/tiles
orchestrator:
  user_agent: my-app/1.0
  enforce_daily_limit: true
scheduler:
  idle_interval_ms: 250
provider:
  kind: gpxz
  api_key: abc123
"#;
        let config = TerraConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.cache.cell_divisions, 10);
        assert_eq!(config.cache.precision_m, 30.0);
        assert_eq!(config.cache.miss_ring_radius, DEFAULT_MISS_RING_RADIUS);
        assert_eq!(config.cache.cache_dir, PathBuf::from("/tmp/tiles"));
        assert_eq!(config.orchestrator.user_agent.as_deref(), Some("my-app/1.0"));
        assert!(config.orchestrator.enforce_daily_limit);
        assert_eq!(config.scheduler.idle_interval_ms, 250);
        assert_eq!(
            config.provider,
            ProviderSelection::Gpxz {
                api_key: "abc123".to_string(),
                base_url: None
            }
        );
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            TerraConfig::from_yaml_str("cache:\n  cell_divisions: 0\n"),
            Err(TerraError::InvalidConfig(_))
        ));
        assert!(matches!(
            TerraConfig::from_yaml_str("cache:\n  precision_m: -1.0\n"),
            Err(TerraError::InvalidConfig(_))
        ));
        assert!(matches!(
            TerraConfig::from_yaml_str("provider:\n  kind: open_topo_data\n  dataset: ''\n"),
            Err(TerraError::InvalidConfig(_))
        ));
        assert!(matches!(TerraConfig::from_yaml_str("bogus: 1\n"), Err(TerraError::Yaml(_))));
    }
}
