// Configuration for the diagnostics engine
//
// Every heuristic constant is a tunable here. The race window has no
// default: how close two accesses must be to look simultaneous depends on
// the workload, so the caller always supplies it.

use crate::cache_line::DEFAULT_CACHE_LINE_SIZE;
use crate::error::{ConfigurationError, Result};
use crate::patterns::ClassifierThresholds;
use crate::race_detector::PairingPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Tunables for one diagnostic session
///
/// # Example
/// ```
/// use racelens::config::DiagnosticsConfig;
/// use std::time::Duration;
///
/// let config = DiagnosticsConfig::new(Duration::from_micros(50));
/// assert_eq!(config.cache_line_size, 64);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Maximum gap, in nanoseconds, between two accesses reported as a race
    ///
    /// Required in configuration files.
    pub race_window_nanos: u64,

    /// Cache line size in bytes used for false-sharing bucketing
    ///
    /// Default: 64
    #[serde(default = "default_cache_line_size")]
    pub cache_line_size: u64,

    /// Race pairing policy
    ///
    /// Default: `first_match`
    #[serde(default)]
    pub pairing: PairingPolicy,

    /// Load-imbalance and synchronization thresholds
    #[serde(default)]
    pub classifier: ClassifierThresholds,
}

fn default_cache_line_size() -> u64 {
    DEFAULT_CACHE_LINE_SIZE
}

impl DiagnosticsConfig {
    /// Configuration with the given race window and default thresholds
    pub fn new(race_window: Duration) -> Self {
        Self {
            race_window_nanos: u64::try_from(race_window.as_nanos()).unwrap_or(u64::MAX),
            cache_line_size: DEFAULT_CACHE_LINE_SIZE,
            pairing: PairingPolicy::FirstMatch,
            classifier: ClassifierThresholds::default(),
        }
    }

    /// Stricter thresholds (fewer false positives, more false negatives)
    pub fn strict(race_window: Duration) -> Self {
        Self {
            classifier: ClassifierThresholds {
                imbalance_ratio: 2.0,
                sync_events_per_ms: 0.5,
                ..Default::default()
            },
            ..Self::new(race_window)
        }
    }

    /// Looser thresholds that report every conflicting partner
    pub fn permissive(race_window: Duration) -> Self {
        Self {
            pairing: PairingPolicy::AllPartners,
            classifier: ClassifierThresholds {
                imbalance_ratio: 1.2,
                sync_events_per_ms: 0.05,
                ..Default::default()
            },
            ..Self::new(race_window)
        }
    }

    pub fn race_window(&self) -> Duration {
        Duration::from_nanos(self.race_window_nanos)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.race_window_nanos == 0 {
            return Err(ConfigurationError::InvalidConfig(
                "race_window_nanos must be > 0".to_string(),
            ));
        }

        if self.cache_line_size == 0 {
            return Err(ConfigurationError::InvalidConfig(
                "cache_line_size must be > 0".to_string(),
            ));
        }

        let thresholds = &self.classifier;
        if thresholds.imbalance_ratio.is_nan() || thresholds.imbalance_ratio < 1.0 {
            return Err(ConfigurationError::InvalidConfig(format!(
                "classifier.imbalance_ratio must be >= 1, got {}",
                thresholds.imbalance_ratio
            )));
        }

        if thresholds.sync_events_per_ms.is_nan() || thresholds.sync_events_per_ms < 0.0 {
            return Err(ConfigurationError::InvalidConfig(format!(
                "classifier.sync_events_per_ms must be >= 0, got {}",
                thresholds.sync_events_per_ms
            )));
        }

        if thresholds.min_busy_epsilon_nanos.is_nan() || thresholds.min_busy_epsilon_nanos <= 0.0 {
            return Err(ConfigurationError::InvalidConfig(format!(
                "classifier.min_busy_epsilon_nanos must be > 0, got {}",
                thresholds.min_busy_epsilon_nanos
            )));
        }

        Ok(())
    }

    /// Parse and validate a TOML document
    ///
    /// # Example TOML
    /// ```toml
    /// race_window_nanos = 50000
    /// cache_line_size = 128
    /// pairing = "all_partners"
    ///
    /// [classifier]
    /// imbalance_ratio = 1.5
    /// sync_events_per_ms = 0.1
    /// ```
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self =
            toml::from_str(content).context("Failed to parse TOML diagnostics configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))
    }
}
