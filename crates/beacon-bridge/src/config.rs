//! Bridge configuration.
//!
//! Loaded from TOML. Every section is optional and falls back to its
//! defaults, so an empty file is a valid configuration.

use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::time::Duration;

use beacon_metrics::{HistogramConfig, IngestPolicy, Path};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Scrape endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Whether to serve the scrape endpoint.
    pub enabled: bool,
    /// Address to bind the HTTP server to.
    pub bind_addr: SocketAddr,
    /// Route serving the OpenMetrics text, in addition to `/metrics`.
    pub path: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8088)),
            path: "/stats".to_string(),
        }
    }
}

/// Push exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PushConfig {
    /// Whether to run the push exporter.
    pub enabled: bool,
    /// Seconds between push cycles.
    pub interval_secs: u64,
    /// Prepended to every published topic.
    pub topic_prefix: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            topic_prefix: String::new(),
        }
    }
}

impl PushConfig {
    /// The push period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Default sampler settings for bridge histograms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistogramSettings {
    /// Slots per histogram.
    pub capacity: usize,
    /// Read window in seconds.
    pub window_secs: u64,
}

impl Default for HistogramSettings {
    fn default() -> Self {
        let defaults = HistogramConfig::default();
        Self {
            capacity: defaults.capacity,
            window_secs: defaults.window.as_secs(),
        }
    }
}

impl HistogramSettings {
    /// Quantile-mode histogram configuration with these settings.
    #[must_use]
    pub fn to_config(&self) -> HistogramConfig {
        HistogramConfig::quantiles()
            .with_capacity(self.capacity)
            .with_window(Duration::from_secs(self.window_secs))
    }
}

/// Which events are ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct IngestConfig {
    /// Accepted device names; empty accepts all.
    pub devices: Vec<String>,
    /// Minimum seconds between handled events from one device.
    pub throttle_secs: u64,
}

impl IngestConfig {
    /// The ingestion policy these settings describe.
    #[must_use]
    pub fn policy(&self) -> IngestPolicy {
        IngestPolicy {
            devices: self.devices.iter().cloned().collect(),
            throttle: Duration::from_secs(self.throttle_secs),
        }
    }
}

/// Main bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Path segments under which device metrics are reported.
    pub metric_path: Vec<String>,
    /// Scrape endpoint.
    pub scrape: ScrapeConfig,
    /// Push exporter.
    pub push: PushConfig,
    /// Histogram defaults.
    pub histogram: HistogramSettings,
    /// Event ingestion.
    pub ingest: IngestConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<FsPath>) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BridgeError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> BridgeResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> BridgeResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("failed to serialize config: {e}")))
    }

    /// The metric path as a [`Path`].
    ///
    /// # Errors
    ///
    /// Returns an error if a segment is empty or contains `/`.
    pub fn metric_root(&self) -> BridgeResult<Path> {
        Path::new(self.metric_path.iter().cloned())
            .map_err(|e| BridgeError::Config(format!("metric_path: {e}")))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> BridgeResult<()> {
        self.metric_root()?;

        if !self.scrape.path.starts_with('/') {
            return Err(BridgeError::Config(
                "scrape.path must start with '/'".to_string(),
            ));
        }

        if self.scrape.path == "/health" {
            return Err(BridgeError::Config(
                "scrape.path cannot be /health".to_string(),
            ));
        }

        if self.push.interval_secs == 0 {
            return Err(BridgeError::Config(
                "push.interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.histogram.capacity == 0 {
            return Err(BridgeError::Config(
                "histogram.capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
