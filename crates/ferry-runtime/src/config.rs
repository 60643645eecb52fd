//! Runtime configuration
//!
//! Loaded from JSON; every field is optional and falls back to its default.
//! Durations are human-readable strings ("10s", "250ms").

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ferry_core::{FerryError, FerryResult};
use ferry_notify::BusConfig;
use ferry_quality::QualityConfig;
use ferry_transport::TimeoutPolicy;

use crate::SelectorRules;

/// Ferry runtime configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    /// Protocol selection rules
    pub selector: SelectorRules,
    /// Per-transport attempt timeouts
    pub timeouts: TimeoutPolicy,
    /// Adaptive bitrate tuning for streaming sessions
    pub quality: QualityConfig,
    /// Notification bus sizing
    pub bus: BusConfig,
    /// Sessions orchestrated at once; the rest wait in FIFO order
    pub max_concurrent_sessions: usize,
    /// Finished sessions kept for status queries
    pub retain_finished: usize,
    /// How long shutdown waits for running sessions before cancelling them
    #[serde(with = "ferry_core::duration")]
    pub drain_timeout: Duration,
}

impl Default for FerryConfig {
    fn default() -> Self {
        FerryConfig {
            selector: SelectorRules::default(),
            timeouts: TimeoutPolicy::default(),
            quality: QualityConfig::default(),
            bus: BusConfig::default(),
            max_concurrent_sessions: 16,
            retain_finished: 128,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl FerryConfig {
    /// Configuration for constrained links
    pub fn low_bandwidth() -> Self {
        FerryConfig {
            quality: QualityConfig::low_bandwidth(),
            max_concurrent_sessions: 4,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> FerryResult<Self> {
        let config: FerryConfig =
            serde_json::from_str(json).map_err(|e| FerryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> FerryResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FerryError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> FerryResult<()> {
        self.selector.validate()?;
        self.timeouts.validate()?;
        self.quality.validate()?;
        if self.bus.queue_capacity == 0 {
            return Err(FerryError::Config("bus queue_capacity must be positive".into()));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(FerryError::Config(
                "max_concurrent_sessions must be positive".into(),
            ));
        }
        Ok(())
    }
}
