//! Streaming quality feedback and decisions

use serde::{Deserialize, Serialize};

use crate::SessionId;

/// One network feedback sample reported by a streaming transport
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct QualityMetric {
    pub session: SessionId,
    /// Round-trip time sample in milliseconds
    pub rtt_ms: f64,
    /// Observed loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Observed throughput in bits per second
    pub throughput_bps: f64,
}

impl QualityMetric {
    pub fn new(session: SessionId, rtt_ms: f64, loss_rate: f64, throughput_bps: f64) -> Self {
        QualityMetric {
            session,
            rtt_ms,
            loss_rate,
            throughput_bps,
        }
    }

    /// Finite, non-negative values and a loss rate inside [0, 1]
    pub fn is_well_formed(&self) -> bool {
        self.rtt_ms.is_finite()
            && self.rtt_ms >= 0.0
            && self.loss_rate.is_finite()
            && (0.0..=1.0).contains(&self.loss_rate)
            && self.throughput_bps.is_finite()
            && self.throughput_bps >= 0.0
    }
}

/// Target resolution tier for a streaming encoder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    /// 240p
    Minimal,
    /// 480p
    Low,
    /// 720p
    Standard,
    /// 1080p
    High,
}

/// Encoder target produced by the quality controller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BitrateDecision {
    /// Target encoding rate in bits per second
    pub target_bps: u64,
    pub resolution: ResolutionTier,
}

impl BitrateDecision {
    pub fn new(target_bps: u64, resolution: ResolutionTier) -> Self {
        BitrateDecision {
            target_bps,
            resolution,
        }
    }
}
