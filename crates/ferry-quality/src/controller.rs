//! Quality Controller - adaptive bitrate for one streaming session
//!
//! Multiplicative decrease on congestion, additive increase after a run of
//! clean samples. The target rate is always clamped to `[min_bps, max_bps]`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ferry_core::{
    BitrateDecision, FerryError, FerryResult, QualityMetric, ResolutionTier, SessionId,
};

use crate::NetworkEstimate;

/// Quality controller configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Lowest target rate (bps)
    pub min_bps: u64,
    /// Highest target rate (bps)
    pub max_bps: u64,
    /// Starting target rate (bps)
    pub initial_bps: u64,
    /// EMA smoothing factor for feedback samples
    pub ema_alpha: f64,
    /// Smoothed loss above this triggers a decrease
    pub loss_threshold: f64,
    /// Smoothed loss at or below this counts as clean
    pub clean_loss: f64,
    /// Decrease when throughput < target × (1 - margin)
    pub throughput_margin: f64,
    /// Proportional decrease step (0.15 = drop 15%)
    pub decrease_factor: f64,
    /// Additive increase step (bps)
    pub increase_step_bps: u64,
    /// Consecutive clean samples required before increasing
    pub sustain_samples: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        QualityConfig {
            min_bps: 150_000,
            max_bps: 6_000_000,
            initial_bps: 1_500_000,
            ema_alpha: 0.25,
            loss_threshold: 0.05,
            clean_loss: 0.005,
            throughput_margin: 0.15,
            decrease_factor: 0.15,
            increase_step_bps: 100_000,
            sustain_samples: 5,
        }
    }
}

impl QualityConfig {
    /// Configuration for constrained links (mobile, 2G/3G class)
    pub fn low_bandwidth() -> Self {
        QualityConfig {
            min_bps: 64_000,
            max_bps: 1_200_000,
            initial_bps: 300_000,
            ema_alpha: 0.2,
            loss_threshold: 0.08,
            clean_loss: 0.01,
            throughput_margin: 0.2,
            decrease_factor: 0.25,
            increase_step_bps: 32_000,
            sustain_samples: 8,
        }
    }

    pub fn validate(&self) -> FerryResult<()> {
        if self.min_bps == 0 || self.min_bps > self.max_bps {
            return Err(FerryError::Config(format!(
                "quality range [{}, {}] is empty",
                self.min_bps, self.max_bps
            )));
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(FerryError::Config("ema_alpha must be in (0, 1]".into()));
        }
        if !(self.decrease_factor > 0.0 && self.decrease_factor < 1.0) {
            return Err(FerryError::Config("decrease_factor must be in (0, 1)".into()));
        }
        if !(0.0..1.0).contains(&self.throughput_margin) {
            return Err(FerryError::Config("throughput_margin must be in [0, 1)".into()));
        }
        if self.clean_loss > self.loss_threshold {
            return Err(FerryError::Config(
                "clean_loss must not exceed loss_threshold".into(),
            ));
        }
        if self.increase_step_bps == 0 || self.sustain_samples == 0 {
            return Err(FerryError::Config(
                "increase step and sustain samples must be positive".into(),
            ));
        }
        Ok(())
    }

    fn clamp(&self, bps: u64) -> u64 {
        bps.clamp(self.min_bps, self.max_bps)
    }
}

/// Resolution tier for a target rate
pub fn tier_for(target_bps: u64) -> ResolutionTier {
    match target_bps {
        0..=499_999 => ResolutionTier::Minimal,
        500_000..=1_199_999 => ResolutionTier::Low,
        1_200_000..=2_499_999 => ResolutionTier::Standard,
        _ => ResolutionTier::High,
    }
}

/// Bitrate controller for one streaming session.
///
/// Owned by that session's orchestration task; never shared.
#[derive(Debug)]
pub struct QualityController {
    session: SessionId,
    config: QualityConfig,
    estimate: NetworkEstimate,
    target_bps: u64,
    clean_streak: u32,
    last_published: BitrateDecision,
    anomalies: u64,
}

impl QualityController {
    pub fn new(session: SessionId, config: QualityConfig) -> Self {
        let target_bps = config.clamp(config.initial_bps);
        QualityController {
            session,
            estimate: NetworkEstimate::new(config.ema_alpha),
            target_bps,
            clean_streak: 0,
            last_published: BitrateDecision::new(target_bps, tier_for(target_bps)),
            anomalies: 0,
            config,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Current decision
    pub fn decision(&self) -> BitrateDecision {
        BitrateDecision::new(self.target_bps, tier_for(self.target_bps))
    }

    pub fn estimate(&self) -> &NetworkEstimate {
        &self.estimate
    }

    /// Malformed or foreign metrics dropped so far
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Fold one feedback sample in and return the resulting decision.
    ///
    /// Malformed metrics, or metrics for another session, are dropped and
    /// counted; the current decision is returned unchanged.
    pub fn observe(&mut self, metric: &QualityMetric) -> BitrateDecision {
        if metric.session != self.session || !metric.is_well_formed() {
            self.anomalies += 1;
            warn!(
                session = %self.session,
                metric_session = %metric.session,
                anomalies = self.anomalies,
                "dropping malformed quality metric"
            );
            return self.decision();
        }

        self.estimate.update(metric);
        let target = self.target_bps as f64;
        let congested = self.estimate.loss_rate > self.config.loss_threshold
            || self.estimate.throughput_bps < target * (1.0 - self.config.throughput_margin);

        if congested {
            self.clean_streak = 0;
            let reduced = (target * (1.0 - self.config.decrease_factor)) as u64;
            self.set_target(reduced);
        } else if self.estimate.loss_rate <= self.config.clean_loss
            && self.estimate.throughput_bps > target
        {
            self.clean_streak += 1;
            if self.clean_streak >= self.config.sustain_samples {
                self.clean_streak = 0;
                let raised = self.target_bps.saturating_add(self.config.increase_step_bps);
                self.set_target(raised);
            }
        } else {
            self.clean_streak = 0;
        }

        self.decision()
    }

    /// The current decision if it differs from the last one handed out for
    /// publishing; `None` on steady state.
    pub fn take_publishable(&mut self) -> Option<BitrateDecision> {
        let current = self.decision();
        if current == self.last_published {
            return None;
        }
        self.last_published = current;
        Some(current)
    }

    fn set_target(&mut self, bps: u64) {
        let next = self.config.clamp(bps);
        if next != self.target_bps {
            debug!(
                session = %self.session,
                from = self.target_bps,
                to = next,
                "bitrate target adjusted"
            );
        }
        self.target_bps = next;
    }
}
