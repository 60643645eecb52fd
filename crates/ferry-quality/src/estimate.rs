//! Smoothed network estimate for one streaming session

use ferry_core::QualityMetric;

/// Exponential moving averages of the session's feedback.
///
/// Holds no sample history; memory use is constant per session.
#[derive(Clone, Debug)]
pub struct NetworkEstimate {
    /// Smoothing factor applied to each new sample (0 < alpha <= 1)
    alpha: f64,
    /// Smoothed round-trip time (ms)
    pub rtt_ms: f64,
    /// Smoothed loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Smoothed throughput (bits per second)
    pub throughput_bps: f64,
    samples: u64,
}

impl NetworkEstimate {
    pub fn new(alpha: f64) -> Self {
        NetworkEstimate {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            rtt_ms: 0.0,
            loss_rate: 0.0,
            throughput_bps: 0.0,
            samples: 0,
        }
    }

    /// Fold a sample into the averages. The first sample seeds them.
    pub fn update(&mut self, metric: &QualityMetric) {
        if self.samples == 0 {
            self.rtt_ms = metric.rtt_ms;
            self.loss_rate = metric.loss_rate;
            self.throughput_bps = metric.throughput_bps;
        } else {
            self.rtt_ms = Self::blend(self.rtt_ms, metric.rtt_ms, self.alpha);
            self.loss_rate = Self::blend(self.loss_rate, metric.loss_rate, self.alpha);
            self.throughput_bps =
                Self::blend(self.throughput_bps, metric.throughput_bps, self.alpha);
        }
        self.samples += 1;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    #[inline]
    fn blend(current: f64, sample: f64, alpha: f64) -> f64 {
        current * (1.0 - alpha) + sample * alpha
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::SessionId;

    fn metric(loss: f64, throughput: f64) -> QualityMetric {
        QualityMetric::new(SessionId::new(1), 50.0, loss, throughput)
    }

    #[test]
    fn test_first_sample_seeds() {
        let mut est = NetworkEstimate::new(0.1);
        est.update(&metric(0.2, 1_000_000.0));
        assert_eq!(est.loss_rate, 0.2);
        assert_eq!(est.throughput_bps, 1_000_000.0);
        assert_eq!(est.samples(), 1);
    }

    #[test]
    fn test_ema_converges() {
        let mut est = NetworkEstimate::new(0.5);
        est.update(&metric(0.0, 0.0));
        for _ in 0..20 {
            est.update(&metric(0.1, 2_000_000.0));
        }
        assert!((est.loss_rate - 0.1).abs() < 1e-4);
        assert!((est.throughput_bps - 2_000_000.0).abs() < 10.0);
    }
}
