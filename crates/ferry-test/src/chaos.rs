//! Chaos link for streaming tests
//!
//! Simulates the network under a media transport and turns it into the
//! quality samples a real media stack would report:
//! - Jittered round-trip time
//! - Random and burst loss
//! - Fluctuating throughput

use std::time::Duration;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Jitter distribution type
#[derive(Clone, Debug)]
pub enum JitterDistribution {
    /// Uniform distribution
    Uniform { min_ms: u32, max_ms: u32 },
    /// Normal distribution (mean, stddev)
    Normal { mean_ms: f64, stddev_ms: f64 },
    /// Pareto distribution (heavy tail)
    Pareto { scale_ms: f64, shape: f64 },
}

impl JitterDistribution {
    /// Sample a jitter value
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        match self {
            JitterDistribution::Uniform { min_ms, max_ms } => {
                let dist = Uniform::new_inclusive(*min_ms, *max_ms);
                Duration::from_millis(dist.sample(rng) as u64)
            }
            JitterDistribution::Normal { mean_ms, stddev_ms } => {
                // Box-Muller
                let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
                let u2: f64 = rng.gen();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                let value = mean_ms + stddev_ms * z;
                Duration::from_millis(value.max(0.0) as u64)
            }
            JitterDistribution::Pareto { scale_ms, shape } => {
                let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                let value = scale_ms / u.powf(1.0 / shape);
                Duration::from_millis(value.min(1000.0) as u64) // Cap at 1 second
            }
        }
    }
}

/// Link chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Round-trip time before jitter
    pub base_rtt: Duration,
    /// Jitter distribution
    pub jitter: JitterDistribution,
    /// Packet loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Burst loss probability
    pub burst_loss_prob: f64,
    /// Burst loss length range
    pub burst_length: (u32, u32),
    /// Nominal link capacity
    pub bandwidth_bps: f64,
    /// Relative throughput swing per sample (0.2 = ±20%)
    pub bandwidth_variance: f64,
    /// Packets observed per quality sample
    pub window: u32,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            base_rtt: Duration::from_millis(60),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 30,
            },
            loss_rate: 0.01,
            burst_loss_prob: 0.02,
            burst_length: (2, 5),
            bandwidth_bps: 3_000_000.0,
            bandwidth_variance: 0.1,
            window: 50,
        }
    }
}

impl ChaosConfig {
    /// Good network conditions
    pub fn good() -> Self {
        ChaosConfig {
            base_rtt: Duration::from_millis(20),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 10,
            },
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (1, 2),
            bandwidth_bps: 10_000_000.0,
            bandwidth_variance: 0.05,
            window: 50,
        }
    }

    /// Poor network conditions
    pub fn poor() -> Self {
        ChaosConfig {
            base_rtt: Duration::from_millis(150),
            jitter: JitterDistribution::Pareto {
                scale_ms: 50.0,
                shape: 1.5,
            },
            loss_rate: 0.05,
            burst_loss_prob: 0.05,
            burst_length: (3, 8),
            bandwidth_bps: 800_000.0,
            bandwidth_variance: 0.3,
            window: 50,
        }
    }

    /// Hostile network conditions (2G-class)
    pub fn hostile() -> Self {
        ChaosConfig {
            base_rtt: Duration::from_millis(400),
            jitter: JitterDistribution::Pareto {
                scale_ms: 100.0,
                shape: 1.2,
            },
            loss_rate: 0.15,
            burst_loss_prob: 0.1,
            burst_length: (5, 15),
            bandwidth_bps: 120_000.0,
            bandwidth_variance: 0.5,
            window: 50,
        }
    }
}

/// One quality observation of the link
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkSample {
    pub rtt_ms: f64,
    pub loss_rate: f64,
    pub throughput_bps: f64,
}

/// Chaos link statistics
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub samples: u64,
    pub packets_sent: u64,
    pub packets_lost: u64,
    pub bursts: u64,
    pub max_rtt_ms: f64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }
}

/// Seeded chaos link; the same seed always yields the same samples
pub struct ChaosLink {
    config: ChaosConfig,
    rng: StdRng,
    /// Burst loss counter
    burst_remaining: u32,
    stats: ChaosStats,
}

impl ChaosLink {
    /// Create a new chaos link with seed
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosLink {
            config,
            rng: StdRng::seed_from_u64(seed),
            burst_remaining: 0,
            stats: ChaosStats::default(),
        }
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Push one window of packets through the link and summarise it
    pub fn sample(&mut self) -> LinkSample {
        let window = self.config.window.max(1);
        let mut lost = 0u32;
        for _ in 0..window {
            if self.should_drop() {
                lost += 1;
            }
        }
        let loss_rate = lost as f64 / window as f64;

        let rtt = self.config.base_rtt + self.config.jitter.sample(&mut self.rng);
        let rtt_ms = rtt.as_secs_f64() * 1000.0;

        let variance = self.config.bandwidth_variance.clamp(0.0, 0.99);
        let swing = if variance > 0.0 {
            self.rng.gen_range(1.0 - variance..=1.0 + variance)
        } else {
            1.0
        };
        let throughput_bps = (self.config.bandwidth_bps * swing * (1.0 - loss_rate)).max(0.0);

        self.stats.samples += 1;
        self.stats.packets_sent += window as u64;
        self.stats.packets_lost += lost as u64;
        self.stats.max_rtt_ms = self.stats.max_rtt_ms.max(rtt_ms);

        LinkSample {
            rtt_ms,
            loss_rate,
            throughput_bps,
        }
    }

    /// Check if a packet should be dropped
    fn should_drop(&mut self) -> bool {
        // Burst loss
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }

        // Start new burst?
        if self.rng.gen::<f64>() < self.config.burst_loss_prob {
            let (min, max) = self.config.burst_length;
            self.burst_remaining = self.rng.gen_range(min..=max.max(min)).saturating_sub(1);
            self.stats.bursts += 1;
            return true;
        }

        // Random loss
        self.rng.gen::<f64>() < self.config.loss_rate
    }

    /// Get current statistics
    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.stats = ChaosStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_good_link_is_clean() {
        let mut link = ChaosLink::new(ChaosConfig::good(), 12345);
        for _ in 0..100 {
            let sample = link.sample();
            assert_eq!(sample.loss_rate, 0.0);
            assert!(sample.throughput_bps >= 9_000_000.0);
            assert!(sample.rtt_ms >= 20.0 && sample.rtt_ms <= 31.0);
        }
        assert_eq!(link.stats().samples, 100);
    }

    #[test]
    fn test_hostile_link_loses_packets() {
        let mut link = ChaosLink::new(ChaosConfig::hostile(), 12345);
        for _ in 0..200 {
            link.sample();
        }
        let stats = link.stats();
        assert!(stats.loss_rate() > 0.05, "loss rate {}", stats.loss_rate());
        assert!(stats.bursts > 0);
    }

    #[test]
    fn test_same_seed_same_samples() {
        let mut a = ChaosLink::new(ChaosConfig::poor(), 7);
        let mut b = ChaosLink::new(ChaosConfig::poor(), 7);
        for _ in 0..20 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[test]
    fn test_jitter_distribution() {
        let mut rng = StdRng::seed_from_u64(42);

        let pareto = JitterDistribution::Pareto {
            scale_ms: 50.0,
            shape: 1.5,
        };

        let samples: Vec<Duration> = (0..1000).map(|_| pareto.sample(&mut rng)).collect();
        let avg = samples.iter().map(|d| d.as_millis()).sum::<u128>() / 1000;

        // Heavy tail
        let max = samples.iter().map(|d| d.as_millis()).max().unwrap();
        assert!(max > avg * 2);
    }
}
