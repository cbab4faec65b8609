// REPUTATION SCORING POLICY
// Deterministic, pure function of CheckerMetrics.
//
//   availability = (uptime/100 * 0.6 + (1 - min(avgResponse/5000, 1)) * 0.4) * 0.5
//   performance  = ((1 - errorRate) * 0.4 + min(throughput/100, 1) * 0.3 + (1 - min(p95/1000, 1)) * 0.3) * 0.3
//   security     = (certificateValid ? 1 : 0) * 0.2
//   final        = (availability + performance + security) * 100        in [0, 100]
//
// The 0.5 / 0.3 / 0.2 group weights are policy constants. Changing any of them
// changes every score ever compared against; update this table with them.

use checknet_core::CheckerMetrics;
use serde::{Deserialize, Serialize};

pub const AVAILABILITY_WEIGHT: f64 = 0.5;
pub const PERFORMANCE_WEIGHT: f64 = 0.3;
pub const SECURITY_WEIGHT: f64 = 0.2;

const UPTIME_SHARE: f64 = 0.6;
const RESPONSE_SHARE: f64 = 0.4;
const RESPONSE_CEILING_MS: f64 = 5_000.0;

const SUCCESS_SHARE: f64 = 0.4;
const THROUGHPUT_SHARE: f64 = 0.3;
const LATENCY_SHARE: f64 = 0.3;
const THROUGHPUT_CEILING: f64 = 100.0;
const P95_CEILING_MS: f64 = 1_000.0;

/// Per-group contributions (each already weighted, on a 0-1 scale).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub availability: f64,
    pub performance: f64,
    pub security: f64,
}

impl ScoreBreakdown {
    pub fn of(metrics: &CheckerMetrics) -> Self {
        ScoreBreakdown {
            availability: availability_score(metrics),
            performance: performance_score(metrics),
            security: security_score(metrics),
        }
    }

    /// Final score on the 0-100 scale.
    pub fn total(&self) -> f64 {
        (self.availability + self.performance + self.security) * 100.0
    }
}

pub fn availability_score(metrics: &CheckerMetrics) -> f64 {
    let a = &metrics.availability;
    let uptime = a.uptime_pct / 100.0;
    let responsiveness = 1.0 - (a.avg_response_time_ms / RESPONSE_CEILING_MS).min(1.0);
    (uptime * UPTIME_SHARE + responsiveness * RESPONSE_SHARE) * AVAILABILITY_WEIGHT
}

pub fn performance_score(metrics: &CheckerMetrics) -> f64 {
    let p = &metrics.performance;
    let reliability = 1.0 - p.error_rate;
    let throughput = (p.throughput_per_sec / THROUGHPUT_CEILING).min(1.0);
    let latency = 1.0 - (p.latency.p95 / P95_CEILING_MS).min(1.0);
    (reliability * SUCCESS_SHARE + throughput * THROUGHPUT_SHARE + latency * LATENCY_SHARE) * PERFORMANCE_WEIGHT
}

pub fn security_score(metrics: &CheckerMetrics) -> f64 {
    if metrics.security.certificate_valid {
        SECURITY_WEIGHT
    } else {
        0.0
    }
}

/// Final reputation score in [0, 100].
pub fn final_score(metrics: &CheckerMetrics) -> f64 {
    ScoreBreakdown::of(metrics).total()
}
