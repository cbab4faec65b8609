// METRICS AGGREGATOR
// Runs the prober N times per device and reduces the samples into CheckerMetrics.
//
// SAFETY INVARIANTS:
// 1. Samples are strictly sequential: sample i+1 never starts before sample i completes
// 2. The fixed inter-sample delay is only observed between samples, never after the last
// 3. uptime_pct == 100 * successful / total and error_rate == 1 - successful / total
// 4. Percentiles use the rank floor(n * q) over successful response times, 0 when none
// 5. throughput = successful / elapsed seconds of the whole pass, 0 when nothing elapsed

use crate::prober::Probe;
use async_trait::async_trait;
use checknet_core::{
    Agent, AvailabilityMetrics, CheckerMetrics, Device, LatencyPercentiles, PerformanceMetrics, ProbeSample,
    ProbeSettings, SecurityMetrics,
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reported until real certificate inspection exists.
pub const ASSUMED_TLS_VERSION: &str = "TLS 1.3";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectError {
    #[error("Collection cancelled after {completed} sample(s)")]
    Cancelled { completed: usize },
}

/// Outcome of one collection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub metrics: CheckerMetrics,
    pub samples: Vec<ProbeSample>,
    pub successful: usize,
}

impl Collection {
    /// At least one sample succeeded.
    pub fn has_evidence(&self) -> bool {
        self.successful > 0
    }
}

#[async_trait]
pub trait MetricsCollector: Send + Sync {
    async fn collect(
        &self,
        device: &Device,
        agent: &Agent,
        cancel: &CancellationToken,
    ) -> Result<Collection, CollectError>;
}

pub struct MetricsAggregator {
    probe: Arc<dyn Probe>,
    samples: usize,
    interval: Duration,
}

impl MetricsAggregator {
    pub fn new(probe: Arc<dyn Probe>, samples: usize, interval: Duration) -> Self {
        MetricsAggregator {
            probe,
            samples: samples.max(1),
            interval,
        }
    }

    pub fn from_settings(probe: Arc<dyn Probe>, settings: &ProbeSettings) -> Self {
        Self::new(probe, settings.samples, settings.sample_interval())
    }
}

#[async_trait]
impl MetricsCollector for MetricsAggregator {
    async fn collect(
        &self,
        device: &Device,
        agent: &Agent,
        cancel: &CancellationToken,
    ) -> Result<Collection, CollectError> {
        info!("Collecting {} samples for device {}", self.samples, device.id);
        let started = Instant::now();
        let mut samples = Vec::with_capacity(self.samples);

        for i in 0..self.samples {
            if i > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(CollectError::Cancelled { completed: samples.len() });
                    }
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            let sample = self.probe.probe(device, agent).await;
            debug!(
                "Sample {}/{} for device {}: success={} status={} {}ms",
                i + 1,
                self.samples,
                device.id,
                sample.success,
                sample.status_code,
                sample.response_time_ms
            );
            samples.push(sample);
        }

        let metrics = reduce(&samples, started.elapsed(), Utc::now());
        let successful = samples.iter().filter(|s| s.success).count();
        info!(
            "Device {}: {}/{} samples succeeded, uptime {:.1}%",
            device.id,
            successful,
            samples.len(),
            metrics.availability.uptime_pct
        );
        Ok(Collection {
            metrics,
            samples,
            successful,
        })
    }
}

/// Value at rank floor(n * q) of an ascending slice, 0 for an empty one.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (sorted.len() as f64 * q).floor() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Reduce samples gathered over `elapsed` into metrics stamped `collected_at`.
pub fn reduce(samples: &[ProbeSample], elapsed: Duration, collected_at: DateTime<Utc>) -> CheckerMetrics {
    let total = samples.len();
    let successes: Vec<&ProbeSample> = samples.iter().filter(|s| s.success).collect();
    let successful = successes.len();

    let mut times: Vec<f64> = successes.iter().map(|s| s.response_time_ms as f64).collect();
    times.sort_by(|a, b| a.total_cmp(b));

    let (avg, stddev) = if times.is_empty() {
        (0.0, 0.0)
    } else {
        let n = times.len() as f64;
        let mean = times.iter().sum::<f64>() / n;
        let variance = times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
        (mean, variance.sqrt())
    };

    let (uptime_pct, error_rate) = if total == 0 {
        (0.0, 1.0)
    } else {
        let ratio = successful as f64 / total as f64;
        (ratio * 100.0, (total - successful) as f64 / total as f64)
    };

    let seconds = elapsed.as_secs_f64();
    let throughput_per_sec = if seconds > 0.0 {
        successful as f64 / seconds
    } else {
        0.0
    };

    CheckerMetrics {
        availability: AvailabilityMetrics {
            uptime_pct,
            avg_response_time_ms: avg,
            consistency: stddev,
            last_seen: successes.last().map(|s| s.timestamp),
        },
        performance: PerformanceMetrics {
            throughput_per_sec,
            error_rate,
            latency: LatencyPercentiles {
                p50: percentile(&times, 0.5),
                p95: percentile(&times, 0.95),
                p99: percentile(&times, 0.99),
            },
        },
        security: SecurityMetrics {
            tls_version: ASSUMED_TLS_VERSION.to_string(),
            certificate_valid: true,
            last_updated: collected_at,
        },
    }
}
