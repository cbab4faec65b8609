// PROBE SAMPLES & CHECKER METRICS
//
// INVARIANTS:
// 1. uptime_pct == successful / total * 100
// 2. error_rate == 1 - successful / total
// 3. Latency percentiles are taken over successful samples only (0 when none)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One measurement against a device. Lives only for one aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSample {
    pub success: bool,
    pub response_time_ms: u64,
    /// HTTP status on success, failure class code otherwise
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the served configuration matched the authoritative one
    pub character_verified: bool,
    /// When the sample completed
    pub timestamp: DateTime<Utc>,
}

impl ProbeSample {
    pub fn succeeded(response_time_ms: u64, status_code: u16, character_verified: bool) -> Self {
        ProbeSample {
            success: true,
            response_time_ms,
            status_code,
            error: None,
            character_verified,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(response_time_ms: u64, status_code: u16, error: impl Into<String>) -> Self {
        ProbeSample {
            success: false,
            response_time_ms,
            status_code,
            error: Some(error.into()),
            character_verified: false,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityMetrics {
    /// Percentage of successful samples (0-100)
    pub uptime_pct: f64,
    /// Mean response time of successful samples
    pub avg_response_time_ms: f64,
    /// Population standard deviation of successful response times
    pub consistency: f64,
    /// Completion time of the last successful sample
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Successful samples per second of wall-clock collection time
    pub throughput_per_sec: f64,
    /// Fraction of failed samples (0.0-1.0)
    pub error_rate: f64,
    pub latency: LatencyPercentiles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityMetrics {
    pub tls_version: String,
    pub certificate_valid: bool,
    pub last_updated: DateTime<Utc>,
}

/// Reduction of N probe samples for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerMetrics {
    pub availability: AvailabilityMetrics,
    pub performance: PerformanceMetrics,
    pub security: SecurityMetrics,
}

/// Audit-trail entry for one health check, as written into the reputation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// Response time in milliseconds
    pub duration: u64,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub character_verified: bool,
}

impl From<&ProbeSample> for CheckResult {
    fn from(sample: &ProbeSample) -> Self {
        CheckResult {
            success: sample.success,
            timestamp: sample.timestamp,
            duration: sample.response_time_ms,
            status_code: sample.status_code,
            error: sample.error.clone(),
            character_verified: sample.character_verified,
        }
    }
}
