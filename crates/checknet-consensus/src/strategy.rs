// CONSENSUS STRATEGIES
// Reduce the votes of a round to one representative metrics set and score.
//
// SAFETY INVARIANTS:
// 1. Only votes whose signature verifies are considered
// 2. At most one vote per checker counts (the first one received)
// 3. Reduction is deterministic: same votes -> same metrics -> same score
//
// The round lifecycle never depends on which strategy is plugged in.

use crate::scoring::final_score;
use checknet_core::{
    AvailabilityMetrics, CheckerMetrics, ConsensusSettings, LatencyPercentiles, PerformanceMetrics,
    SecurityMetrics, StrategyKind, Vote,
};
use log::warn;
use std::collections::HashSet;
use std::sync::Arc;

pub trait ConsensusStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Representative metrics for the round, or `None` when the votes are insufficient.
    fn reduce_metrics(&self, votes: &[Vote]) -> Option<CheckerMetrics>;

    /// Consensus score of the votes, or `None` when no consensus can be formed.
    fn reduce(&self, votes: &[Vote]) -> Option<f64> {
        self.reduce_metrics(votes).map(|m| final_score(&m))
    }
}

/// Verified votes, first vote per checker wins.
pub fn valid_votes(votes: &[Vote]) -> Vec<&Vote> {
    let mut seen = HashSet::new();
    votes
        .iter()
        .filter(|vote| match vote.verify() {
            Ok(()) => true,
            Err(e) => {
                warn!("Ignoring vote from {} for {}: {}", vote.checker_id, vote.device_id, e);
                false
            }
        })
        .filter(|vote| seen.insert(vote.checker_id.as_str()))
        .collect()
}

/// Single-checker "consensus": the score is that checker's own score.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleCheckerStrategy;

impl ConsensusStrategy for SingleCheckerStrategy {
    fn name(&self) -> &'static str {
        "single"
    }

    fn reduce_metrics(&self, votes: &[Vote]) -> Option<CheckerMetrics> {
        valid_votes(votes).first().map(|vote| vote.metrics.clone())
    }
}

/// Per-field median across the valid votes of at least `min_checkers` checkers.
#[derive(Debug, Clone, Copy)]
pub struct MedianStrategy {
    pub min_checkers: usize,
}

impl MedianStrategy {
    pub fn new(min_checkers: usize) -> Self {
        MedianStrategy {
            min_checkers: min_checkers.max(1),
        }
    }
}

impl ConsensusStrategy for MedianStrategy {
    fn name(&self) -> &'static str {
        "median"
    }

    fn reduce_metrics(&self, votes: &[Vote]) -> Option<CheckerMetrics> {
        let valid = valid_votes(votes);
        if valid.is_empty() || valid.len() < self.min_checkers {
            return None;
        }
        let all: Vec<&CheckerMetrics> = valid.iter().map(|v| &v.metrics).collect();
        Some(median_metrics(&all))
    }
}

/// Build the strategy named in configuration.
pub fn strategy_from_settings(settings: &ConsensusSettings) -> Arc<dyn ConsensusStrategy> {
    match settings.strategy {
        StrategyKind::Single => Arc::new(SingleCheckerStrategy),
        StrategyKind::Median => Arc::new(MedianStrategy::new(settings.min_checkers)),
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn median_of(all: &[&CheckerMetrics], field: impl Fn(&CheckerMetrics) -> f64) -> f64 {
    median(all.iter().map(|m| field(m)).collect())
}

// `all` is non-empty.
fn median_metrics(all: &[&CheckerMetrics]) -> CheckerMetrics {
    let first = all[0];
    CheckerMetrics {
        availability: AvailabilityMetrics {
            uptime_pct: median_of(all, |m| m.availability.uptime_pct),
            avg_response_time_ms: median_of(all, |m| m.availability.avg_response_time_ms),
            consistency: median_of(all, |m| m.availability.consistency),
            last_seen: all.iter().filter_map(|m| m.availability.last_seen).max(),
        },
        performance: PerformanceMetrics {
            throughput_per_sec: median_of(all, |m| m.performance.throughput_per_sec),
            error_rate: median_of(all, |m| m.performance.error_rate),
            latency: LatencyPercentiles {
                p50: median_of(all, |m| m.performance.latency.p50),
                p95: median_of(all, |m| m.performance.latency.p95),
                p99: median_of(all, |m| m.performance.latency.p99),
            },
        },
        security: SecurityMetrics {
            tls_version: first.security.tls_version.clone(),
            certificate_valid: all.iter().all(|m| m.security.certificate_valid),
            last_updated: all
                .iter()
                .map(|m| m.security.last_updated)
                .max()
                .unwrap_or(first.security.last_updated),
        },
    }
}
