// Per-device outcomes and the run summary built from them.

use checknet_core::{SkipReason, StorageDetails};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOutcome {
    /// Scored; `persisted` is `None` when the storage write failed
    Checked {
        score: f64,
        persisted: Option<StorageDetails>,
    },
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceReport {
    pub device_id: String,
    pub outcome: DeviceOutcome,
}

impl DeviceReport {
    pub fn new(device_id: impl Into<String>, outcome: DeviceOutcome) -> Self {
        DeviceReport {
            device_id: device_id.into(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub checked: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Checked devices whose record could not be written
    pub persist_failures: usize,
    /// Mean score over checked devices
    pub average_score: Option<f64>,
    pub reports: Vec<DeviceReport>,
}

impl RunSummary {
    pub fn from_reports(reports: Vec<DeviceReport>) -> Self {
        let mut checked = 0;
        let mut skipped = 0;
        let mut errors = 0;
        let mut persist_failures = 0;
        let mut score_sum = 0.0;

        for report in &reports {
            match &report.outcome {
                DeviceOutcome::Checked { score, persisted } => {
                    checked += 1;
                    score_sum += score;
                    if persisted.is_none() {
                        persist_failures += 1;
                    }
                }
                DeviceOutcome::Skipped(_) => skipped += 1,
                DeviceOutcome::Failed(_) => errors += 1,
            }
        }

        RunSummary {
            total: reports.len(),
            checked,
            skipped,
            errors,
            persist_failures,
            average_score: (checked > 0).then(|| score_sum / checked as f64),
            reports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary::from_reports(vec![
            DeviceReport::new(
                "a",
                DeviceOutcome::Checked {
                    score: 80.0,
                    persisted: None,
                },
            ),
            DeviceReport::new(
                "b",
                DeviceOutcome::Checked {
                    score: 90.0,
                    persisted: Some(StorageDetails {
                        bucket: "b".to_string(),
                        path: "b-1.json".to_string(),
                        url: None,
                    }),
                },
            ),
            DeviceReport::new("c", DeviceOutcome::Skipped(SkipReason::NoAgents)),
            DeviceReport::new("d", DeviceOutcome::Failed("boom".to_string())),
        ]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.persist_failures, 1);
        assert_eq!(summary.average_score, Some(85.0));
    }

    #[test]
    fn test_empty_run_has_no_average() {
        let summary = RunSummary::from_reports(Vec::new());
        assert_eq!(summary.total, 0);
        assert_eq!(summary.average_score, None);
    }
}
