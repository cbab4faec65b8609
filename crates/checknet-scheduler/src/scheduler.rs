// BATCH SCHEDULER
// Drives the per-device pipeline across all devices, `batch_size` at a time.
//
// SAFETY INVARIANTS:
// 1. At most `batch_size` device checks are in flight
// 2. Batches are separated by `batch_interval`; the last batch is not followed by a wait
// 3. A failing or panicking device check never aborts its batch or the run
// 4. Once cancelled, no new batch starts; unlaunched devices are reported as cancelled
// 5. Reports come back in input order

use crate::pipeline::{Attestor, Pipeline};
use crate::summary::{DeviceOutcome, DeviceReport, RunSummary};
use crate::SchedulerError;
use checknet_core::{Device, SchedulerSettings, SkipReason};
use checknet_probe::{DeviceDirectory, MetricsCollector};
use checknet_storage::ReputationStore;
use futures::FutureExt;
use log::{error, info};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct BatchScheduler {
    pipeline: Arc<Pipeline>,
    batch_size: usize,
    batch_interval: Duration,
    run_deadline: Option<Duration>,
}

impl BatchScheduler {
    pub fn new(
        collector: Arc<dyn MetricsCollector>,
        attestor: Attestor,
        store: Arc<ReputationStore>,
        settings: &SchedulerSettings,
    ) -> Self {
        BatchScheduler {
            pipeline: Arc::new(Pipeline {
                collector,
                attestor,
                store,
            }),
            batch_size: settings.batch_size.max(1),
            batch_interval: settings.batch_interval(),
            run_deadline: settings.run_deadline(),
        }
    }

    /// Fetch the device list, then run. A directory failure is the only run-level error.
    pub async fn run_from_directory(
        &self,
        directory: &dyn DeviceDirectory,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SchedulerError> {
        let devices = directory.list_devices().await?;
        info!("Found {} registered devices to check", devices.len());
        Ok(self.run(devices, cancel).await)
    }

    pub async fn run(&self, devices: Vec<Device>, cancel: CancellationToken) -> RunSummary {
        let deadline = self.run_deadline.map(|after| {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                info!("Run deadline of {:?} reached, cancelling", after);
                token.cancel();
            })
        });

        let total = devices.len();
        let batches = total.div_ceil(self.batch_size);
        info!(
            "Starting run as checker {} over {} devices in {} batch(es)",
            self.pipeline.attestor.checker_id(),
            total,
            batches
        );

        let mut reports = Vec::with_capacity(total);
        let mut remaining = devices.into_iter();
        let mut index = 0;
        loop {
            let batch: Vec<Device> = remaining.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }

            if index > 0 && !cancel.is_cancelled() {
                info!("Waiting {:?} between batches", self.batch_interval);
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.batch_interval) => {}
                }
            }
            if cancel.is_cancelled() {
                info!("Run cancelled, {} device(s) not checked", batch.len() + remaining.len());
                reports.extend(
                    batch
                        .into_iter()
                        .chain(remaining.by_ref())
                        .map(|device| DeviceReport::new(device.id, DeviceOutcome::Skipped(SkipReason::Cancelled))),
                );
                break;
            }

            index += 1;
            info!("Processing batch {}/{} ({} devices)", index, batches, batch.len());
            reports.extend(self.run_batch(batch, &cancel).await);
        }

        if let Some(handle) = deadline {
            handle.abort();
        }

        let summary = RunSummary::from_reports(reports);
        info!(
            "Device check complete: {} checked, {} skipped, {} errors",
            summary.checked, summary.skipped, summary.errors
        );
        if let Some(avg) = summary.average_score {
            info!("Average network reputation score: {:.2}", avg);
        }
        summary
    }

    async fn run_batch(&self, batch: Vec<Device>, cancel: &CancellationToken) -> Vec<DeviceReport> {
        let ids: Vec<String> = batch.iter().map(|d| d.id.clone()).collect();
        let mut outcomes: Vec<Option<DeviceOutcome>> = vec![None; batch.len()];
        let mut tasks = JoinSet::new();

        for (slot, device) in batch.into_iter().enumerate() {
            let pipeline = self.pipeline.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(pipeline.check_device(&device, &cancel))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| DeviceOutcome::Failed("device check panicked".to_string()));
                (slot, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, outcome)) => outcomes[slot] = Some(outcome),
                Err(e) => error!("Device check task failed: {}", e),
            }
        }

        ids.into_iter()
            .zip(outcomes)
            .map(|(id, outcome)| {
                let outcome = outcome.unwrap_or_else(|| DeviceOutcome::Failed("device check did not complete".to_string()));
                DeviceReport::new(id, outcome)
            })
            .collect()
    }
}
