// PER-DEVICE PIPELINE
//   checkable? -> start round -> collect N samples -> vote -> consensus
//   -> [attestation gate: height -> proof -> complete round] -> persist
//
// SAFETY INVARIANTS:
// 1. A non-checkable device is skipped before any probe is issued
// 2. No evidence (zero successful samples) or no consensus never reaches storage
// 3. A check cancelled before attestation never touches the proof chain; an attested
//    record is always persisted so every logged proof has a stored record
// 4. Proof generation and round completion are serialized across all checks sharing
//    one checker identity, so the proof chain stays linear
// 5. Every round that does not complete is aborted; none is left dangling

use crate::summary::DeviceOutcome;
use crate::SchedulerError;
use checknet_consensus::{BlockHeightSource, ConsensusManager, ConsensusStrategy, ProofLog, RoundSettings};
use checknet_core::{Agent, CheckResult, CheckerIdentity, Device, SkipReason};
use checknet_probe::{CollectError, MetricsCollector};
use checknet_storage::ReputationStore;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Everything a device check needs to open, attest and close rounds as this checker.
pub struct Attestor {
    identity: Arc<CheckerIdentity>,
    strategy: Arc<dyn ConsensusStrategy>,
    proof_log: Arc<dyn ProofLog>,
    settings: RoundSettings,
    heights: Arc<dyn BlockHeightSource>,
    gate: Mutex<()>,
}

impl Attestor {
    pub fn new(
        identity: Arc<CheckerIdentity>,
        strategy: Arc<dyn ConsensusStrategy>,
        proof_log: Arc<dyn ProofLog>,
        settings: RoundSettings,
        heights: Arc<dyn BlockHeightSource>,
    ) -> Self {
        Attestor {
            identity,
            strategy,
            proof_log,
            settings,
            heights,
            gate: Mutex::new(()),
        }
    }

    pub fn checker_id(&self) -> &str {
        self.identity.checker_id()
    }

    /// Fresh manager for one device check.
    fn manager(&self) -> ConsensusManager {
        ConsensusManager::new(
            self.identity.clone(),
            self.strategy.clone(),
            self.proof_log.clone(),
            self.settings.clone(),
        )
    }
}

pub(crate) struct Pipeline {
    pub(crate) collector: Arc<dyn MetricsCollector>,
    pub(crate) attestor: Attestor,
    pub(crate) store: Arc<ReputationStore>,
}

impl Pipeline {
    pub(crate) async fn check_device(&self, device: &Device, cancel: &CancellationToken) -> DeviceOutcome {
        info!("Checking device {}", device.id);
        let agent = match device.checkable() {
            Ok((_, agent)) => agent,
            Err(reason) => {
                info!("Skipping device {}: {}", device.id, reason);
                return DeviceOutcome::Skipped(reason);
            }
        };

        let mut manager = self.attestor.manager();
        let outcome = match self.run_round(&mut manager, device, agent, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Error checking device {}: {}", device.id, e);
                DeviceOutcome::Failed(e.to_string())
            }
        };

        if manager.current_round().is_some() {
            let reason = match &outcome {
                DeviceOutcome::Skipped(reason) => reason.to_string(),
                DeviceOutcome::Failed(message) => message.clone(),
                DeviceOutcome::Checked { .. } => "round left open".to_string(),
            };
            manager.abort_round(&reason);
        }
        outcome
    }

    async fn run_round(
        &self,
        manager: &mut ConsensusManager,
        device: &Device,
        agent: &Agent,
        cancel: &CancellationToken,
    ) -> Result<DeviceOutcome, SchedulerError> {
        manager.start_round(&device.id)?;

        let collection = match self.collector.collect(device, agent, cancel).await {
            Ok(collection) => collection,
            Err(CollectError::Cancelled { completed }) => {
                warn!("Check of device {} cancelled after {} sample(s)", device.id, completed);
                return Ok(DeviceOutcome::Skipped(SkipReason::Cancelled));
            }
        };
        manager.record_checks(collection.samples.iter().map(CheckResult::from).collect())?;

        if !collection.has_evidence() {
            info!("All health checks failed for device {}, skipping consensus and storage", device.id);
            return Ok(DeviceOutcome::Skipped(SkipReason::NoEvidence));
        }

        info!("Submitting vote for device {}", device.id);
        manager.submit_vote(collection.metrics, &device.id)?;

        let score = match manager.calculate_consensus()? {
            Some(score) => score,
            None => {
                info!("No consensus reached for device {}", device.id);
                return Ok(DeviceOutcome::Skipped(SkipReason::NoConsensus));
            }
        };

        let record = {
            let _gate = self.attestor.gate.lock().await;
            let height = self.attestor.heights.current_height().await?;
            if cancel.is_cancelled() {
                warn!("Run cancelled before device {} was attested", device.id);
                return Ok(DeviceOutcome::Skipped(SkipReason::Cancelled));
            }
            let proof = manager.generate_proof(height)?;
            manager.complete_round(score, proof)?
        };

        let persisted = match self.store.persist(&device.id, record).await {
            Ok(details) => Some(details),
            Err(e) => {
                error!("Error storing reputation data for device {}: {}", device.id, e);
                None
            }
        };
        info!("Device {} check completed with reputation score {:.2}", device.id, score);
        Ok(DeviceOutcome::Checked { score, persisted })
    }
}
