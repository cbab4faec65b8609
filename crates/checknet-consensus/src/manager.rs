// CONSENSUS ROUND MANAGER
// Owns the lifecycle of one consensus round at a time.
//
//   (none) --start_round--> active --submit_vote/accept_vote*--> active --complete_round--> (none)
//                                  \--abort_round----------------------------------------> (none)
//
// SAFETY INVARIANTS:
// 1. At most one round is active per manager
// 2. complete_round and abort_round always clear the active round, even on error
// 3. Every admitted vote carries a verifying signature for the round's device
// 4. A proof links to the checker's previous proof hash (ZERO_HASH for the first)
// 5. complete_round is the only place a StandardizedReputation is built

use crate::proof_log::{ProofLog, ProofLogEntry, ProofLogError};
use crate::strategy::{strategy_from_settings, ConsensusStrategy};
use checknet_core::{
    CheckResult, CheckerIdentity, CheckerMetrics, ConsensusRound, ConsensusSettings, Proof, RecordError,
    RoundStatus, StandardizedReputation, StorageDetails, StorageSettings, Vote, ZERO_HASH,
};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Round already active for device {0}")]
    RoundAlreadyActive(String),

    #[error("No active round")]
    NoActiveRound,

    #[error("Vote for device {got} submitted to round for {expected}")]
    DeviceMismatch { expected: String, got: String },

    #[error("Checker {0} already voted in this round")]
    DuplicateVote(String),

    #[error("Rejected vote from {checker}: {source}")]
    InvalidVote {
        checker: String,
        #[source]
        source: RecordError,
    },

    #[error("Proof was issued by {0}, not by this checker")]
    ForeignProof(String),

    #[error("Round has no usable votes")]
    NoVotes,

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    ProofLog(#[from] ProofLogError),
}

/// Record-level constants stamped on every reputation record.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSettings {
    pub network_id: String,
    pub subnet_id: String,
    pub record_version: String,
    pub quorum: u32,
    pub consensus_threshold: f64,
    pub storage_protocol: String,
    pub bucket: String,
}

impl RoundSettings {
    pub fn from_config(consensus: &ConsensusSettings, storage: &StorageSettings) -> Self {
        RoundSettings {
            network_id: consensus.network_id.clone(),
            subnet_id: consensus.subnet_id.clone(),
            record_version: consensus.record_version.clone(),
            quorum: consensus.quorum,
            consensus_threshold: consensus.consensus_threshold,
            storage_protocol: storage.protocol.clone(),
            bucket: storage.bucket.clone(),
        }
    }
}

impl Default for RoundSettings {
    fn default() -> Self {
        Self::from_config(&ConsensusSettings::default(), &StorageSettings::default())
    }
}

struct ActiveRound {
    round: ConsensusRound,
    checks: Vec<CheckResult>,
}

pub struct ConsensusManager {
    identity: Arc<CheckerIdentity>,
    strategy: Arc<dyn ConsensusStrategy>,
    proof_log: Arc<dyn ProofLog>,
    settings: RoundSettings,
    active: Option<ActiveRound>,
}

impl ConsensusManager {
    pub fn new(
        identity: Arc<CheckerIdentity>,
        strategy: Arc<dyn ConsensusStrategy>,
        proof_log: Arc<dyn ProofLog>,
        settings: RoundSettings,
    ) -> Self {
        ConsensusManager {
            identity,
            strategy,
            proof_log,
            settings,
            active: None,
        }
    }

    /// Manager configured from the process configuration sections.
    pub fn from_settings(
        identity: Arc<CheckerIdentity>,
        proof_log: Arc<dyn ProofLog>,
        consensus: &ConsensusSettings,
        storage: &StorageSettings,
    ) -> Self {
        Self::new(
            identity,
            strategy_from_settings(consensus),
            proof_log,
            RoundSettings::from_config(consensus, storage),
        )
    }

    pub fn checker_id(&self) -> &str {
        self.identity.checker_id()
    }

    pub fn current_round(&self) -> Option<&ConsensusRound> {
        self.active.as_ref().map(|a| &a.round)
    }

    pub fn start_round(&mut self, device_id: &str) -> Result<&ConsensusRound, ConsensusError> {
        if let Some(active) = &self.active {
            return Err(ConsensusError::RoundAlreadyActive(active.round.device_id.clone()));
        }

        let start_time = Utc::now();
        let checker_id = self.identity.checker_id().to_string();
        let round = ConsensusRound {
            round_id: ConsensusRound::derive_id(device_id, &start_time, &checker_id),
            device_id: device_id.to_string(),
            start_time,
            end_time: None,
            participants: vec![checker_id],
            votes: Vec::new(),
            status: RoundStatus::Active,
            final_score: None,
        };
        info!("Started consensus round {} for device {}", round.round_id, device_id);

        let active = self.active.insert(ActiveRound {
            round,
            checks: Vec::new(),
        });
        Ok(&active.round)
    }

    /// Sign `metrics` as this checker's vote and add it to the active round.
    pub fn submit_vote(&mut self, metrics: CheckerMetrics, device_id: &str) -> Result<Vote, ConsensusError> {
        let active = self.active.as_mut().ok_or(ConsensusError::NoActiveRound)?;
        let checker_id = self.identity.checker_id();
        check_admissible(&active.round, checker_id, device_id)?;

        let timestamp = Utc::now();
        let message = Vote::signing_message(checker_id, device_id, &timestamp, &metrics)?;
        let vote = Vote {
            checker_id: checker_id.to_string(),
            device_id: device_id.to_string(),
            timestamp,
            metrics,
            signature: self.identity.sign(&message),
        };

        active.round.votes.push(vote.clone());
        debug!("Checker {} voted in round {}", checker_id, active.round.round_id);
        Ok(vote)
    }

    /// Admit another checker's signed vote into the active round.
    pub fn accept_vote(&mut self, vote: Vote) -> Result<(), ConsensusError> {
        let active = self.active.as_mut().ok_or(ConsensusError::NoActiveRound)?;
        check_admissible(&active.round, &vote.checker_id, &vote.device_id)?;
        vote.verify().map_err(|source| ConsensusError::InvalidVote {
            checker: vote.checker_id.clone(),
            source,
        })?;

        if !active.round.participants.contains(&vote.checker_id) {
            active.round.participants.push(vote.checker_id.clone());
        }
        info!("Accepted vote from {} in round {}", vote.checker_id, active.round.round_id);
        active.round.votes.push(vote);
        Ok(())
    }

    /// Attach the health-check audit trail to the active round.
    pub fn record_checks(&mut self, checks: Vec<CheckResult>) -> Result<(), ConsensusError> {
        let active = self.active.as_mut().ok_or(ConsensusError::NoActiveRound)?;
        active.checks.extend(checks);
        Ok(())
    }

    /// Consensus score of the active round; `Ok(None)` when no consensus can be formed.
    pub fn calculate_consensus(&self) -> Result<Option<f64>, ConsensusError> {
        let active = self.active.as_ref().ok_or(ConsensusError::NoActiveRound)?;
        if active.round.votes.is_empty() {
            return Ok(None);
        }
        let score = self.strategy.reduce(&active.round.votes);
        match score {
            Some(score) => debug!(
                "Consensus ({}) for round {}: {:.2}",
                self.strategy.name(),
                active.round.round_id,
                score
            ),
            None => warn!(
                "No consensus ({}) for round {} with {} vote(s)",
                self.strategy.name(),
                active.round.round_id,
                active.round.votes.len()
            ),
        }
        Ok(score)
    }

    /// Signed proof over the active round, chained to this checker's previous proof.
    pub fn generate_proof(&self, block_height: u64) -> Result<Proof, ConsensusError> {
        if self.active.is_none() {
            return Err(ConsensusError::NoActiveRound);
        }
        let checker_id = self.identity.checker_id();
        let previous_proof_hash = self
            .proof_log
            .last_proof_hash(checker_id)?
            .unwrap_or_else(|| ZERO_HASH.to_string());
        let nonce = format!("0x{}", hex::encode(rand::random::<[u8; 32]>()));
        let timestamp = Utc::now();

        let message = Proof::signing_message(checker_id, &timestamp, &nonce, block_height, &previous_proof_hash)?;
        Ok(Proof {
            checker_id: checker_id.to_string(),
            timestamp,
            signature: self.identity.sign(&message),
            nonce,
            block_height,
            previous_proof_hash,
        })
    }

    /// Close the active round and build its reputation record.
    pub fn complete_round(&mut self, final_score: f64, proof: Proof) -> Result<StandardizedReputation, ConsensusError> {
        let ActiveRound { mut round, checks } = self.active.take().ok_or(ConsensusError::NoActiveRound)?;

        if proof.checker_id != self.identity.checker_id() {
            return Err(ConsensusError::ForeignProof(proof.checker_id));
        }
        let metrics = self
            .strategy
            .reduce_metrics(&round.votes)
            .or_else(|| round.votes.first().map(|v| v.metrics.clone()))
            .ok_or(ConsensusError::NoVotes)?;

        let end_time = Utc::now();
        round.end_time = Some(end_time);
        round.status = RoundStatus::Complete;
        round.final_score = Some(final_score);

        self.proof_log.append(ProofLogEntry {
            checker_id: proof.checker_id.clone(),
            proof_hash: proof.hash()?,
            block_height: proof.block_height,
            timestamp: proof.timestamp,
        })?;

        info!(
            "Completed round {} for device {} with score {:.2}",
            round.round_id, round.device_id, final_score
        );

        Ok(StandardizedReputation {
            version: self.settings.record_version.clone(),
            network_id: self.settings.network_id.clone(),
            subnet_id: self.settings.subnet_id.clone(),
            device_id: round.device_id.clone(),
            quorum: self.settings.quorum,
            consensus_threshold: self.settings.consensus_threshold,
            previous_reputation_hash: proof.previous_proof_hash.clone(),
            proof,
            metrics,
            checks,
            created_at: round.start_time,
            updated_at: end_time,
            storage_protocol: self.settings.storage_protocol.clone(),
            storage_details: StorageDetails {
                bucket: self.settings.bucket.clone(),
                path: String::new(),
                url: None,
            },
            round,
        })
    }

    /// Mark the active round failed and discard it.
    pub fn abort_round(&mut self, reason: &str) -> Option<ConsensusRound> {
        let mut active = self.active.take()?;
        active.round.status = RoundStatus::Failed;
        active.round.end_time = Some(Utc::now());
        warn!(
            "Aborted round {} for device {}: {}",
            active.round.round_id, active.round.device_id, reason
        );
        Some(active.round)
    }
}

fn check_admissible(round: &ConsensusRound, checker_id: &str, device_id: &str) -> Result<(), ConsensusError> {
    if round.device_id != device_id {
        return Err(ConsensusError::DeviceMismatch {
            expected: round.device_id.clone(),
            got: device_id.to_string(),
        });
    }
    if round.votes.iter().any(|v| v.checker_id == checker_id) {
        return Err(ConsensusError::DuplicateVote(checker_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof_log::MemoryProofLog;
    use crate::strategy::SingleCheckerStrategy;

    fn manager() -> ConsensusManager {
        ConsensusManager::new(
            Arc::new(CheckerIdentity::from_seed([5u8; 32])),
            Arc::new(SingleCheckerStrategy),
            Arc::new(MemoryProofLog::new()),
            RoundSettings::default(),
        )
    }

    #[test]
    fn test_start_round_rejects_second_round() {
        let mut m = manager();
        m.start_round("0xa").unwrap();
        assert!(matches!(m.start_round("0xb"), Err(ConsensusError::RoundAlreadyActive(d)) if d == "0xa"));
    }

    #[test]
    fn test_operations_require_active_round() {
        let mut m = manager();
        assert!(matches!(m.calculate_consensus(), Err(ConsensusError::NoActiveRound)));
        assert!(matches!(m.generate_proof(1), Err(ConsensusError::NoActiveRound)));
        assert!(matches!(m.record_checks(Vec::new()), Err(ConsensusError::NoActiveRound)));
        assert!(m.abort_round("nothing to abort").is_none());
    }

    #[test]
    fn test_first_proof_links_to_zero_hash() {
        let mut m = manager();
        m.start_round("0xa").unwrap();
        let proof = m.generate_proof(100).unwrap();
        assert_eq!(proof.previous_proof_hash, ZERO_HASH);
        assert_eq!(proof.block_height, 100);
        assert_eq!(proof.nonce.len(), 66);
        assert!(proof.verify().is_ok());
    }

    #[test]
    fn test_abort_clears_round() {
        let mut m = manager();
        m.start_round("0xa").unwrap();
        let aborted = m.abort_round("no evidence").unwrap();
        assert_eq!(aborted.status, RoundStatus::Failed);
        assert!(m.current_round().is_none());
        assert!(m.start_round("0xa").is_ok());
    }
}
