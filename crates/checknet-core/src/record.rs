// CONSENSUS RECORDS
// Votes, rounds, proofs and the persisted reputation record.
//
// SAFETY INVARIANTS:
// 1. A vote signature covers {checkerId, deviceId, timestamp, metricsHash}
// 2. A proof signature covers {checkerId, timestamp, nonce, blockHeight, previousProofHash}
// 3. Votes, proofs and reputation records are immutable once created
// 4. Records encode deterministically (fixed field order), so hashing them is stable

use crate::digest::{canonical_json, hash_json, sha256_hex};
use crate::identity::{verify_signature, IdentityError};
use crate::metrics::{CheckResult, CheckerMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// One checker's signed metrics submission within a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub checker_id: String,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: CheckerMetrics,
    pub signature: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoteSigningPayload<'a> {
    checker_id: &'a str,
    device_id: &'a str,
    timestamp: &'a DateTime<Utc>,
    metrics_hash: String,
}

impl Vote {
    /// Bytes a checker signs when casting a vote.
    pub fn signing_message(
        checker_id: &str,
        device_id: &str,
        timestamp: &DateTime<Utc>,
        metrics: &CheckerMetrics,
    ) -> Result<Vec<u8>, RecordError> {
        let payload = VoteSigningPayload {
            checker_id,
            device_id,
            timestamp,
            metrics_hash: hash_json(metrics)?,
        };
        Ok(canonical_json(&payload)?)
    }

    /// Check the signature against the embedded checker id.
    pub fn verify(&self) -> Result<(), RecordError> {
        let message = Self::signing_message(&self.checker_id, &self.device_id, &self.timestamp, &self.metrics)?;
        verify_signature(&self.checker_id, &message, &self.signature)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Pending,
    Active,
    Complete,
    Failed,
}

/// Aggregate of votes for one device's check cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusRound {
    pub round_id: String,
    pub device_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Checker ids that contributed to this round
    pub participants: Vec<String>,
    pub votes: Vec<Vote>,
    pub status: RoundStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
}

impl ConsensusRound {
    /// Deterministic round id: sha256("{device}-{millis}-{checker}") without prefix.
    pub fn derive_id(device_id: &str, started: &DateTime<Utc>, checker_id: &str) -> String {
        let input = format!("{}-{}-{}", device_id, started.timestamp_millis(), checker_id);
        sha256_hex(input.as_bytes()).trim_start_matches("0x").to_string()
    }
}

/// Signed attestation binding a round to an external height and to the checker's prior proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    pub checker_id: String,
    pub timestamp: DateTime<Utc>,
    pub signature: String,
    pub nonce: String,
    pub block_height: u64,
    pub previous_proof_hash: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofSigningPayload<'a> {
    checker_id: &'a str,
    timestamp: &'a DateTime<Utc>,
    nonce: &'a str,
    block_height: u64,
    previous_proof_hash: &'a str,
}

impl Proof {
    pub fn signing_message(
        checker_id: &str,
        timestamp: &DateTime<Utc>,
        nonce: &str,
        block_height: u64,
        previous_proof_hash: &str,
    ) -> Result<Vec<u8>, RecordError> {
        let payload = ProofSigningPayload {
            checker_id,
            timestamp,
            nonce,
            block_height,
            previous_proof_hash,
        };
        Ok(canonical_json(&payload)?)
    }

    pub fn verify(&self) -> Result<(), RecordError> {
        let message = Self::signing_message(
            &self.checker_id,
            &self.timestamp,
            &self.nonce,
            self.block_height,
            &self.previous_proof_hash,
        )?;
        verify_signature(&self.checker_id, &message, &self.signature)?;
        Ok(())
    }

    /// Hash of the full proof (signature included); the next proof links to this.
    pub fn hash(&self) -> Result<String, RecordError> {
        Ok(hash_json(self)?)
    }
}

/// Where a reputation record lives in object storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDetails {
    pub bucket: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The persisted, immutable outcome of one completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardizedReputation {
    // Identification
    pub version: String,
    pub network_id: String,
    pub subnet_id: String,
    pub device_id: String,

    // Consensus data
    pub round: ConsensusRound,
    /// Number of checkers required for consensus
    pub quorum: u32,
    /// Required agreement fraction
    pub consensus_threshold: f64,

    // Verification
    pub proof: Proof,
    pub metrics: CheckerMetrics,

    // Historical data
    pub checks: Vec<CheckResult>,
    pub previous_reputation_hash: String,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub storage_protocol: String,
    pub storage_details: StorageDetails,
}

impl StandardizedReputation {
    /// Final score stamped on the completed round.
    pub fn score(&self) -> Option<f64> {
        self.round.final_score
    }
}
