// Signing and encoding behaviour of votes, proofs and reputation records.

use checknet_core::{
    AvailabilityMetrics, CheckResult, CheckerIdentity, CheckerMetrics, ConsensusRound, LatencyPercentiles,
    PerformanceMetrics, ProbeSample, Proof, RoundStatus, SecurityMetrics, StandardizedReputation, StorageDetails,
    Vote, ZERO_HASH,
};
use chrono::{TimeZone, Utc};

fn metrics() -> CheckerMetrics {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    CheckerMetrics {
        availability: AvailabilityMetrics {
            uptime_pct: 80.0,
            avg_response_time_ms: 231.25,
            consistency: 12.5,
            last_seen: Some(at),
        },
        performance: PerformanceMetrics {
            throughput_per_sec: 0.8,
            error_rate: 0.2,
            latency: LatencyPercentiles { p50: 220.0, p95: 260.0, p99: 260.0 },
        },
        security: SecurityMetrics {
            tls_version: "TLS 1.3".to_string(),
            certificate_valid: true,
            last_updated: at,
        },
    }
}

fn signed_vote(identity: &CheckerIdentity, device_id: &str) -> Vote {
    let timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 5).unwrap();
    let metrics = metrics();
    let message = Vote::signing_message(identity.checker_id(), device_id, &timestamp, &metrics).unwrap();
    Vote {
        checker_id: identity.checker_id().to_string(),
        device_id: device_id.to_string(),
        timestamp,
        metrics,
        signature: identity.sign(&message),
    }
}

#[test]
fn test_vote_signature_verifies() {
    let identity = CheckerIdentity::from_seed([1u8; 32]);
    let vote = signed_vote(&identity, "0xdevice");
    assert!(vote.verify().is_ok());
}

#[test]
fn test_tampered_vote_fails_verification() {
    let identity = CheckerIdentity::from_seed([1u8; 32]);

    let mut vote = signed_vote(&identity, "0xdevice");
    vote.metrics.availability.uptime_pct = 100.0;
    assert!(vote.verify().is_err());

    let mut vote = signed_vote(&identity, "0xdevice");
    vote.device_id = "0xother".to_string();
    assert!(vote.verify().is_err());

    let mut vote = signed_vote(&identity, "0xdevice");
    vote.checker_id = CheckerIdentity::from_seed([2u8; 32]).checker_id().to_string();
    assert!(vote.verify().is_err());
}

#[test]
fn test_proof_signature_and_hash() {
    let identity = CheckerIdentity::from_seed([3u8; 32]);
    let timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).unwrap();
    let nonce = "0xabcdef";
    let message = Proof::signing_message(identity.checker_id(), &timestamp, nonce, 1_772_366_460, ZERO_HASH).unwrap();
    let proof = Proof {
        checker_id: identity.checker_id().to_string(),
        timestamp,
        signature: identity.sign(&message),
        nonce: nonce.to_string(),
        block_height: 1_772_366_460,
        previous_proof_hash: ZERO_HASH.to_string(),
    };
    assert!(proof.verify().is_ok());

    let hash = proof.hash().unwrap();
    assert_eq!(hash.len(), 66);
    assert_eq!(hash, proof.clone().hash().unwrap());

    let mut moved = proof.clone();
    moved.block_height += 1;
    assert!(moved.verify().is_err());
    assert_ne!(moved.hash().unwrap(), hash);
}

#[test]
fn test_round_id_is_deterministic() {
    let started = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let a = ConsensusRound::derive_id("0xdevice", &started, "0xchecker");
    let b = ConsensusRound::derive_id("0xdevice", &started, "0xchecker");
    let c = ConsensusRound::derive_id("0xother", &started, "0xchecker");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 64);
}

#[test]
fn test_reputation_record_round_trip() {
    let identity = CheckerIdentity::from_seed([4u8; 32]);
    let vote = signed_vote(&identity, "0xDevice");
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 9).unwrap();

    let mut failed = ProbeSample::failed(15_000, 701, "operation timed out");
    failed.timestamp = start;
    let mut ok = ProbeSample::succeeded(231, 200, true);
    ok.timestamp = end;

    let record = StandardizedReputation {
        version: "1.0.0".to_string(),
        network_id: "checker-network-mainnet".to_string(),
        subnet_id: "franky-device-checker".to_string(),
        device_id: "0xDevice".to_string(),
        round: ConsensusRound {
            round_id: ConsensusRound::derive_id("0xDevice", &start, identity.checker_id()),
            device_id: "0xDevice".to_string(),
            start_time: start,
            end_time: Some(end),
            participants: vec![identity.checker_id().to_string()],
            votes: vec![vote.clone()],
            status: RoundStatus::Complete,
            final_score: Some(84.123456789),
        },
        quorum: 1,
        consensus_threshold: 1.0,
        proof: Proof {
            checker_id: identity.checker_id().to_string(),
            timestamp: end,
            signature: "0x00".to_string(),
            nonce: "0x01".to_string(),
            block_height: 42,
            previous_proof_hash: ZERO_HASH.to_string(),
        },
        metrics: vote.metrics.clone(),
        checks: vec![CheckResult::from(&failed), CheckResult::from(&ok)],
        previous_reputation_hash: ZERO_HASH.to_string(),
        created_at: start,
        updated_at: end,
        storage_protocol: "filecoin".to_string(),
        storage_details: StorageDetails {
            bucket: "device-reputation".to_string(),
            path: "0xdevice-1772366409000.json".to_string(),
            url: None,
        },
    };

    let encoded = serde_json::to_string_pretty(&record).unwrap();
    let decoded: StandardizedReputation = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, record);
    assert_eq!(decoded.score(), Some(84.123456789));

    // A decoded vote still verifies: the encoding is lossless for signed content.
    assert!(decoded.round.votes[0].verify().is_ok());
}
