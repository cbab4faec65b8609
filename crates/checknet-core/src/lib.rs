pub mod config;
pub mod device;
pub mod digest;
pub mod identity;
pub mod metrics;
pub mod record;

pub use config::{
    CheckerConfig, ConfigError, ConsensusSettings, DirectorySettings, IdentitySettings, ProbeSettings,
    SchedulerSettings, StorageSettings, StrategyKind, VerificationPolicy,
};
pub use device::{Agent, ConfigReference, Device, SkipReason};
pub use digest::{canonical_json, hash_json, sha256_hex, ZERO_HASH};
pub use identity::{verify_signature, CheckerIdentity, IdentityError};
pub use metrics::{
    AvailabilityMetrics, CheckResult, CheckerMetrics, LatencyPercentiles, PerformanceMetrics, ProbeSample,
    SecurityMetrics,
};
pub use record::{ConsensusRound, Proof, RecordError, RoundStatus, StandardizedReputation, StorageDetails, Vote};
