pub mod height;
pub mod manager;
pub mod proof_log;
pub mod scoring;
pub mod strategy;

pub use height::{BlockHeightSource, HeightError, WallClockHeight};
pub use manager::{ConsensusError, ConsensusManager, RoundSettings};
pub use proof_log::{JsonlProofLog, MemoryProofLog, ProofLog, ProofLogEntry, ProofLogError};
pub use scoring::{final_score, ScoreBreakdown, AVAILABILITY_WEIGHT, PERFORMANCE_WEIGHT, SECURITY_WEIGHT};
pub use strategy::{strategy_from_settings, valid_votes, ConsensusStrategy, MedianStrategy, SingleCheckerStrategy};
