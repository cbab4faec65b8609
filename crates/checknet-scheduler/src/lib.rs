pub mod pipeline;
pub mod scheduler;
pub mod summary;

pub use pipeline::Attestor;
pub use scheduler::BatchScheduler;
pub use summary::{DeviceOutcome, DeviceReport, RunSummary};

use checknet_consensus::{ConsensusError, HeightError};
use checknet_probe::DirectoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Height(#[from] HeightError),
}
