// External ordering reference for proofs.

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeightError {
    #[error("Block height unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BlockHeightSource: Send + Sync {
    async fn current_height(&self) -> Result<u64, HeightError>;
}

/// Unix seconds as the height. Stands in until a chain reader is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClockHeight;

#[async_trait]
impl BlockHeightSource for WallClockHeight {
    async fn current_height(&self) -> Result<u64, HeightError> {
        u64::try_from(Utc::now().timestamp())
            .map_err(|_| HeightError::Unavailable("system clock is before the unix epoch".to_string()))
    }
}
