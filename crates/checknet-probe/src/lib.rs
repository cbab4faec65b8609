pub mod aggregator;
pub mod directory;
pub mod prober;
pub mod status;

pub use aggregator::{percentile, reduce, CollectError, Collection, MetricsAggregator, MetricsCollector};
pub use directory::{DeviceDirectory, DirectoryError, HttpDeviceDirectory};
pub use prober::{HttpProber, Probe};
pub use status::{classify_message, ProbeError};
