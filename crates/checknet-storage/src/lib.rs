pub mod object_store;
pub mod reputation_store;

pub use object_store::{HttpObjectStore, MemoryObjectStore, ObjectStore, StorageError};
pub use reputation_store::{parse_key, ReputationStore, RetryPolicy};
