//! Durable, incrementally-merged cache of normalized records: one Parquet
//! file plus one JSON sync-state sidecar per dataset.

mod cache_store;
mod error;
mod sync_state;

pub use cache_store::{CacheStore, MergeResult};
pub use error::StoreError;
pub use sync_state::{RunStatus, SyncState};
