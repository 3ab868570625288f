//! Store counters and point-in-time snapshots.

pub(crate) mod counters;
pub mod snapshot;

pub use snapshot::{CacheMetricsSnapshot, ListLens};
