//! Background synchronization between the local store and the remote authority.

mod scheduler;

use serde::Serialize;

pub use scheduler::{SyncHandle, SyncScheduler};

/// Outcome of one completed sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records in the pulled remote snapshot
    pub pulled: usize,
    /// Local records pushed and confirmed synced
    pub pushed: usize,
    /// Expired tombstones removed locally and remotely
    pub purged: usize,
    /// Concurrent edits resolved by last-write-wins during the pull
    pub conflicts: usize,
}
