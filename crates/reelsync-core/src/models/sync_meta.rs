//! Per-device sync bookkeeping

use serde::{Deserialize, Serialize};

/// Advisory metadata for this replica; never consulted for correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Vector-clock dimension key of this replica
    pub device_id: String,
    /// Last successful sync pass (Unix ms)
    pub last_sync: Option<i64>,
}
