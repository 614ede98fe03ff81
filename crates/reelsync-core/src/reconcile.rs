//! Record-level reconciliation between a local and a remote copy.
//!
//! Causal order decides first. Only when the vector clocks are concurrent
//! does `last_modified` break the tie, and the losing side's edit is
//! discarded whole. Personal watchlist flags tolerate that; nothing here
//! merges individual fields.
//!
//! The batch entry point that absorbs a full remote snapshot lives on the
//! store (`apply_remote_set`) so it can run inside one transaction.

use crate::clock::ClockOrdering;
use crate::models::{ConflictWinner, SyncStatus, WatchlistRecord};

/// How `merge` picked its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Remote clock strictly dominates
    RemoteDominates,
    /// Local clock strictly dominates
    LocalDominates,
    /// Same version on both sides
    Identical,
    /// Concurrent edit, local `last_modified` is newer or equal
    LocalWinsTiebreak,
    /// Concurrent edit, remote `last_modified` is newer
    RemoteWinsTiebreak,
}

impl Resolution {
    /// The surviving side when an edit was discarded.
    pub const fn conflict_winner(self) -> Option<ConflictWinner> {
        match self {
            Self::LocalWinsTiebreak => Some(ConflictWinner::Local),
            Self::RemoteWinsTiebreak => Some(ConflictWinner::Remote),
            Self::RemoteDominates | Self::LocalDominates | Self::Identical => None,
        }
    }

    pub const fn keeps_local(self) -> bool {
        matches!(self, Self::LocalDominates | Self::LocalWinsTiebreak)
    }
}

/// Merge result plus the rule that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub record: WatchlistRecord,
    pub resolution: Resolution,
}

/// Pick the record that becomes the new local truth.
///
/// A kept local copy is `pending` (it still has to reach the remote); a
/// kept remote copy is `synced`.
pub fn merge(local: &WatchlistRecord, remote: &WatchlistRecord) -> WatchlistRecord {
    merge_with_resolution(local, remote).record
}

pub fn merge_with_resolution(local: &WatchlistRecord, remote: &WatchlistRecord) -> MergeOutcome {
    let resolution = match local.vector_clock.compare(&remote.vector_clock) {
        ClockOrdering::Before => Resolution::RemoteDominates,
        ClockOrdering::After => Resolution::LocalDominates,
        ClockOrdering::Concurrent if local.same_content(remote) => Resolution::Identical,
        ClockOrdering::Concurrent if local.last_modified >= remote.last_modified => {
            Resolution::LocalWinsTiebreak
        }
        ClockOrdering::Concurrent => Resolution::RemoteWinsTiebreak,
    };

    let record = if resolution.keeps_local() {
        local.clone().with_status(SyncStatus::Pending)
    } else {
        remote.clone().with_status(SyncStatus::Synced)
    };

    tracing::debug!(record_id = %local.id, ?resolution, "Merged record");
    MergeOutcome { record, resolution }
}
