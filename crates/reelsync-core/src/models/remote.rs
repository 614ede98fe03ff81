//! Remote authority record shape

use serde::{Deserialize, Serialize};

use super::record::{record_id_for, SyncStatus, WatchlistRecord};
use crate::clock::VectorClock;

const UNTITLED: &str = "Untitled";

/// A watchlist entry as stored by the remote authority.
///
/// Keyed by `item_id`; the local id is re-derived on the way in. The
/// authority assigns `added_at`/`last_modified` when the client did not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub item_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub added_at: Option<i64>,
    #[serde(default)]
    pub watched: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub vector_clock: VectorClock,
    #[serde(default)]
    pub last_modified: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
}

impl RemoteRecord {
    /// Fill in any server-side gaps and convert to a local `synced` record.
    pub fn into_record(self, server_now: i64) -> WatchlistRecord {
        self.into_record_over(None, server_now)
    }

    /// Like [`into_record`](Self::into_record), but missing timestamps are
    /// taken from the local copy first so an unstamped entry reads the same
    /// on every pull.
    pub fn into_record_over(
        self,
        local: Option<&WatchlistRecord>,
        server_now: i64,
    ) -> WatchlistRecord {
        let added_at = self
            .added_at
            .or_else(|| local.map(|local| local.added_at))
            .unwrap_or(server_now);
        let last_modified = self
            .last_modified
            .or_else(|| local.map(|local| local.last_modified))
            .unwrap_or(added_at);
        let title = if self.title.trim().is_empty() {
            UNTITLED.to_string()
        } else {
            self.title
        };

        WatchlistRecord {
            id: record_id_for(&self.item_id),
            item_id: self.item_id,
            title,
            image_ref: self.image_ref,
            added_at,
            watched: self.watched,
            notes: self.notes,
            sync_status: SyncStatus::Synced,
            vector_clock: self.vector_clock,
            last_modified,
            deleted: self.deleted,
        }
    }
}

impl From<&WatchlistRecord> for RemoteRecord {
    fn from(record: &WatchlistRecord) -> Self {
        Self {
            item_id: record.item_id.clone(),
            title: record.title.clone(),
            image_ref: record.image_ref.clone(),
            added_at: Some(record.added_at),
            watched: record.watched,
            notes: record.notes.clone(),
            vector_clock: record.vector_clock.clone(),
            last_modified: Some(record.last_modified),
            deleted: record.deleted,
        }
    }
}
