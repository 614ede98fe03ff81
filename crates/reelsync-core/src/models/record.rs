//! Watchlist record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::clock::VectorClock;
use crate::error::ValidationError;

/// Prefix shared by every derived record id
pub const RECORD_ID_PREFIX: &str = "watchlist-";

/// Derive the record id for an item.
///
/// Replicas adding the same item independently converge on the same id.
///
/// ```
/// assert_eq!(reelsync_core::models::record_id_for("m1"), "watchlist-m1");
/// ```
pub fn record_id_for(item_id: &str) -> String {
    format!("{RECORD_ID_PREFIX}{item_id}")
}

/// Synchronization state of a local record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Matches the last confirmed remote snapshot
    Synced,
    /// Local changes not yet acknowledged by the remote authority
    #[default]
    Pending,
    /// Reserved for records flagged for manual attention
    Conflict,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "conflict" => Ok(Self::Conflict),
            other => Err(ValidationError::InvalidSyncStatus(other.to_string())),
        }
    }
}

/// A single saved watchlist item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistRecord {
    /// Derived from `item_id`, see [`record_id_for`]
    pub id: String,
    /// Catalog item identifier
    pub item_id: String,
    /// Display title
    pub title: String,
    /// Poster/image reference (may be empty)
    #[serde(default)]
    pub image_ref: String,
    /// Creation timestamp (Unix ms, local clock)
    pub added_at: i64,
    /// Whether the item has been watched
    #[serde(default)]
    pub watched: bool,
    /// Free-form notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Sync state
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Causality metadata
    #[serde(default)]
    pub vector_clock: VectorClock,
    /// Last modification (Unix ms), only used as a concurrent-edit tiebreak
    pub last_modified: i64,
    /// Tombstone flag
    #[serde(default)]
    pub deleted: bool,
}

impl WatchlistRecord {
    /// Create an unstamped pending record.
    pub fn new(
        item_id: impl Into<String>,
        title: impl Into<String>,
        image_ref: impl Into<String>,
        now: i64,
    ) -> Self {
        let item_id = item_id.into();
        Self {
            id: record_id_for(&item_id),
            item_id,
            title: title.into(),
            image_ref: image_ref.into(),
            added_at: now,
            watched: false,
            notes: None,
            sync_status: SyncStatus::Pending,
            vector_clock: VectorClock::new(),
            last_modified: now,
            deleted: false,
        }
    }

    /// Mark a local mutation: bump this device's clock, refresh
    /// `last_modified` and flag the record pending.
    #[must_use]
    pub fn restamped(mut self, device_id: &str, now: i64) -> Self {
        self.vector_clock = self.vector_clock.increment(device_id);
        self.last_modified = now;
        self.sync_status = SyncStatus::Pending;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }

    /// Whether the record belongs in the current watchlist view
    pub const fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Compare every replicated field, ignoring local `sync_status`.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.item_id == other.item_id
            && self.title == other.title
            && self.image_ref == other.image_ref
            && self.added_at == other.added_at
            && self.watched == other.watched
            && self.notes == other.notes
            && self.vector_clock.is_identical(&other.vector_clock)
            && self.last_modified == other.last_modified
            && self.deleted == other.deleted
    }

    /// Check schema invariants before the record crosses the store boundary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.item_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("itemId"));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyField("title"));
        }

        let expected = record_id_for(&self.item_id);
        if self.id != expected {
            return Err(ValidationError::IdMismatch {
                expected,
                actual: self.id.clone(),
            });
        }

        if self.added_at < 0 {
            return Err(ValidationError::NegativeTimestamp("addedAt"));
        }
        if self.last_modified < 0 {
            return Err(ValidationError::NegativeTimestamp("lastModified"));
        }

        Ok(())
    }
}
