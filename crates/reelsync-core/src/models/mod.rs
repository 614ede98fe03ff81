//! Data models for reelsync

mod record;
mod remote;
mod sync_conflict;
mod sync_meta;

pub use record::{record_id_for, SyncStatus, WatchlistRecord, RECORD_ID_PREFIX};
pub use remote::RemoteRecord;
pub use sync_conflict::{ConflictWinner, SyncConflict};
pub use sync_meta::SyncMetadata;
