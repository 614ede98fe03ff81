//! Database layer for reelsync

mod connection;
mod meta_repository;
mod migrations;
mod repository;

pub use connection::Database;
pub use meta_repository::{SqliteSyncMetaRepository, SyncMetaRepository};
pub use repository::{ApplyReport, SqliteWatchlistRepository, WatchlistRepository};
