use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] reelsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Item ID cannot be empty")]
    EmptyItemId,
    #[error("Title cannot be empty")]
    EmptyTitle,
    #[error("Not in watchlist: {0}")]
    NotInWatchlist(String),
    #[error("Could not resolve a data directory. Pass --db-path or set REELSYNC_DB_PATH.")]
    NoDataDir,
    #[error(
        "Remote sync is not configured. Set REELSYNC_REMOTE_URL and REELSYNC_OWNER, or drop --offline."
    )]
    SyncNotConfigured,
}
