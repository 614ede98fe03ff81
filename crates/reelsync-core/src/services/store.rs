//! Shared store service wrapper used by the façade and the sync scheduler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{Mutex, OnceCell};

use crate::db::{
    ApplyReport, Database, SqliteSyncMetaRepository, SqliteWatchlistRepository,
    SyncMetaRepository, WatchlistRepository,
};
use crate::models::{RemoteRecord, SyncConflict, SyncMetadata, WatchlistRecord};
use crate::{Error, Result};

#[derive(Debug, Clone)]
enum StoreLocation {
    Path(PathBuf),
    Memory,
}

struct StoreInner {
    location: StoreLocation,
    db: OnceCell<Mutex<Database>>,
}

/// Thread-safe handle to one replica's durable store.
///
/// Cloning is cheap and every clone shares the same connection. The
/// connection is opened on first use, so constructing the handle at the
/// composition root costs nothing.
#[derive(Clone)]
pub struct WatchlistStore {
    inner: Arc<StoreInner>,
}

impl WatchlistStore {
    /// Handle that opens the database at `db_path` on first use.
    pub fn lazy(db_path: impl Into<PathBuf>) -> Self {
        Self::with_location(StoreLocation::Path(db_path.into()))
    }

    /// Open (and migrate) the database at `db_path` immediately.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::lazy(db_path);
        store.database().await?;
        Ok(store)
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let store = Self::with_location(StoreLocation::Memory);
        store.database().await?;
        Ok(store)
    }

    fn with_location(location: StoreLocation) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                location,
                db: OnceCell::new(),
            }),
        }
    }

    /// Filesystem location, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        match &self.inner.location {
            StoreLocation::Path(path) => Some(path),
            StoreLocation::Memory => None,
        }
    }

    async fn database(&self) -> Result<&Mutex<Database>> {
        self.inner
            .db
            .get_or_try_init(|| async { Self::open_database(&self.inner.location).map(Mutex::new) })
            .await
    }

    fn open_database(location: &StoreLocation) -> Result<Database> {
        let path = match location {
            StoreLocation::Memory => return Database::open_in_memory(),
            StoreLocation::Path(path) => path,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Database::open(path) {
            Ok(db) => Ok(db),
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Watchlist store at {} is not a database: {error}. Quarantining and retrying once.",
                    path.display()
                );
                Self::quarantine_corrupted_db_files(path)?;
                Database::open(path).map_err(|error| Self::open_failed(path, &error))
            }
            Err(error) => Err(Self::open_failed(path, &error)),
        }
    }

    fn open_failed(path: &Path, error: &Error) -> Error {
        tracing::error!("Failed to open watchlist store at {}: {error}", path.display());
        Error::Storage(format!("failed to open {}: {error}", path.display()))
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    /// Move an unreadable database aside and drop its WAL/SHM sidecars.
    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        if db_path.exists() {
            let backup_name = format!("{base_name}.corrupt-{}", crate::util::now_ms());
            let backup_path = db_path.with_file_name(backup_name);
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted watchlist store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        for suffix in ["-wal", "-shm", "-journal"] {
            let sidecar = db_path.with_file_name(format!("{base_name}{suffix}"));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale store file {}", sidecar.display());
            }
        }

        Ok(())
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
        T: Send,
    {
        let db = self.database().await?;
        let guard = db.lock().await;
        f(guard.connection())
    }

    /// All non-deleted records.
    pub async fn get_all(&self) -> Result<Vec<WatchlistRecord>> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).get_all())
            .await
    }

    /// Fetch a record by id, tombstones included.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<WatchlistRecord>> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).get_by_id(id))
            .await
    }

    /// Validate and upsert a record.
    pub async fn put(&self, record: &WatchlistRecord) -> Result<()> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).put(record))
            .await
    }

    /// Records waiting to be pushed.
    pub async fn get_pending(&self) -> Result<Vec<WatchlistRecord>> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).get_pending())
            .await
    }

    /// Number of records waiting to be pushed.
    pub async fn pending_count(&self) -> Result<usize> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).pending_count())
            .await
    }

    /// Flag records synced in one transaction.
    pub async fn mark_synced(&self, ids: &[String]) -> Result<usize> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).mark_synced(ids))
            .await
    }

    /// Flag pushed versions synced unless they changed since.
    pub async fn confirm_pushed(&self, pushed: &[WatchlistRecord]) -> Result<usize> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).confirm_pushed(pushed))
            .await
    }

    /// Absorb a remote snapshot in one transaction.
    pub async fn apply_remote_set(
        &self,
        remote: &[WatchlistRecord],
        now: i64,
    ) -> Result<ApplyReport> {
        self.with_connection(|conn| {
            SqliteWatchlistRepository::new(conn).apply_remote_set(remote, now)
        })
        .await
    }

    /// Convert and absorb a fetched remote snapshot in one transaction.
    pub async fn apply_remote_records(
        &self,
        remote: &[RemoteRecord],
        now: i64,
    ) -> Result<ApplyReport> {
        self.with_connection(|conn| {
            SqliteWatchlistRepository::new(conn).apply_remote_records(remote, now)
        })
        .await
    }

    /// Records changed at or after `since`.
    pub async fn get_modified_since(&self, since: i64) -> Result<Vec<WatchlistRecord>> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).get_modified_since(since))
            .await
    }

    /// Synced tombstones older than `cutoff`.
    pub async fn list_expired_tombstones(&self, cutoff: i64) -> Result<Vec<WatchlistRecord>> {
        self.with_connection(|conn| {
            SqliteWatchlistRepository::new(conn).list_expired_tombstones(cutoff)
        })
        .await
    }

    /// Physically remove tombstones past retention.
    pub async fn purge_tombstones(&self, ids: &[String]) -> Result<usize> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).purge(ids))
            .await
    }

    /// List recently resolved sync conflicts.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).list_conflicts(limit))
            .await
    }

    /// Forget conflicts resolved before `cutoff`.
    pub async fn prune_conflicts(&self, cutoff: i64) -> Result<usize> {
        self.with_connection(|conn| SqliteWatchlistRepository::new(conn).prune_conflicts(cutoff))
            .await
    }

    /// Load this replica's sync metadata.
    pub async fn sync_metadata(&self) -> Result<Option<SyncMetadata>> {
        self.with_connection(|conn| SqliteSyncMetaRepository::new(conn).load())
            .await
    }

    /// Persist the device identity.
    pub async fn save_device_id(&self, device_id: &str) -> Result<()> {
        self.with_connection(|conn| SqliteSyncMetaRepository::new(conn).save_device_id(device_id))
            .await
    }

    /// Record a successful sync pass.
    pub async fn record_sync(&self, device_id: &str, at: i64) -> Result<()> {
        self.with_connection(|conn| SqliteSyncMetaRepository::new(conn).record_sync(device_id, at))
            .await
    }
}
