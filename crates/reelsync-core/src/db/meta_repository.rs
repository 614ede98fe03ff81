//! Sync metadata repository implementation

use crate::error::Result;
use crate::models::SyncMetadata;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for per-device sync bookkeeping
pub trait SyncMetaRepository {
    /// Load this replica's metadata row, if it has been created
    fn load(&self) -> Result<Option<SyncMetadata>>;

    /// Persist the device identity (no-op if already stored)
    fn save_device_id(&self, device_id: &str) -> Result<()>;

    /// Record a successful sync pass
    fn record_sync(&self, device_id: &str, at: i64) -> Result<()>;
}

/// `SQLite` implementation of `SyncMetaRepository`
pub struct SqliteSyncMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncMetaRepository for SqliteSyncMetaRepository<'_> {
    fn load(&self) -> Result<Option<SyncMetadata>> {
        let meta = self
            .conn
            .query_row(
                "SELECT device_id, last_sync FROM sync_meta ORDER BY rowid LIMIT 1",
                [],
                |row| {
                    Ok(SyncMetadata {
                        device_id: row.get(0)?,
                        last_sync: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    fn save_device_id(&self, device_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sync_meta (device_id, last_sync) VALUES (?1, NULL)",
            params![device_id],
        )?;
        Ok(())
    }

    fn record_sync(&self, device_id: &str, at: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_meta (device_id, last_sync) VALUES (?1, ?2)
             ON CONFLICT(device_id) DO UPDATE SET last_sync = excluded.last_sync",
            params![device_id, at],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_empty() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncMetaRepository::new(db.connection());
        assert!(repo.load().unwrap().is_none());
    }

    #[test]
    fn test_device_id_and_last_sync() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncMetaRepository::new(db.connection());

        repo.save_device_id("device-1").unwrap();
        repo.save_device_id("device-1").unwrap();
        repo.record_sync("device-1", 1234).unwrap();

        assert_eq!(
            repo.load().unwrap(),
            Some(SyncMetadata {
                device_id: "device-1".to_string(),
                last_sync: Some(1234),
            })
        );
    }
}
