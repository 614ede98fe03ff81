//! Watchlist repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::clock::VectorClock;
use crate::error::Result;
use crate::models::{
    record_id_for, ConflictWinner, RemoteRecord, SyncConflict, SyncStatus, WatchlistRecord,
};
use crate::reconcile::{merge_with_resolution, Resolution};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const RECORD_COLUMNS: &str = "id, item_id, title, image_ref, added_at, watched, notes, \
                              sync_status, vector_clock, last_modified, deleted";

/// Counts from absorbing one remote snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Remote records with no local counterpart
    pub inserted: usize,
    /// Local records replaced by the merge result
    pub updated: usize,
    /// Local records the merge left as they were
    pub unchanged: usize,
    /// Concurrent edits resolved by last-write-wins
    pub conflicts: usize,
}

/// Trait for watchlist storage operations
pub trait WatchlistRepository {
    /// All records that are not tombstoned
    fn get_all(&self) -> Result<Vec<WatchlistRecord>>;

    /// A record by id, tombstones included
    fn get_by_id(&self, id: &str) -> Result<Option<WatchlistRecord>>;

    /// Validate and upsert a record
    fn put(&self, record: &WatchlistRecord) -> Result<()>;

    /// Records waiting to be pushed
    fn get_pending(&self) -> Result<Vec<WatchlistRecord>>;

    /// Number of records waiting to be pushed
    fn pending_count(&self) -> Result<usize>;

    /// Flag the given records synced in one transaction; unknown ids are skipped
    fn mark_synced(&self, ids: &[String]) -> Result<usize>;

    /// Flag pushed versions synced, skipping records edited since the push
    fn confirm_pushed(&self, pushed: &[WatchlistRecord]) -> Result<usize>;

    /// Merge a remote snapshot in one transaction
    fn apply_remote_set(&self, remote: &[WatchlistRecord], now: i64) -> Result<ApplyReport>;

    /// Convert and merge a remote snapshot in one transaction.
    ///
    /// Missing remote timestamps are filled from the local copy. Entries
    /// that fail validation are skipped.
    fn apply_remote_records(&self, remote: &[RemoteRecord], now: i64) -> Result<ApplyReport>;

    /// Records (tombstones included) modified at or after `since`, oldest first
    fn get_modified_since(&self, since: i64) -> Result<Vec<WatchlistRecord>>;

    /// Synced tombstones last modified before `cutoff`
    fn list_expired_tombstones(&self, cutoff: i64) -> Result<Vec<WatchlistRecord>>;

    /// Physically remove records
    fn purge(&self, ids: &[String]) -> Result<usize>;

    /// Recently resolved conflicts, newest first
    fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;

    /// Drop conflict log rows resolved before `cutoff`
    fn prune_conflicts(&self, cutoff: i64) -> Result<usize>;
}

/// `SQLite` implementation of `WatchlistRepository`
pub struct SqliteWatchlistRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteWatchlistRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<WatchlistRecord> {
        let status: String = row.get(7)?;
        let sync_status = status
            .parse::<SyncStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

        let clock: String = row.get(8)?;
        let vector_clock = serde_json::from_str::<VectorClock>(&clock)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

        Ok(WatchlistRecord {
            id: row.get(0)?,
            item_id: row.get(1)?,
            title: row.get(2)?,
            image_ref: row.get(3)?,
            added_at: row.get(4)?,
            watched: row.get::<_, i32>(5)? != 0,
            notes: row.get(6)?,
            sync_status,
            vector_clock,
            last_modified: row.get(9)?,
            deleted: row.get::<_, i32>(10)? != 0,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<WatchlistRecord>> {
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM watchlist WHERE id = ?1"),
                params![id],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn write(conn: &Connection, record: &WatchlistRecord) -> Result<()> {
        let clock = serde_json::to_string(&record.vector_clock)?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO watchlist ({RECORD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                record.id,
                record.item_id,
                record.title,
                record.image_ref,
                record.added_at,
                i32::from(record.watched),
                record.notes,
                record.sync_status.as_str(),
                clock,
                record.last_modified,
                i32::from(record.deleted)
            ],
        )?;
        Ok(())
    }

    fn absorb(
        conn: &Connection,
        local: Option<WatchlistRecord>,
        incoming: &WatchlistRecord,
        now: i64,
        report: &mut ApplyReport,
    ) -> Result<()> {
        let Some(local) = local else {
            Self::write(conn, &incoming.clone().with_status(SyncStatus::Synced))?;
            report.inserted += 1;
            return Ok(());
        };

        let outcome = merge_with_resolution(&local, incoming);
        if let Some(winner) = outcome.resolution.conflict_winner() {
            tracing::info!(
                record_id = %local.id,
                winner = winner.as_str(),
                "Concurrent edit resolved by last-write-wins"
            );
            Self::log_conflict(conn, &local, incoming, winner, now)?;
            report.conflicts += 1;
        }

        if outcome.record == local {
            report.unchanged += 1;
        } else {
            Self::write(conn, &outcome.record)?;
            report.updated += 1;
        }

        if outcome.resolution == Resolution::RemoteDominates && !local.deleted && incoming.deleted {
            tracing::debug!(record_id = %local.id, "Remote tombstone superseded local record");
        }
        Ok(())
    }

    fn log_conflict(
        conn: &Connection,
        local: &WatchlistRecord,
        remote: &WatchlistRecord,
        winner: ConflictWinner,
        now: i64,
    ) -> Result<()> {
        // The same pair can be re-delivered by a live subscription; log it once
        conn.execute(
            "INSERT INTO sync_conflicts
                (record_id, local_modified, remote_modified, winner, resolved_at, strategy)
             SELECT ?1, ?2, ?3, ?4, ?5, 'lww'
             WHERE NOT EXISTS (
                 SELECT 1 FROM sync_conflicts
                 WHERE record_id = ?1 AND local_modified = ?2 AND remote_modified = ?3
             )",
            params![
                local.id,
                local.last_modified,
                remote.last_modified,
                winner.as_str(),
                now
            ],
        )?;
        Ok(())
    }

    fn query_records(
        &self,
        where_clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<WatchlistRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {RECORD_COLUMNS} FROM watchlist {where_clause}"))?;
        let records = stmt
            .query_map(params, Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl WatchlistRepository for SqliteWatchlistRepository<'_> {
    fn get_all(&self) -> Result<Vec<WatchlistRecord>> {
        self.query_records("WHERE deleted = 0 ORDER BY added_at DESC", [])
    }

    fn get_by_id(&self, id: &str) -> Result<Option<WatchlistRecord>> {
        Self::fetch(self.conn, id)
    }

    fn put(&self, record: &WatchlistRecord) -> Result<()> {
        record.validate()?;
        Self::write(self.conn, record)
    }

    fn get_pending(&self) -> Result<Vec<WatchlistRecord>> {
        self.query_records(
            "WHERE sync_status = ?1 ORDER BY last_modified ASC",
            params![SyncStatus::Pending.as_str()],
        )
    }

    fn pending_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM watchlist WHERE sync_status = ?1",
            params![SyncStatus::Pending.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn mark_synced(&self, ids: &[String]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE watchlist SET sync_status = ?1 WHERE id = ?2")?;
            for id in ids {
                updated += stmt.execute(params![SyncStatus::Synced.as_str(), id])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    fn confirm_pushed(&self, pushed: &[WatchlistRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE watchlist SET sync_status = ?1
                 WHERE id = ?2 AND sync_status = ?3 AND vector_clock = ?4 AND last_modified = ?5",
            )?;
            for record in pushed {
                let clock = serde_json::to_string(&record.vector_clock)?;
                updated += stmt.execute(params![
                    SyncStatus::Synced.as_str(),
                    record.id,
                    SyncStatus::Pending.as_str(),
                    clock,
                    record.last_modified
                ])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    fn apply_remote_set(&self, remote: &[WatchlistRecord], now: i64) -> Result<ApplyReport> {
        let tx = self.conn.unchecked_transaction()?;
        let mut report = ApplyReport::default();

        for incoming in remote {
            // Any error drops `tx` and rolls the whole snapshot back
            incoming.validate()?;
            let local = Self::fetch(&tx, &incoming.id)?;
            Self::absorb(&tx, local, incoming, now, &mut report)?;
        }

        tx.commit()?;
        Ok(report)
    }

    fn apply_remote_records(&self, remote: &[RemoteRecord], now: i64) -> Result<ApplyReport> {
        let tx = self.conn.unchecked_transaction()?;
        let mut report = ApplyReport::default();

        for entry in remote {
            let local = Self::fetch(&tx, &record_id_for(&entry.item_id))?;
            let incoming = entry.clone().into_record_over(local.as_ref(), now);
            if let Err(error) = incoming.validate() {
                tracing::warn!(
                    record_id = %incoming.id,
                    "Skipping malformed remote record: {error}"
                );
                continue;
            }
            Self::absorb(&tx, local, &incoming, now, &mut report)?;
        }

        tx.commit()?;
        Ok(report)
    }

    fn get_modified_since(&self, since: i64) -> Result<Vec<WatchlistRecord>> {
        self.query_records(
            "WHERE last_modified >= ?1 ORDER BY last_modified ASC",
            params![since],
        )
    }

    fn list_expired_tombstones(&self, cutoff: i64) -> Result<Vec<WatchlistRecord>> {
        self.query_records(
            "WHERE deleted = 1 AND sync_status = ?1 AND last_modified < ?2",
            params![SyncStatus::Synced.as_str(), cutoff],
        )
    }

    fn purge(&self, ids: &[String]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM watchlist WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, record_id, local_modified, remote_modified, winner, resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?1",
        )?;

        let conflicts = stmt
            .query_map(params![limit as i64], |row| {
                let winner: String = row.get(4)?;
                Ok(SyncConflict {
                    id: row.get(0)?,
                    record_id: row.get(1)?,
                    local_modified: row.get(2)?,
                    remote_modified: row.get(3)?,
                    winner: ConflictWinner::parse(&winner).unwrap_or(ConflictWinner::Remote),
                    resolved_at: row.get(5)?,
                    strategy: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn prune_conflicts(&self, cutoff: i64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM sync_conflicts WHERE resolved_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::{Error, ValidationError};
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn pending(item_id: &str, device: &str, now: i64) -> WatchlistRecord {
        WatchlistRecord::new(item_id, format!("Title {item_id}"), "img", now).restamped(device, now)
    }

    #[test]
    fn test_put_and_get() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        let record = pending("m1", "dev-a", 100);
        repo.put(&record).unwrap();

        let fetched = repo.get_by_id("watchlist-m1").unwrap().unwrap();
        assert_eq!(fetched, record);
        assert!(repo.get_by_id("watchlist-missing").unwrap().is_none());
    }

    #[test]
    fn test_put_rejects_invalid_record_without_persisting() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        let mut record = pending("m1", "dev-a", 100);
        record.title = String::new();

        let error = repo.put(&record).unwrap_err();
        assert!(matches!(
            error,
            Error::Validation(ValidationError::EmptyField("title"))
        ));
        assert!(repo.get_by_id("watchlist-m1").unwrap().is_none());
    }

    #[test]
    fn test_get_all_skips_tombstones() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        repo.put(&pending("m1", "dev-a", 100)).unwrap();
        let mut gone = pending("m2", "dev-a", 100);
        gone.deleted = true;
        repo.put(&gone).unwrap();

        let all = repo.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].item_id, "m1");
        assert!(repo.get_by_id("watchlist-m2").unwrap().unwrap().deleted);
    }

    #[test]
    fn test_pending_and_mark_synced() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        repo.put(&pending("m1", "dev-a", 100)).unwrap();
        repo.put(&pending("m2", "dev-a", 101)).unwrap();
        assert_eq!(repo.pending_count().unwrap(), 2);

        let updated = repo
            .mark_synced(&["watchlist-m1".to_string(), "watchlist-unknown".to_string()])
            .unwrap();
        assert_eq!(updated, 1);

        let still_pending = repo.get_pending().unwrap();
        assert_eq!(still_pending.len(), 1);
        assert_eq!(still_pending[0].id, "watchlist-m2");
        assert_eq!(
            repo.get_by_id("watchlist-m1").unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
    }

    #[test]
    fn test_apply_remote_set_inserts_synced() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        let remote = pending("m1", "dev-b", 100);
        let report = repo.apply_remote_set(&[remote.clone()], 500).unwrap();
        assert_eq!(report.inserted, 1);

        let all = repo.get_all().unwrap();
        assert_eq!(all, vec![remote.with_status(SyncStatus::Synced)]);
    }

    #[test]
    fn test_apply_remote_set_is_all_or_nothing() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        let good = pending("m1", "dev-b", 100);
        let mut bad = pending("m2", "dev-b", 100);
        bad.id = "watchlist-other".to_string();

        assert!(repo.apply_remote_set(&[good, bad], 500).is_err());
        assert!(repo.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_apply_remote_set_logs_lww_conflicts_once() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        let mut local = pending("m1", "dev-a", 100);
        local.watched = true;
        repo.put(&local).unwrap();

        let mut remote = WatchlistRecord::new("m1", "Title m1", "img", 100).restamped("dev-b", 200);
        remote.notes = Some("remote note".to_string());

        let report = repo.apply_remote_set(&[remote.clone()], 300).unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.updated, 1);
        repo.apply_remote_set(&[remote.clone()], 400).unwrap();

        let stored = repo.get_by_id("watchlist-m1").unwrap().unwrap();
        assert_eq!(stored, remote.with_status(SyncStatus::Synced));

        let conflicts = repo.list_conflicts(10).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].winner, ConflictWinner::Remote);
        assert_eq!(conflicts[0].local_modified, 100);
        assert_eq!(conflicts[0].remote_modified, 200);
        assert_eq!(conflicts[0].strategy, "lww");
    }

    #[test]
    fn test_unstamped_remote_entry_settles_after_first_pull() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        let unstamped = RemoteRecord {
            vector_clock: VectorClock::new().increment("dev-b"),
            ..serde_json::from_str::<RemoteRecord>(r#"{"itemId":"m1","title":"Heat"}"#).unwrap()
        };

        let first = repo.apply_remote_records(&[unstamped.clone()], 1_000).unwrap();
        assert_eq!(first.inserted, 1);

        for now in [2_000, 3_000, 4_000] {
            let report = repo.apply_remote_records(&[unstamped.clone()], now).unwrap();
            assert_eq!(report.conflicts, 0, "pull at {now}");
            assert_eq!(report.unchanged, 1, "pull at {now}");
        }

        let stored = repo.get_by_id("watchlist-m1").unwrap().unwrap();
        assert_eq!(stored.added_at, 1_000);
        assert_eq!(stored.last_modified, 1_000);
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert!(repo.list_conflicts(10).unwrap().is_empty());
    }

    #[test]
    fn test_apply_remote_records_skips_malformed_entries() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        let good = RemoteRecord::from(&pending("m1", "dev-b", 100));
        let blank: RemoteRecord = serde_json::from_str(r#"{"itemId":"  "}"#).unwrap();

        let report = repo.apply_remote_records(&[blank, good], 500).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(repo.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_prune_conflicts_keeps_recent_rows() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        for (item_id, resolved_at) in [("m1", 300), ("m2", 900)] {
            repo.put(&pending(item_id, "dev-a", 100)).unwrap();
            let remote = WatchlistRecord::new(item_id, "Remote", "img", 100).restamped("dev-b", 200);
            repo.apply_remote_set(&[remote], resolved_at).unwrap();
        }
        assert_eq!(repo.list_conflicts(10).unwrap().len(), 2);

        assert_eq!(repo.prune_conflicts(500).unwrap(), 1);
        let left = repo.list_conflicts(10).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].record_id, "watchlist-m2");
    }

    #[test]
    fn test_modified_since_and_tombstone_expiry() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        repo.put(&pending("m1", "dev-a", 100)).unwrap();
        let mut old_tombstone = pending("m2", "dev-a", 50).with_status(SyncStatus::Synced);
        old_tombstone.deleted = true;
        repo.put(&old_tombstone).unwrap();
        let mut unsynced_tombstone = pending("m3", "dev-a", 40);
        unsynced_tombstone.deleted = true;
        repo.put(&unsynced_tombstone).unwrap();

        let recent = repo.get_modified_since(60).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].item_id, "m1");

        let expired = repo.list_expired_tombstones(90).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "watchlist-m2");

        assert_eq!(repo.purge(&["watchlist-m2".to_string()]).unwrap(), 1);
        assert!(repo.get_by_id("watchlist-m2").unwrap().is_none());
    }

    #[test]
    fn test_confirm_pushed_skips_newer_local_versions() {
        let db = setup();
        let repo = SqliteWatchlistRepository::new(db.connection());

        let first = pending("m1", "dev-a", 100);
        let other = pending("m2", "dev-a", 100);
        repo.put(&first).unwrap();
        repo.put(&other).unwrap();

        // Edited again after the push was sent
        let mut edited = first.clone().restamped("dev-a", 150);
        edited.watched = true;
        repo.put(&edited).unwrap();

        assert_eq!(repo.confirm_pushed(&[first, other]).unwrap(), 1);
        assert_eq!(
            repo.get_by_id("watchlist-m1").unwrap().unwrap().sync_status,
            SyncStatus::Pending
        );
        assert_eq!(
            repo.get_by_id("watchlist-m2").unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
    }
}
