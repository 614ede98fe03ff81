//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Apply a batch of statements atomically and record the version
fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // Dropping the transaction without commit rolls back
    let tx = conn.unchecked_transaction()?;

    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: records, secondary indexes, device identity
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS watchlist (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                image_ref TEXT NOT NULL DEFAULT '',
                added_at INTEGER NOT NULL,
                watched INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                sync_status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (sync_status IN ('synced', 'pending', 'conflict')),
                vector_clock TEXT NOT NULL DEFAULT '{}',
                last_modified INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE INDEX IF NOT EXISTS idx_watchlist_sync_status ON watchlist(sync_status)",
            "CREATE INDEX IF NOT EXISTS idx_watchlist_modified ON watchlist(last_modified)",
            "CREATE TABLE IF NOT EXISTS sync_meta (
                device_id TEXT PRIMARY KEY,
                last_sync INTEGER
            )",
        ],
    )
}

/// Migration to version 2: LWW conflict logging
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        CURRENT_VERSION,
        &[
            "CREATE TABLE IF NOT EXISTS sync_conflicts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id TEXT NOT NULL,
                local_modified INTEGER NOT NULL,
                remote_modified INTEGER NOT NULL,
                winner TEXT NOT NULL CHECK (winner IN ('local', 'remote')),
                resolved_at INTEGER NOT NULL,
                strategy TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record_id ON sync_conflicts(record_id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
        ],
    )
}
