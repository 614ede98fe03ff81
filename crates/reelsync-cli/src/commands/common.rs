use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use reelsync_core::{
    BroadcastChannel, DeviceIdentity, HttpRemoteStore, RemoteConfig, SyncConflict, SyncHandle,
    SyncReport, SyncScheduler, SyncSettings, Watchlist, WatchlistRecord, WatchlistStore,
};
use serde::Serialize;

use crate::error::CliError;

/// One CLI invocation's replica: local store, façade and (optionally) a
/// sync worker attached to the configured remote authority.
pub struct Session {
    pub watchlist: Watchlist,
    pub db_path: PathBuf,
    remote: Option<RemoteConfig>,
}

impl Session {
    /// Open the replica at `db_path`. With a remote that names an owner, a
    /// bootstrap pull runs first; a failing remote only logs a warning so
    /// local commands keep working offline.
    ///
    /// A CLI run has no sibling replicas to listen to, so its channel has no
    /// transport. Changes made by other processes are read from the store
    /// when the façade loads.
    pub async fn open(
        db_path: &Path,
        settings: SyncSettings,
        remote: Option<RemoteConfig>,
    ) -> Result<Self, CliError> {
        let store = WatchlistStore::open_path(db_path).await?;
        let mirror = DeviceIdentity::mirror_path_for(db_path);
        let device = DeviceIdentity::load_or_create(&store, Some(&mirror)).await?;
        let channel = BroadcastChannel::unavailable(device.as_str());
        tracing::debug!(topic = %settings.channel_name, "Broadcast disabled for this run");

        let remote = remote.filter(|config| {
            if config.owner_id.is_none() {
                tracing::warn!("REELSYNC_OWNER is not set; remote sync disabled");
            }
            config.owner_id.is_some()
        });

        let sync = match remote.as_ref() {
            Some(config) => {
                let http = HttpRemoteStore::new(config, settings.remote_timeout)?
                    .with_poll_interval(settings.poll_interval);
                SyncScheduler::new(
                    store.clone(),
                    Arc::new(http),
                    device.clone(),
                    channel.clone(),
                    settings,
                )
                .spawn()
            }
            None => SyncHandle::detached(store.clone()),
        };

        if let Some(owner_id) = remote.as_ref().and_then(|config| config.owner_id.clone()) {
            if let Err(error) = sync.authenticate(owner_id).await {
                tracing::warn!("Remote pull failed; using the local replica: {error}");
            }
        }

        let watchlist = Watchlist::open(store, device, channel, sync).await?;
        Ok(Self {
            watchlist,
            db_path: db_path.to_path_buf(),
            remote,
        })
    }

    pub const fn remote(&self) -> Option<&RemoteConfig> {
        self.remote.as_ref()
    }

    /// Run a sync pass now. Fails when no remote is attached.
    pub async fn sync_now(&self) -> Result<SyncReport, CliError> {
        if self.remote.is_none() {
            return Err(CliError::SyncNotConfigured);
        }
        self.watchlist
            .sync()
            .sync_now()
            .await?
            .ok_or(CliError::SyncNotConfigured)
    }

    /// Push local changes before exiting and stop the sync worker.
    pub async fn finish(self) {
        let sync = self.watchlist.sync();
        if self.remote.is_some() {
            match sync.sync_now().await {
                Ok(Some(report)) if report.pushed > 0 => {
                    tracing::info!(pushed = report.pushed, "Pushed local changes");
                }
                Ok(_) => {}
                Err(error) => tracing::warn!("Changes kept locally until the next sync: {error}"),
            }
        }
        sync.shutdown().await;
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub item_id: String,
    pub title: String,
    pub image_ref: String,
    pub watched: bool,
    pub notes: Option<String>,
    pub added_at: i64,
    pub last_modified: i64,
    pub relative_time: String,
    pub sync_status: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub record_id: String,
    pub local_modified: i64,
    pub remote_modified: i64,
    pub winner: String,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

pub fn record_to_list_item(record: &WatchlistRecord) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.id.clone(),
        item_id: record.item_id.clone(),
        title: record.title.clone(),
        image_ref: record.image_ref.clone(),
        watched: record.watched,
        notes: record.notes.clone(),
        added_at: record.added_at,
        last_modified: record.last_modified,
        relative_time: format_relative_time(record.added_at, now_ms),
        sync_status: record.sync_status.to_string(),
        deleted: record.deleted,
    }
}

pub fn format_record_lines(records: &[WatchlistRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let mark = if record.deleted {
                "-"
            } else if record.watched {
                "x"
            } else {
                " "
            };
            let title = truncate(&record.title, 40);
            let relative_time = format_relative_time(record.added_at, now_ms);

            let mut line = format!(
                "[{mark}] {:<14}  {title:<40}  {relative_time:<10}  {}",
                record.item_id, record.sync_status
            );
            if let Some(notes) = record.notes.as_deref() {
                line.push_str("  ");
                line.push_str(&truncate(notes, 30));
            }
            line
        })
        .collect()
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        record_id: conflict.record_id.clone(),
        local_modified: conflict.local_modified,
        remote_modified: conflict.remote_modified,
        winner: conflict.winner.as_str().to_string(),
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  {}  kept={} local={} remote={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.record_id,
                conflict.winner.as_str(),
                conflict.local_modified,
                conflict.remote_modified
            )
        })
        .collect()
}

/// Collapse whitespace and cut to `max_chars`, marking the cut with "...".
pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let kept = collapsed
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    format!("{kept}...")
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

/// Coarse age label such as "3h ago". Future timestamps read as "just now".
pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    const MINUTE: i64 = 60_000;
    const UNITS: [(i64, &str); 6] = [
        (365 * 24 * 60 * MINUTE, "y"),
        (30 * 24 * 60 * MINUTE, "mo"),
        (7 * 24 * 60 * MINUTE, "w"),
        (24 * 60 * MINUTE, "d"),
        (60 * MINUTE, "h"),
        (MINUTE, "m"),
    ];

    let age = now_ms.saturating_sub(timestamp_ms);
    UNITS
        .iter()
        .find(|(span, _)| age >= *span)
        .map_or_else(
            || "just now".to_string(),
            |(span, unit)| format!("{}{unit} ago", age / span),
        )
}

pub fn normalize_item_id(item_id: &str) -> Result<String, CliError> {
    let trimmed = item_id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyItemId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_title(parts: &[String]) -> Result<String, CliError> {
    let title = parts.join(" ");
    let trimmed = title.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyTitle)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    resolve_db_path_with(cli_db_path, env::var_os("REELSYNC_DB_PATH"), dirs::data_dir())
}

/// `--db-path`, then `REELSYNC_DB_PATH`, then the per-user data directory.
pub fn resolve_db_path_with(
    cli_db_path: Option<PathBuf>,
    env_db_path: Option<OsString>,
    data_dir: Option<PathBuf>,
) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path {
        return Ok(path);
    }
    if let Some(path) = env_db_path.filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    data_dir
        .map(|dir| dir.join("reelsync").join("watchlist.db"))
        .ok_or(CliError::NoDataDir)
}
