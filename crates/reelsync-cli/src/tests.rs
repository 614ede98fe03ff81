use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pretty_assertions::assert_eq;
use reelsync_core::models::record_id_for;
use reelsync_core::{RemoteConfig, SyncSettings, SyncStatus, WatchlistRecord};
use tempfile::tempdir;

use crate::commands::add::run_add;
use crate::commands::common::{
    format_record_lines, format_relative_time, format_sync_timestamp, normalize_item_id,
    normalize_title, record_to_list_item, resolve_db_path_with, truncate, Session,
};
use crate::commands::edit::{run_notes, run_toggle_watched};
use crate::commands::remove::run_remove;
use crate::commands::status::collect_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

async fn local_session(db_path: &Path) -> Session {
    Session::open(db_path, SyncSettings::default(), None)
        .await
        .unwrap()
}

#[test]
fn normalize_item_id_trims_and_rejects_empty() {
    assert_eq!(normalize_item_id("  movie-603 ").unwrap(), "movie-603");
    assert!(matches!(
        normalize_item_id(" \t "),
        Err(CliError::EmptyItemId)
    ));
}

#[test]
fn normalize_title_joins_words() {
    assert_eq!(
        normalize_title(&words("The   Matrix Reloaded")).unwrap(),
        "The Matrix Reloaded"
    );
    assert!(matches!(normalize_title(&[]), Err(CliError::EmptyTitle)));
}

#[test]
fn db_path_prefers_flag_then_env_then_data_dir() {
    let flag = Some(PathBuf::from("/tmp/flag.db"));
    let env = Some(OsString::from("/tmp/env.db"));
    let data = Some(PathBuf::from("/home/me/.local/share"));

    assert_eq!(
        resolve_db_path_with(flag, env.clone(), data.clone()).unwrap(),
        PathBuf::from("/tmp/flag.db")
    );
    assert_eq!(
        resolve_db_path_with(None, env, data.clone()).unwrap(),
        PathBuf::from("/tmp/env.db")
    );
    assert_eq!(
        resolve_db_path_with(None, Some(OsString::new()), data).unwrap(),
        PathBuf::from("/home/me/.local/share/reelsync/watchlist.db")
    );
    assert!(matches!(
        resolve_db_path_with(None, None, None),
        Err(CliError::NoDataDir)
    ));
}

#[test]
fn relative_time_buckets() {
    let now = 1_000_000_000_000;
    assert_eq!(format_relative_time(now - 5_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
    assert_eq!(format_relative_time(now + 60_000, now), "just now");
}

#[test]
fn truncate_collapses_whitespace_and_marks_cut() {
    assert_eq!(truncate("The   Matrix", 40), "The Matrix");
    assert_eq!(truncate("abcdefghij", 8), "abcde...");
}

#[test]
fn sync_timestamp_formats_utc() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn record_lines_mark_watched_and_removed() {
    let mut watched = WatchlistRecord::new("movie-603", "The Matrix", "", 0);
    watched.watched = true;
    watched.notes = Some("rewatch".to_string());
    let mut removed = WatchlistRecord::new("movie-78", "Blade Runner", "", 0);
    removed.deleted = true;

    let lines = format_record_lines(&[watched.clone(), removed]);
    assert!(lines[0].starts_with("[x] movie-603"));
    assert!(lines[0].ends_with("rewatch"));
    assert!(lines[0].contains("pending"));
    assert!(lines[1].starts_with("[-] movie-78"));

    let item = record_to_list_item(&watched);
    assert_eq!(item.id, record_id_for("movie-603"));
    assert_eq!(item.sync_status, SyncStatus::Pending.to_string());
}

#[tokio::test]
async fn local_session_runs_every_edit_command() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("watchlist.db");
    let session = local_session(&db_path).await;

    run_add(&session, "movie-603", &words("The Matrix"), "/matrix.jpg")
        .await
        .unwrap();
    run_toggle_watched(&session, "movie-603").await.unwrap();
    run_notes(&session, "movie-603", &words("with friends"))
        .await
        .unwrap();

    let record = session
        .watchlist
        .get(&record_id_for("movie-603"))
        .unwrap();
    assert!(record.watched);
    assert_eq!(record.notes.as_deref(), Some("with friends"));

    run_notes(&session, "movie-603", &[]).await.unwrap();
    assert_eq!(
        session
            .watchlist
            .get(&record_id_for("movie-603"))
            .unwrap()
            .notes,
        None
    );

    run_remove(&session, "movie-603").await.unwrap();
    assert!(session.watchlist.items().is_empty());
    assert!(matches!(
        run_remove(&session, "movie-603").await,
        Err(CliError::NotInWatchlist(_))
    ));
    assert!(matches!(
        run_toggle_watched(&session, "movie-404").await,
        Err(CliError::NotInWatchlist(_))
    ));

    session.finish().await;
}

#[tokio::test]
async fn device_identity_survives_sessions() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("watchlist.db");

    let first = local_session(&db_path).await;
    let device = first.watchlist.device().clone();
    first.finish().await;

    let second = local_session(&db_path).await;
    assert_eq!(second.watchlist.device(), &device);
    assert!(db_path.with_file_name("watchlist.db.device").exists());
    second.finish().await;
}

#[tokio::test]
async fn session_reads_other_processes_changes_from_the_store() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("watchlist.db");

    let first = local_session(&db_path).await;
    assert!(!first.watchlist.channel().is_available());
    first.watchlist.add("m1", "Heat", "").await.unwrap();
    first.finish().await;

    let second = local_session(&db_path).await;
    assert!(second.watchlist.is_in_watchlist("m1"));
    second.finish().await;
}

#[tokio::test]
async fn sync_without_remote_is_reported() {
    let dir = tempdir().unwrap();
    let session = local_session(&dir.path().join("watchlist.db")).await;

    assert!(matches!(
        run_sync(&session).await,
        Err(CliError::SyncNotConfigured)
    ));

    let status = collect_status(&session).await.unwrap();
    assert_eq!(status.remote_url, None);
    assert_eq!(status.sync_state, "idle");
    assert_eq!(status.last_sync, None);
    session.finish().await;
}

#[tokio::test]
async fn unreachable_remote_keeps_writes_local() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("watchlist.db");
    let settings = SyncSettings {
        remote_timeout: Duration::from_secs(2),
        ..SyncSettings::default()
    };
    let remote = RemoteConfig::new("http://127.0.0.1:9")
        .unwrap()
        .with_owner("user-1");

    let session = Session::open(&db_path, settings, Some(remote))
        .await
        .unwrap();
    run_add(&session, "movie-603", &words("The Matrix"), "")
        .await
        .unwrap();

    let status = collect_status(&session).await.unwrap();
    assert_eq!(status.pending, 1);
    assert_eq!(status.owner_id.as_deref(), Some("user-1"));
    assert!(run_sync(&session).await.is_err());
    session.finish().await;

    let reopened = local_session(&db_path).await;
    assert!(reopened.watchlist.is_in_watchlist("movie-603"));
    assert_eq!(reopened.watchlist.pending_count().await.unwrap(), 1);
    reopened.finish().await;
}
