//! End-to-end replica scenarios against the in-memory remote authority.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use reelsync_core::{
    merge, BroadcastHub, ClockOrdering, DeviceIdentity, MemoryRemoteStore, RemoteRecord,
    SyncHandle, SyncScheduler, SyncSettings, SyncStatus, VectorClock, Watchlist,
    WatchlistRecord, WatchlistStore,
};
use tempfile::tempdir;

const OWNER: &str = "user-1";

fn device(name: &str) -> DeviceIdentity {
    DeviceIdentity::from_existing(name).unwrap()
}

/// Manual passes only; the debounce never fires inside a test.
fn manual_settings() -> SyncSettings {
    SyncSettings {
        debounce: Duration::from_secs(60),
        remote_timeout: Duration::from_millis(500),
        success_display: Duration::from_millis(50),
        ..SyncSettings::default()
    }
}

async fn local_replica(store: WatchlistStore, name: &str) -> Watchlist {
    let channel = BroadcastHub::default().channel("watchlist-sync", name);
    let sync = SyncHandle::detached(store.clone());
    Watchlist::open(store, device(name), channel, sync)
        .await
        .unwrap()
}

async fn synced_replica(remote: &MemoryRemoteStore, name: &str, online: bool) -> Watchlist {
    let store = WatchlistStore::open_in_memory().await.unwrap();
    let channel = BroadcastHub::default().channel("watchlist-sync", name);
    let sync = SyncScheduler::new(
        store.clone(),
        Arc::new(remote.clone()),
        device(name),
        channel.clone(),
        manual_settings(),
    )
    .online(online)
    .spawn();
    sync.authenticate(OWNER).await.unwrap();
    Watchlist::open(store, device(name), channel, sync)
        .await
        .unwrap()
}

fn record(clock: &[(&str, u64)], last_modified: i64, watched: bool) -> WatchlistRecord {
    let mut record = WatchlistRecord::new("movie-603", "The Matrix", "/matrix.jpg", 100);
    record.vector_clock = clock.iter().copied().collect();
    record.last_modified = last_modified;
    record.watched = watched;
    record
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn adding_twice_keeps_one_record() {
    let store = WatchlistStore::open_in_memory().await.unwrap();
    let watchlist = local_replica(store.clone(), "device-a").await;

    watchlist.add("movie-603", "The Matrix", "/matrix.jpg").await.unwrap();
    watchlist
        .add("movie-603", "The Matrix (4K)", "/matrix-4k.jpg")
        .await
        .unwrap();

    assert_eq!(watchlist.items().len(), 1);
    let stored = store.get_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "The Matrix (4K)");
    assert_eq!(stored[0].image_ref, "/matrix-4k.jpg");
    assert!(watchlist.is_in_watchlist("movie-603"));
}

#[tokio::test]
async fn successive_edits_are_causally_ordered() {
    let store = WatchlistStore::open_in_memory().await.unwrap();
    let watchlist = local_replica(store, "device-a").await;

    let added = watchlist.add("movie-603", "The Matrix", "").await.unwrap();
    let toggled = watchlist
        .toggle_watched(&added.id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        added.vector_clock.compare(&toggled.vector_clock),
        ClockOrdering::Before
    );
    assert_eq!(
        toggled.vector_clock.compare(&added.vector_clock),
        ClockOrdering::After
    );
    assert!(toggled.last_modified >= added.last_modified);
}

#[tokio::test]
async fn dominating_clock_wins_in_both_directions() {
    let older = record(&[("device-a", 1)], 500, false);
    let newer = record(&[("device-a", 2)], 100, true);

    let merged = merge(&older, &newer);
    assert!(merged.watched);
    assert_eq!(merged.sync_status, SyncStatus::Synced);

    let merged = merge(&newer, &older);
    assert!(merged.watched);
    assert_eq!(merged.sync_status, SyncStatus::Pending);
}

#[tokio::test]
async fn concurrent_edits_fall_back_to_last_modified() {
    let local = record(&[("device-a", 1)], 100, false);
    let remote = record(&[("device-b", 1)], 200, true);

    let merged = merge(&local, &remote);
    assert!(merged.watched);
    assert_eq!(merged.last_modified, 200);

    let merged = merge(&remote, &local);
    assert!(merged.watched);
    assert_eq!(merged.sync_status, SyncStatus::Pending);
}

#[tokio::test]
async fn removed_items_stay_tombstoned_across_restarts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("watchlist.db");

    {
        let store = WatchlistStore::open_path(&path).await.unwrap();
        let watchlist = local_replica(store, "device-a").await;
        watchlist.add("movie-603", "The Matrix", "").await.unwrap();
        assert!(watchlist.remove("movie-603").await.unwrap());
    }

    let store = WatchlistStore::open_path(&path).await.unwrap();
    let watchlist = local_replica(store.clone(), "device-a").await;

    assert!(!watchlist.is_in_watchlist("movie-603"));
    assert!(watchlist.items().is_empty());

    assert!(store.get_all().await.unwrap().is_empty());
    let id = reelsync_core::models::record_id_for("movie-603");
    let tombstone = store.get_by_id(&id).await.unwrap().unwrap();
    assert!(tombstone.deleted);
    assert_eq!(tombstone.sync_status, SyncStatus::Pending);
}

#[tokio::test]
async fn applied_remote_set_reads_back_as_synced() {
    let store = WatchlistStore::open_in_memory().await.unwrap();
    let incoming = vec![
        record(&[("device-b", 3)], 300, true),
        WatchlistRecord::new("movie-78", "Blade Runner", "", 200),
    ];

    let report = store.apply_remote_set(&incoming, 400).await.unwrap();
    assert_eq!(report.inserted, 2);

    let mut stored = store.get_all().await.unwrap();
    stored.sort_by(|a, b| a.item_id.cmp(&b.item_id));
    assert_eq!(stored.len(), 2);
    for (stored, incoming) in stored.iter().zip([&incoming[0], &incoming[1]]) {
        assert!(stored.same_content(incoming), "{stored:?} != {incoming:?}");
        assert_eq!(stored.sync_status, SyncStatus::Synced);
    }
    assert_eq!(store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn offline_add_reaches_remote_after_reconnect() {
    let remote = MemoryRemoteStore::new();
    let watchlist = synced_replica(&remote, "device-a", false).await;
    let store = watchlist.store().clone();

    watchlist.add("m1", "Title", "img").await.unwrap();
    assert!(watchlist.is_in_watchlist("m1"));
    let pending = store.get_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "watchlist-m1");
    assert!(remote.records(OWNER).is_empty());

    watchlist.sync().set_online(true);
    wait_for(|| remote.records(OWNER).len() == 1).await;

    // Queued behind the reconnect pass, so its confirmation has landed
    let report = watchlist.sync().sync_now().await.unwrap().unwrap();
    assert_eq!(report.pushed, 0);
    assert!(store.get_pending().await.unwrap().is_empty());
    let synced = store.get_by_id("watchlist-m1").await.unwrap().unwrap();
    assert_eq!(synced.sync_status, SyncStatus::Synced);
    assert_eq!(remote.records(OWNER)[0].item_id, "m1");

    watchlist.sync().shutdown().await;
}

#[tokio::test]
async fn concurrent_tabs_converge_on_the_later_edit() {
    let remote = MemoryRemoteStore::new();
    remote
        .seed(
            OWNER,
            RemoteRecord {
                item_id: "movie-603".to_string(),
                title: "The Matrix".to_string(),
                image_ref: String::new(),
                added_at: Some(1_000),
                watched: false,
                notes: None,
                vector_clock: VectorClock::new(),
                last_modified: Some(1_000),
                deleted: false,
            },
        )
        .unwrap();

    let tab_a = synced_replica(&remote, "device-a", true).await;
    let tab_b = synced_replica(&remote, "device-b", true).await;
    let id = reelsync_core::models::record_id_for("movie-603");
    assert!(tab_a.is_in_watchlist("movie-603"));
    assert!(tab_b.is_in_watchlist("movie-603"));

    tab_a.toggle_watched(&id).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    tab_b
        .update_notes(&id, "rewatch with friends")
        .await
        .unwrap()
        .unwrap();

    tab_a.sync().sync_now().await.unwrap();
    tab_b.sync().sync_now().await.unwrap();
    tab_a.sync().sync_now().await.unwrap();

    let a = tab_a.store().get_by_id(&id).await.unwrap().unwrap();
    let b = tab_b.store().get_by_id(&id).await.unwrap().unwrap();
    assert!(a.same_content(&b), "{a:?} != {b:?}");
    assert!(!a.watched, "earlier concurrent edit should be discarded");
    assert_eq!(a.notes.as_deref(), Some("rewatch with friends"));
    assert_eq!(a.sync_status, SyncStatus::Synced);
    assert_eq!(remote.records(OWNER)[0].notes, a.notes);

    let conflicts = tab_a.store().list_conflicts(10).await.unwrap();
    assert!(!conflicts.is_empty());

    tab_a.sync().shutdown().await;
    tab_b.sync().shutdown().await;
}
