//! Public watchlist operations for one replica.
//!
//! Every mutation follows the same two-phase shape: compute the next record
//! from the durable copy, show it in the in-memory view, commit it to the
//! store, then announce it and ask for a sync. A failed commit puts the view
//! back the way it was and the error is returned to the caller. Remote
//! failures never reach these methods; they only show up in the sync state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::broadcast::{BroadcastChannel, ChangeEvent, Subscription};
use crate::identity::DeviceIdentity;
use crate::models::{record_id_for, WatchlistRecord};
use crate::services::WatchlistStore;
use crate::sync::SyncHandle;
use crate::util::{normalize_text_option, now_ms};
use crate::Result;

type View = BTreeMap<String, WatchlistRecord>;

struct Inner {
    store: WatchlistStore,
    device: DeviceIdentity,
    channel: BroadcastChannel,
    sync: SyncHandle,
    view: RwLock<View>,
    /// Serializes mutations so same-record edits apply in call order
    op_lock: tokio::sync::Mutex<()>,
    last_error: Mutex<Option<String>>,
}

/// One replica's watchlist.
#[derive(Clone)]
pub struct Watchlist {
    inner: Arc<Inner>,
}

impl Watchlist {
    /// Wire the façade and load the current view from the store.
    pub async fn open(
        store: WatchlistStore,
        device: DeviceIdentity,
        channel: BroadcastChannel,
        sync: SyncHandle,
    ) -> Result<Self> {
        let watchlist = Self {
            inner: Arc::new(Inner {
                store,
                device,
                channel,
                sync,
                view: RwLock::new(View::new()),
                op_lock: tokio::sync::Mutex::new(()),
                last_error: Mutex::new(None),
            }),
        };
        watchlist.refresh().await?;
        Ok(watchlist)
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.inner.device
    }

    pub fn sync(&self) -> &SyncHandle {
        &self.inner.sync
    }

    pub fn store(&self) -> &WatchlistStore {
        &self.inner.store
    }

    pub fn channel(&self) -> &BroadcastChannel {
        &self.inner.channel
    }

    /// Add an item, or overwrite it if already present.
    ///
    /// Re-adding resets `watched` and `notes` and continues the existing
    /// vector clock, so a re-add after a removal supersedes the tombstone.
    pub async fn add(
        &self,
        item_id: &str,
        title: &str,
        image_ref: &str,
    ) -> Result<WatchlistRecord> {
        let _guard = self.inner.op_lock.lock().await;
        let now = now_ms();

        let existing = self
            .tracked(self.inner.store.get_by_id(&record_id_for(item_id)).await)?;
        let was_live = existing.as_ref().is_some_and(WatchlistRecord::is_live);
        let base = match existing {
            Some(previous) => WatchlistRecord {
                title: title.to_string(),
                image_ref: image_ref.to_string(),
                added_at: now,
                watched: false,
                notes: None,
                deleted: false,
                ..previous
            },
            None => WatchlistRecord::new(item_id, title, image_ref, now),
        };
        let next = base.restamped(self.inner.device.as_str(), now);
        self.tracked(next.validate().map_err(Into::into))?;

        self.commit(&next).await?;
        let event = if was_live {
            ChangeEvent::Update {
                record: next.clone(),
            }
        } else {
            ChangeEvent::Add {
                record: next.clone(),
            }
        };
        self.announce(event);
        Ok(next)
    }

    /// Tombstone an item. `Ok(false)` when it is not in the watchlist.
    pub async fn remove(&self, item_id: &str) -> Result<bool> {
        let _guard = self.inner.op_lock.lock().await;

        let existing = self
            .tracked(self.inner.store.get_by_id(&record_id_for(item_id)).await)?;
        let Some(existing) = existing.filter(WatchlistRecord::is_live) else {
            return Ok(false);
        };

        let mut next = existing.restamped(self.inner.device.as_str(), now_ms());
        next.deleted = true;

        self.commit(&next).await?;
        self.announce(ChangeEvent::Remove { record: next });
        Ok(true)
    }

    /// Flip `watched` on the record with `id`. `Ok(None)` when absent.
    pub async fn toggle_watched(&self, id: &str) -> Result<Option<WatchlistRecord>> {
        self.edit(id, |record| record.watched = !record.watched)
            .await
    }

    /// Replace the notes on the record with `id`; blank text clears them.
    pub async fn update_notes(
        &self,
        id: &str,
        text: impl Into<String>,
    ) -> Result<Option<WatchlistRecord>> {
        let notes = normalize_text_option(Some(text.into()));
        self.edit(id, move |record| record.notes = notes).await
    }

    async fn edit(
        &self,
        id: &str,
        change: impl FnOnce(&mut WatchlistRecord),
    ) -> Result<Option<WatchlistRecord>> {
        let _guard = self.inner.op_lock.lock().await;

        let existing = self.tracked(self.inner.store.get_by_id(id).await)?;
        let Some(existing) = existing.filter(WatchlistRecord::is_live) else {
            return Ok(None);
        };

        let mut next = existing.restamped(self.inner.device.as_str(), now_ms());
        change(&mut next);

        self.commit(&next).await?;
        self.announce(ChangeEvent::Update {
            record: next.clone(),
        });
        Ok(Some(next))
    }

    /// Apply `next` to the view, persist it, and undo the view on failure.
    async fn commit(&self, next: &WatchlistRecord) -> Result<()> {
        let previous = self.write_view(|view| {
            if next.is_live() {
                view.insert(next.id.clone(), next.clone())
            } else {
                view.remove(&next.id)
            }
        });

        if let Err(error) = self.inner.store.put(next).await {
            tracing::warn!(record_id = %next.id, "Rolling back optimistic update: {error}");
            self.write_view(|view| match previous {
                Some(previous) => view.insert(next.id.clone(), previous),
                None => view.remove(&next.id),
            });
            return Err(self.record_error(error));
        }

        self.clear_error();
        Ok(())
    }

    fn announce(&self, event: ChangeEvent) {
        self.inner.channel.publish(event);
        self.inner.sync.request_sync();
    }

    /// Whether `item_id` is in the current (non-deleted) view.
    pub fn is_in_watchlist(&self, item_id: &str) -> bool {
        self.read_view(|view| view.contains_key(&record_id_for(item_id)))
    }

    /// Current items, newest first.
    pub fn items(&self) -> Vec<WatchlistRecord> {
        let mut items = self.read_view(|view| view.values().cloned().collect::<Vec<_>>());
        items.sort_by(|a, b| b.added_at.cmp(&a.added_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    pub fn get(&self, id: &str) -> Option<WatchlistRecord> {
        self.read_view(|view| view.get(id).cloned())
    }

    /// Reload the view from the store.
    pub async fn refresh(&self) -> Result<()> {
        let records = self.tracked(self.inner.store.get_all().await)?;
        self.write_view(|view| {
            *view = records
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect();
        });
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.inner.store.pending_count().await
    }

    /// Message of the last failed operation, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Keep the view current with other replicas and with sync results.
    ///
    /// Refreshes on every broadcast from another replica and whenever the
    /// scheduler changes the store. Drop the handle to stop.
    pub fn watch_replicas(&self) -> Subscription {
        let from_replicas = {
            let watchlist = self.clone();
            self.inner.channel.subscribe(move |event| {
                let watchlist = watchlist.clone();
                async move {
                    tracing::debug!(?event, "Change from another replica");
                    if let Err(error) = watchlist.refresh().await {
                        tracing::warn!("Failed to refresh after replica change: {error}");
                    }
                }
            })
        };

        let mut revision = self.inner.sync.watch_revision();
        let watchlist = self.clone();
        let from_sync = Subscription::from_task(tokio::spawn(async move {
            while revision.changed().await.is_ok() {
                if let Err(error) = watchlist.refresh().await {
                    tracing::warn!("Failed to refresh after sync: {error}");
                }
            }
        }));

        from_replicas.join(from_sync)
    }

    fn read_view<T>(&self, read: impl FnOnce(&View) -> T) -> T {
        let view = self
            .inner
            .view
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        read(&view)
    }

    fn write_view<T>(&self, write: impl FnOnce(&mut View) -> T) -> T {
        let mut view = self
            .inner
            .view
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        write(&mut view)
    }

    /// Pass a result through, remembering the error if there is one.
    fn tracked<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|error| self.record_error(error))
    }

    fn record_error(&self, error: crate::Error) -> crate::Error {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
        error
    }

    fn clear_error(&self) {
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}
