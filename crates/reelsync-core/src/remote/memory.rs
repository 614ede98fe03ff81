//! In-process remote authority used by tests, demos and local-only setups.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{RemoteChangeHandler, RemoteErrorHandler, RemoteStore};
use crate::broadcast::Subscription;
use crate::models::RemoteRecord;
use crate::util::now_ms;
use crate::{Error, Result};

struct OwnerState {
    records: BTreeMap<String, RemoteRecord>,
    feed: watch::Sender<Vec<RemoteRecord>>,
}

impl Default for OwnerState {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            feed: watch::channel(Vec::new()).0,
        }
    }
}

impl OwnerState {
    fn snapshot(&self) -> Vec<RemoteRecord> {
        self.records.values().cloned().collect()
    }

    fn notify(&self) {
        self.feed.send_replace(self.snapshot());
    }
}

#[derive(Default)]
struct Inner {
    owners: Mutex<HashMap<String, OwnerState>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    fetches: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

/// Remote authority held in memory.
///
/// Clones share state, so several replicas can sync against one instance.
/// The availability switch simulates an outage and the latency knob a slow
/// link; both apply to every clone.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Inner>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the authority going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.inner.unavailable.load(Ordering::SeqCst)
    }

    /// Delay applied before every call completes.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Current records for `owner_id`, bypassing availability.
    pub fn records(&self, owner_id: &str) -> Vec<RemoteRecord> {
        self.owners()
            .map(|owners| owners.get(owner_id).map(OwnerState::snapshot).unwrap_or_default())
            .unwrap_or_default()
    }

    /// Write a record as another device would, notifying subscribers.
    pub fn seed(&self, owner_id: &str, record: RemoteRecord) -> Result<()> {
        self.store(owner_id, record)
    }

    /// Successful `fetch_all` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    /// Successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.inner.puts.load(Ordering::SeqCst)
    }

    /// Successful `delete` calls so far.
    pub fn delete_count(&self) -> usize {
        self.inner.deletes.load(Ordering::SeqCst)
    }

    fn owners(&self) -> Result<MutexGuard<'_, HashMap<String, OwnerState>>> {
        self.inner
            .owners
            .lock()
            .map_err(|_| Error::Remote("in-memory remote state poisoned".to_string()))
    }

    fn store(&self, owner_id: &str, mut record: RemoteRecord) -> Result<()> {
        let now = now_ms();
        let added_at = *record.added_at.get_or_insert(now);
        record.last_modified.get_or_insert(added_at);

        let mut owners = self.owners()?;
        let owner = owners.entry(owner_id.to_string()).or_default();
        owner.records.insert(record.item_id.clone(), record);
        owner.notify();
        Ok(())
    }

    async fn reachable(&self) -> Result<()> {
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::Network("remote authority unreachable".to_string()))
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch_all(&self, owner_id: &str) -> Result<Vec<RemoteRecord>> {
        self.reachable().await?;
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.records(owner_id))
    }

    /// Emits the current set immediately, then on every change. The
    /// in-memory feed cannot fail, so `on_error` is never called.
    async fn subscribe(
        &self,
        owner_id: &str,
        on_change: RemoteChangeHandler,
        _on_error: RemoteErrorHandler,
    ) -> Result<Subscription> {
        self.reachable().await?;

        let mut feed = {
            let mut owners = self.owners()?;
            owners.entry(owner_id.to_string()).or_default().feed.subscribe()
        };

        let task = tokio::spawn(async move {
            let initial = feed.borrow_and_update().clone();
            on_change(initial);
            while feed.changed().await.is_ok() {
                let snapshot = feed.borrow_and_update().clone();
                on_change(snapshot);
            }
        });

        Ok(Subscription::from_task(task))
    }

    async fn put(&self, owner_id: &str, record: &RemoteRecord) -> Result<()> {
        self.reachable().await?;
        self.store(owner_id, record.clone())?;
        self.inner.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, owner_id: &str, item_id: &str) -> Result<()> {
        self.reachable().await?;
        let mut owners = self.owners()?;
        if let Some(owner) = owners.get_mut(owner_id) {
            if owner.records.remove(item_id).is_some() {
                owner.notify();
            }
        }
        self.inner.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
