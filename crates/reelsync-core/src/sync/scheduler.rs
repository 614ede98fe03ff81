//! Debounced sync worker.
//!
//! One worker task per replica owns the remote subscription and runs every
//! sync pass, so at most one pass is ever in flight. Triggers arrive as
//! commands; anything sent while a pass runs waits in the queue and is
//! handled once the pass finishes.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::SyncReport;
use crate::broadcast::{BroadcastChannel, ChangeEvent, Subscription};
use crate::config::SyncSettings;
use crate::identity::DeviceIdentity;
use crate::models::RemoteRecord;
use crate::remote::{bounded, RemoteStore};
use crate::services::WatchlistStore;
use crate::state::SyncState;
use crate::util::now_ms;
use crate::Result;

type Reply = oneshot::Sender<Result<Option<SyncReport>>>;

enum Command {
    Schedule,
    SyncNow(Reply),
    SetOnline(bool),
    Authenticate { owner_id: String, reply: Reply },
    SignOut,
    RemoteSnapshot(Vec<RemoteRecord>),
    RemoteFailed(String),
    Shutdown,
}

/// Builder for a replica's sync worker.
pub struct SyncScheduler {
    store: WatchlistStore,
    remote: Arc<dyn RemoteStore>,
    device: DeviceIdentity,
    channel: BroadcastChannel,
    settings: SyncSettings,
    online: bool,
}

impl SyncScheduler {
    pub fn new(
        store: WatchlistStore,
        remote: Arc<dyn RemoteStore>,
        device: DeviceIdentity,
        channel: BroadcastChannel,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            device,
            channel,
            settings,
            online: true,
        }
    }

    /// Initial connectivity (defaults to online).
    #[must_use]
    pub const fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Start the worker. Must be called inside a Tokio runtime.
    pub fn spawn(self) -> SyncHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SyncState::Idle);
        let (revision_tx, revision_rx) = watch::channel(0_u64);
        let last_error = Arc::new(Mutex::new(None));

        let worker = Worker {
            store: self.store.clone(),
            remote: self.remote,
            device: self.device,
            channel: self.channel,
            settings: self.settings,
            commands: commands_rx,
            feedback: commands_tx.downgrade(),
            state: state_tx,
            revision: revision_tx,
            last_error: Arc::clone(&last_error),
            owner_id: None,
            online: self.online,
            rearm: false,
            debounce_at: None,
            idle_at: None,
            remote_feed: None,
        };
        let task = tokio::spawn(worker.run());

        SyncHandle {
            commands: commands_tx,
            state: state_rx,
            revision: revision_rx,
            last_error,
            worker: Arc::new(tokio::sync::Mutex::new(Some(task))),
            store: self.store,
        }
    }
}

/// Cheap, cloneable control surface for a running sync worker.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SyncState>,
    revision: watch::Receiver<u64>,
    last_error: Arc<Mutex<Option<String>>>,
    worker: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
    store: WatchlistStore,
}

impl SyncHandle {
    /// Handle with no worker behind it, for replicas that never sync.
    ///
    /// Triggers are ignored and `sync_now` reports that nothing ran.
    pub fn detached(store: WatchlistStore) -> Self {
        let (commands, _) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(SyncState::Idle);
        let (_, revision) = watch::channel(0);
        Self {
            commands,
            state,
            revision,
            last_error: Arc::new(Mutex::new(None)),
            worker: Arc::new(tokio::sync::Mutex::new(None)),
            store,
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Sync worker not running; trigger dropped");
        }
    }

    async fn ask(&self, command: impl FnOnce(Reply) -> Command) -> Result<Option<SyncReport>> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply));
        response.await.unwrap_or(Ok(None))
    }

    /// Debounced trigger; bursts inside the window coalesce into one pass.
    pub fn request_sync(&self) {
        self.send(Command::Schedule);
    }

    /// Run a pass now. `Ok(None)` when offline, signed out or stopped.
    pub async fn sync_now(&self) -> Result<Option<SyncReport>> {
        self.ask(Command::SyncNow).await
    }

    /// Report connectivity; going from offline to online triggers a pass.
    pub fn set_online(&self, online: bool) {
        self.send(Command::SetOnline(online));
    }

    /// Attach the owner, pull their remote set, push local changes and
    /// follow the remote feed.
    pub async fn authenticate(&self, owner_id: impl Into<String>) -> Result<Option<SyncReport>> {
        let owner_id = owner_id.into();
        self.ask(|reply| Command::Authenticate { owner_id, reply })
            .await
    }

    /// Detach the owner and drop the remote feed.
    pub fn sign_out(&self) {
        self.send(Command::SignOut);
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Bumped whenever sync changed what the local store holds.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }

    /// Message of the most recent sync failure, cleared by a good pass.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|error| error.clone())
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.store.pending_count().await
    }

    /// Stop the worker and wait for it to exit.
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown);
        let task = self.worker.lock().await.take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!("Sync worker ended abnormally: {error}");
            }
        }
    }
}

struct Worker {
    store: WatchlistStore,
    remote: Arc<dyn RemoteStore>,
    device: DeviceIdentity,
    channel: BroadcastChannel,
    settings: SyncSettings,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Weak so a live remote feed does not keep the worker alive
    feedback: mpsc::WeakUnboundedSender<Command>,
    state: watch::Sender<SyncState>,
    revision: watch::Sender<u64>,
    last_error: Arc<Mutex<Option<String>>>,
    owner_id: Option<String>,
    online: bool,
    /// A trigger was suppressed while offline
    rearm: bool,
    debounce_at: Option<Instant>,
    idle_at: Option<Instant>,
    remote_feed: Option<Subscription>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Worker {
    async fn run(mut self) {
        loop {
            let debounce_at = self.debounce_at;
            let idle_at = self.idle_at;

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command).await {
                        break;
                    }
                }
                () = sleep_until(debounce_at) => {
                    self.debounce_at = None;
                    // Failures are already recorded on the handle
                    let _ = self.run_pass("debounce").await;
                }
                () = sleep_until(idle_at) => {
                    self.idle_at = None;
                    self.set_state(SyncState::Idle);
                }
            }
        }

        self.remote_feed = None;
        tracing::debug!("Sync worker stopped");
    }

    /// Returns `false` when the worker should exit.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Schedule => self.schedule(),
            Command::SyncNow(reply) => {
                let result = self.run_pass("manual").await;
                let _ = reply.send(result);
            }
            Command::SetOnline(online) => self.set_online(online).await,
            Command::Authenticate { owner_id, reply } => {
                let result = self.authenticate(owner_id).await;
                let _ = reply.send(result);
            }
            Command::SignOut => {
                tracing::info!("Signed out; remote sync detached");
                self.owner_id = None;
                self.remote_feed = None;
                self.debounce_at = None;
                self.rearm = false;
            }
            Command::RemoteSnapshot(records) => self.absorb_snapshot(records).await,
            Command::RemoteFailed(message) => {
                tracing::warn!("Live remote feed failed: {message}");
                self.record_error(Some(message));
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn schedule(&mut self) {
        if self.online {
            self.debounce_at = Some(Instant::now() + self.settings.debounce);
        } else {
            self.rearm = true;
        }
    }

    async fn set_online(&mut self, online: bool) {
        let was_online = std::mem::replace(&mut self.online, online);
        match (was_online, online) {
            (false, true) => {
                if self.rearm {
                    tracing::info!("Connectivity restored; running deferred sync");
                } else {
                    tracing::info!("Connectivity restored");
                }
                let _ = self.run_pass("reconnect").await;
            }
            (true, false) => {
                tracing::info!("Connectivity lost; sync deferred");
                if self.debounce_at.take().is_some() {
                    self.rearm = true;
                }
            }
            _ => {}
        }
    }

    async fn authenticate(&mut self, owner_id: String) -> Result<Option<SyncReport>> {
        if self.owner_id.as_deref() != Some(owner_id.as_str()) {
            tracing::info!("Attaching remote watchlist for {owner_id}");
            self.remote_feed = None;
            self.owner_id = Some(owner_id);
        }
        // Bootstrap: a pass always pulls before it pushes
        self.run_pass("bootstrap").await
    }

    async fn ensure_remote_feed(&mut self) {
        if self.remote_feed.is_some() {
            return;
        }
        let Some(owner_id) = self.owner_id.clone() else {
            return;
        };

        let on_change = {
            let feedback = self.feedback.clone();
            Arc::new(move |records: Vec<RemoteRecord>| {
                if let Some(commands) = feedback.upgrade() {
                    let _ = commands.send(Command::RemoteSnapshot(records));
                }
            })
        };
        let on_error = {
            let feedback = self.feedback.clone();
            Arc::new(move |error: crate::Error| {
                if let Some(commands) = feedback.upgrade() {
                    let _ = commands.send(Command::RemoteFailed(error.to_string()));
                }
            })
        };

        let subscribe = self.remote.subscribe(&owner_id, on_change, on_error);
        match bounded(self.settings.remote_timeout, subscribe).await {
            Ok(feed) => self.remote_feed = Some(feed),
            Err(error) => tracing::warn!("Live remote feed unavailable: {error}"),
        }
    }

    async fn absorb_snapshot(&mut self, records: Vec<RemoteRecord>) {
        if self.owner_id.is_none() {
            return;
        }
        if !self.online {
            self.rearm = true;
            return;
        }

        match self.store.apply_remote_records(&records, now_ms()).await {
            Ok(report) => {
                if report.inserted + report.updated > 0 {
                    tracing::debug!(
                        inserted = report.inserted,
                        updated = report.updated,
                        "Applied live remote snapshot"
                    );
                    self.bump_revision();
                    self.channel.publish(ChangeEvent::SyncCompleted);
                }
                if report.conflicts > 0 {
                    // Local winners still have to overwrite the remote copy
                    self.schedule();
                }
            }
            Err(error) => {
                tracing::warn!("Failed to apply live remote snapshot: {error}");
                self.record_error(Some(error.to_string()));
            }
        }
    }

    async fn run_pass(&mut self, trigger: &str) -> Result<Option<SyncReport>> {
        let Some(owner_id) = self.owner_id.clone() else {
            tracing::debug!("Sync ({trigger}) skipped: no owner attached");
            return Ok(None);
        };
        if !self.online {
            tracing::debug!("Sync ({trigger}) deferred until online");
            self.rearm = true;
            return Ok(None);
        }

        self.rearm = false;
        self.debounce_at = None;
        self.idle_at = None;
        self.set_state(SyncState::Syncing);
        tracing::info!("Sync pass started ({trigger})");

        let result = self.pass(&owner_id).await;
        self.bump_revision();

        match &result {
            Ok(report) => {
                tracing::info!(
                    pulled = report.pulled,
                    pushed = report.pushed,
                    purged = report.purged,
                    conflicts = report.conflicts,
                    "Sync pass finished"
                );
                if let Err(error) = self.store.record_sync(self.device.as_str(), now_ms()).await {
                    tracing::warn!("Failed to record sync time: {error}");
                }
                self.record_error(None);
                self.set_state(SyncState::Success);
                self.channel.publish(ChangeEvent::SyncCompleted);
                self.ensure_remote_feed().await;
            }
            Err(error) => {
                tracing::warn!("Sync pass failed; pending records kept for retry: {error}");
                self.record_error(Some(error.to_string()));
                self.set_state(SyncState::Error);
            }
        }
        self.idle_at = Some(Instant::now() + self.settings.success_display);

        result.map(Some)
    }

    async fn pass(&self, owner_id: &str) -> Result<SyncReport> {
        let limit = self.settings.remote_timeout;
        let now = now_ms();

        let fetched = bounded(limit, self.remote.fetch_all(owner_id)).await?;
        let pulled = fetched.len();
        let applied = self.store.apply_remote_records(&fetched, now).await?;

        let mut pushed = 0;
        for record in self.store.get_pending().await? {
            bounded(limit, self.remote.put(owner_id, &RemoteRecord::from(&record))).await?;
            pushed += self
                .store
                .confirm_pushed(std::slice::from_ref(&record))
                .await?;
        }

        let purged = self.collect_tombstones(owner_id, now).await;

        Ok(SyncReport {
            pulled,
            pushed,
            purged,
            conflicts: applied.conflicts,
        })
    }

    /// Remove synced tombstones past retention, remotely first, and trim
    /// the conflict log to the same window.
    ///
    /// Best effort: a failure stops collection for this pass only.
    async fn collect_tombstones(&self, owner_id: &str, now: i64) -> usize {
        let cutoff = self.settings.tombstone_cutoff(now);
        match self.store.prune_conflicts(cutoff).await {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!("Pruned {pruned} old conflict log rows"),
            Err(error) => tracing::warn!("Conflict log pruning failed: {error}"),
        }

        let expired = match self.store.list_expired_tombstones(cutoff).await {
            Ok(expired) => expired,
            Err(error) => {
                tracing::warn!("Tombstone scan failed: {error}");
                return 0;
            }
        };

        let mut deleted = Vec::with_capacity(expired.len());
        for record in expired {
            let delete = self.remote.delete(owner_id, &record.item_id);
            match bounded(self.settings.remote_timeout, delete).await {
                Ok(()) => deleted.push(record.id),
                Err(error) => {
                    tracing::warn!(record_id = %record.id, "Remote tombstone delete failed: {error}");
                    break;
                }
            }
        }
        if deleted.is_empty() {
            return 0;
        }

        match self.store.purge_tombstones(&deleted).await {
            Ok(purged) => {
                tracing::info!("Purged {purged} expired tombstones");
                purged
            }
            Err(error) => {
                tracing::warn!("Tombstone purge failed: {error}");
                0
            }
        }
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    fn record_error(&self, message: Option<String>) {
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = message;
        }
    }
}
