//! Best-effort change notifications between replicas sharing one origin.
//!
//! A [`BroadcastHub`] owns named topics; each replica opens a
//! [`BroadcastChannel`] on the topic. Every opened channel gets its own
//! instance tag, so replicas that share a device id (two windows on one
//! store) still hear each other; clones of a channel share the tag and
//! never hear their own events. Messages are
//! JSON envelopes so the wire shape stays the same whether replicas share a
//! process or not. Nothing is persisted: a replica that is not subscribed at
//! publish time simply misses the event and catches up from the store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::WatchlistRecord;

const DEFAULT_CAPACITY: usize = 256;

/// Local change announced to other replicas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeEvent {
    Add { record: WatchlistRecord },
    Update { record: WatchlistRecord },
    Remove { record: WatchlistRecord },
    SyncCompleted,
}

impl ChangeEvent {
    pub fn record(&self) -> Option<&WatchlistRecord> {
        match self {
            Self::Add { record } | Self::Update { record } | Self::Remove { record } => {
                Some(record)
            }
            Self::SyncCompleted => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    origin: String,
    instance: String,
    event: ChangeEvent,
}

/// Registry of named broadcast topics.
#[derive(Clone)]
pub struct BroadcastHub {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Open `topic` for a new replica instance. `origin` names the device
    /// for diagnostics; echo filtering uses the per-channel instance tag.
    ///
    /// A poisoned registry yields an unavailable channel instead of an error.
    pub fn channel(&self, topic: &str, origin: impl Into<String>) -> BroadcastChannel {
        let origin = origin.into();
        let sender = match self.topics.lock() {
            Ok(mut topics) => Some(
                topics
                    .entry(topic.to_string())
                    .or_insert_with(|| broadcast::channel(self.capacity).0)
                    .clone(),
            ),
            Err(_) => {
                tracing::warn!("Broadcast registry poisoned; topic {topic} disabled");
                None
            }
        };

        BroadcastChannel {
            topic: topic.to_string(),
            origin,
            instance: new_instance_tag(),
            sender,
        }
    }
}

/// One replica's handle on a broadcast topic.
#[derive(Clone)]
pub struct BroadcastChannel {
    topic: String,
    origin: String,
    instance: String,
    sender: Option<broadcast::Sender<String>>,
}

impl BroadcastChannel {
    /// Channel with no transport; publishing is a no-op.
    pub fn unavailable(origin: impl Into<String>) -> Self {
        Self {
            topic: String::new(),
            origin: origin.into(),
            instance: new_instance_tag(),
            sender: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Tag identifying this channel and its clones on the wire.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub const fn is_available(&self) -> bool {
        self.sender.is_some()
    }

    /// Announce a change. Never fails the caller.
    pub fn publish(&self, event: ChangeEvent) {
        let Some(sender) = &self.sender else {
            return;
        };

        let envelope = Envelope {
            origin: self.origin.clone(),
            instance: self.instance.clone(),
            event,
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!("Dropping unserializable broadcast on {}: {error}", self.topic);
                return;
            }
        };

        if sender.send(payload).is_err() {
            tracing::debug!("No listeners on {}", self.topic);
        }
    }

    /// Run `handler` for every event published by another replica.
    ///
    /// Must be called inside a Tokio runtime. Events published before this
    /// call are not delivered.
    pub fn subscribe<F, Fut>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(ChangeEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return Subscription::inactive();
        };

        let mut receiver = sender.subscribe();
        let instance = self.instance.clone();
        let topic = self.topic.clone();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => match serde_json::from_str::<Envelope>(&payload) {
                        Ok(envelope) if envelope.instance == instance => {}
                        Ok(envelope) => {
                            tracing::trace!(origin = %envelope.origin, "Broadcast from {topic}");
                            handler(envelope.event).await;
                        }
                        Err(error) => {
                            tracing::debug!("Ignoring malformed broadcast on {topic}: {error}");
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Broadcast listener on {topic} lagged by {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription::from_task(task)
    }
}

fn new_instance_tag() -> String {
    Uuid::now_v7().to_string()
}

/// Cancellation handle for broadcast, remote and view listeners.
///
/// Dropping the handle also cancels the listeners.
#[derive(Debug, Default)]
pub struct Subscription {
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    /// Handle that is not attached to any listener.
    pub const fn inactive() -> Self {
        Self { tasks: Vec::new() }
    }

    pub(crate) fn from_task(task: JoinHandle<()>) -> Self {
        Self { tasks: vec![task] }
    }

    /// Combine two handles so both listeners end together.
    #[must_use]
    pub fn join(mut self, mut other: Self) -> Self {
        let mut tasks = std::mem::take(&mut self.tasks);
        tasks.append(&mut other.tasks);
        Self { tasks }
    }

    pub fn is_active(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
