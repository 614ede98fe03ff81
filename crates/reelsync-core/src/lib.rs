//! reelsync-core - offline-first watchlist synchronization engine
//!
//! Each running client is a replica with its own durable store. Local
//! writes always succeed offline; the scheduler reconciles with the remote
//! authority using vector clocks and a last-write-wins tiebreak, and a
//! broadcast topic keeps replicas of the same origin in step.

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
mod util;
pub mod watchlist;

pub use broadcast::{BroadcastChannel, BroadcastHub, ChangeEvent, Subscription};
pub use clock::{ClockOrdering, VectorClock};
pub use config::{RemoteConfig, SyncSettings};
pub use error::{Error, Result, ValidationError};
pub use identity::DeviceIdentity;
pub use models::{RemoteRecord, SyncConflict, SyncStatus, WatchlistRecord};
pub use reconcile::{merge, Resolution};
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteStore};
pub use services::WatchlistStore;
pub use state::SyncState;
pub use sync::{SyncHandle, SyncReport, SyncScheduler};
pub use watchlist::Watchlist;
