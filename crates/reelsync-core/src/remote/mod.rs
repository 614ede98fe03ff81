//! Remote authority seam.
//!
//! The remote authority is the eventual source of truth shared by every
//! device of one owner. The core only talks to it through [`RemoteStore`].

mod http;
mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::broadcast::Subscription;
use crate::models::RemoteRecord;
use crate::{Error, Result};

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

/// Receives the owner's full record set whenever it changes remotely.
pub type RemoteChangeHandler = Arc<dyn Fn(Vec<RemoteRecord>) + Send + Sync>;

/// Receives failures of a live subscription.
pub type RemoteErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// Narrow interface to the remote document store.
///
/// `put` and `delete` are idempotent and keyed by item id.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// One-shot pull of every record the owner has.
    async fn fetch_all(&self, owner_id: &str) -> Result<Vec<RemoteRecord>>;

    /// Live feed of the owner's full record set.
    async fn subscribe(
        &self,
        owner_id: &str,
        on_change: RemoteChangeHandler,
        on_error: RemoteErrorHandler,
    ) -> Result<Subscription>;

    /// Upsert one record.
    async fn put(&self, owner_id: &str, record: &RemoteRecord) -> Result<()>;

    /// Remove one record.
    async fn delete(&self, owner_id: &str, item_id: &str) -> Result<()>;
}

/// Fail a remote call that does not settle within `limit`.
pub async fn bounded<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| Error::Timeout(limit))?
}
