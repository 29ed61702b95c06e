//! Mapping store port (driven/secondary port)
//!
//! Persistent local record of which local path corresponds to which remote
//! object, per `(provider, account)`, plus the stop/resume sync policy.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//! - Every mutating call is durable before it returns.
//! - No method performs network I/O.
//! - Implementations are injected as `Arc<dyn IMappingStore>`.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::{
    newtypes::SyncPath,
    policy::StopSyncPolicy,
    record::{MappedEntry, RemoteRecord, Scope},
};

/// Change notification published by a mapping store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The stop/resume policy changed; carries the new policy
    PolicyChanged(StopSyncPolicy),
    /// A subtree of records was removed for one scope
    SubtreeRemoved {
        root: SyncPath,
        scope: Scope,
        removed: u64,
    },
}

#[async_trait]
pub trait IMappingStore: Send + Sync {
    async fn get(&self, path: &SyncPath, scope: &Scope) -> anyhow::Result<Option<RemoteRecord>>;

    /// Inserts or replaces the record for `path` in the record's scope
    async fn set(&self, path: &SyncPath, record: &RemoteRecord) -> anyhow::Result<()>;

    /// Deletes one record and prunes policy entries at or under `path`
    ///
    /// Returns true if a record existed.
    async fn delete(&self, path: &SyncPath, scope: &Scope) -> anyhow::Result<bool>;

    /// Deletes every record equal to `root` or nested under it
    ///
    /// Matching is separator-aware. Policy entries for the same subtree are
    /// pruned in the same transaction. Returns the number of records removed.
    async fn delete_subtree(&self, root: &SyncPath, scope: &Scope) -> anyhow::Result<u64>;

    /// All tracked paths, optionally limited to one scope, sorted
    async fn keys(&self, scope: Option<&Scope>) -> anyhow::Result<Vec<SyncPath>>;

    async fn entries(&self, scope: Option<&Scope>) -> anyhow::Result<Vec<MappedEntry>>;

    /// Records whose path is a direct child of `parent`
    async fn children(&self, parent: &SyncPath, scope: &Scope)
        -> anyhow::Result<Vec<MappedEntry>>;

    /// Refreshes `last_sync` to now; returns false if no record exists
    async fn touch(&self, path: &SyncPath, scope: &Scope) -> anyhow::Result<bool>;

    async fn policy(&self) -> anyhow::Result<StopSyncPolicy>;

    async fn stop_sync(&self, path: &SyncPath) -> anyhow::Result<()>;

    async fn resume_sync(&self, path: &SyncPath) -> anyhow::Result<()>;

    /// Drops both stop and resume entries for exactly `path`
    async fn clear_policy(&self, path: &SyncPath) -> anyhow::Result<bool>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// Forces pending writes into the main database file
    async fn flush(&self) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}
