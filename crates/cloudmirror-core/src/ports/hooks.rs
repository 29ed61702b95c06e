//! Remote backend hook contracts (driven/secondary ports)
//!
//! Each walker talks to a remote backend only through the narrow trait it
//! needs. A concrete backend (Drive-like, Box-like, or the in-memory
//! reference backend in `cloudmirror-sync`) implements all of them and the
//! [`RemoteBackend`] super-trait that ties them to a provider and account.
//!
//! ## Design Notes
//!
//! - Hooks return [`RemoteError`] rather than `anyhow::Result`: the walkers,
//!   the lock and the retry policy branch on the error class.
//! - `delete_remote` lives on [`CleanupHooks`] and is inherited by
//!   [`CompareHooks`], so one backend implements it once.
//! - Downloads stream into an [`AsyncWrite`] sink supplied by the walker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::domain::{
    newtypes::{RemoteId, SyncPath},
    properties::RemoteProperties,
    record::{Provider, Scope},
};

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by a remote backend call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The object does not exist (HTTP 404)
    #[error("remote object not found: {0}")]
    NotFound(String),

    /// The caller may not touch the object (HTTP 403)
    #[error("access to remote object forbidden: {0}")]
    Forbidden(String),

    /// The backend asked the client to slow down (HTTP 429)
    #[error("rate limited by remote backend: {0}")]
    RateLimited(String),

    /// Transport failure before a response was received
    #[error("network error: {0}")]
    Network(String),

    /// The backend failed to serve the request (HTTP 5xx)
    #[error("remote server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Anything the backend could not classify
    #[error("remote error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Returns true if retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited(_) | RemoteError::Network(_) | RemoteError::Server { .. }
        )
    }

    /// Returns true for 404/403, which teardown paths treat as success
    pub fn is_gone_or_forbidden(&self) -> bool {
        matches!(self, RemoteError::NotFound(_) | RemoteError::Forbidden(_))
    }

    /// Maps an HTTP status code and message onto an error class
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 | 410 => RemoteError::NotFound(message),
            401 | 403 => RemoteError::Forbidden(message),
            429 => RemoteError::RateLimited(message),
            500..=599 => RemoteError::Server { status, message },
            _ => RemoteError::Other(format!("HTTP {status}: {message}")),
        }
    }
}

// ============================================================================
// DTOs
// ============================================================================

/// One child of a remote folder, as returned by [`DownloadHooks::list_children`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: RemoteId,
    pub name: String,
    pub is_folder: bool,
    pub properties: RemoteProperties,
}

// ============================================================================
// Hook traits
// ============================================================================

/// Operations the Upload Walker needs
#[async_trait]
pub trait UploadHooks: Send + Sync {
    /// Creates a folder named `name` under `parent_id`
    async fn upload_folder(
        &self,
        name: &str,
        parent_id: &RemoteId,
        local_path: &SyncPath,
    ) -> Result<RemoteId, RemoteError>;

    /// Uploads the file at `local_path` as a new object under `parent_id`
    async fn upload_file(
        &self,
        local_path: &SyncPath,
        parent_id: &RemoteId,
    ) -> Result<RemoteId, RemoteError>;

    /// Replaces the content of an existing object
    async fn update_file(&self, remote_id: &RemoteId, local_path: &SyncPath)
        -> Result<(), RemoteError>;

    /// Merges `properties` into the object's remote properties
    async fn set_metadata(
        &self,
        remote_id: &RemoteId,
        properties: &RemoteProperties,
    ) -> Result<(), RemoteError>;
}

/// Operations the Cleanup Walker needs
#[async_trait]
pub trait CleanupHooks: Send + Sync {
    /// Deletes an object; folders are deleted recursively
    async fn delete_remote(&self, remote_id: &RemoteId, is_directory: bool)
        -> Result<(), RemoteError>;
}

/// Operations the Compare Walker needs
#[async_trait]
pub trait CompareHooks: CleanupHooks {
    async fn get_remote_modified_time(
        &self,
        remote_id: &RemoteId,
    ) -> Result<DateTime<Utc>, RemoteError>;

    /// Uploads the local file as a new version of an existing object
    async fn new_version(&self, remote_id: &RemoteId, local_path: &SyncPath)
        -> Result<(), RemoteError>;
}

/// Operations the Download Walker needs
#[async_trait]
pub trait DownloadHooks: Send + Sync {
    async fn list_children(&self, parent_id: &RemoteId) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Streams the object's content into `sink`, returning the bytes written
    async fn read_file(
        &self,
        remote_id: &RemoteId,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, RemoteError>;
}

/// Operations the distributed lock needs on top of listing and deletion
#[async_trait]
pub trait LockHooks: DownloadHooks + CleanupHooks {
    /// Finds or creates the top-level backup folder called `name`
    async fn ensure_backup_folder(&self, name: &str) -> Result<RemoteId, RemoteError>;

    async fn folder_exists(&self, folder_id: &RemoteId) -> Result<bool, RemoteError>;

    /// Creates an empty object tagged with `properties`
    async fn create_sentinel(
        &self,
        parent_id: &RemoteId,
        name: &str,
        properties: &RemoteProperties,
    ) -> Result<RemoteId, RemoteError>;
}

/// A fully capable, already authenticated remote backend
pub trait RemoteBackend: UploadHooks + CompareHooks + DownloadHooks + LockHooks {
    fn provider(&self) -> Provider;

    /// Display identity of the signed-in account
    fn account(&self) -> &str;

    fn scope(&self) -> Scope {
        Scope::new(self.provider(), self.account())
    }
}
