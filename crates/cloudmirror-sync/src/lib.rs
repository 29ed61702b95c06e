//! CloudMirror Sync - Mirroring engine
//!
//! Provides:
//! - Tree walkers mirroring local paths to a remote backend and back
//! - A distributed lock stored as a sentinel object in the backup folder
//! - A per-provider orchestrator sequencing lock, walk and release
//!
//! ## Modules
//!
//! - [`upload`] - Depth-first upload of a local tree
//! - [`compare`] - Change detection over already tracked paths
//! - [`download`] - Restore of a remote tree into local paths
//! - [`cleanup`] - Removal of a local subtree's remote counterparts
//! - [`lock`] - Distributed lock over the backup folder
//! - [`orchestrator`] - Per-provider sync/auto-sync/pull facade
//! - [`materializer`] - Central-folder links and copies
//! - [`memory`] - In-memory reference backend

pub mod cleanup;
pub mod compare;
pub mod context;
pub mod download;
pub mod lock;
pub mod materializer;
pub mod memory;
pub mod orchestrator;
pub mod retry;
pub mod upload;

use std::path::PathBuf;

use thiserror::Error;

use cloudmirror_core::domain::errors::DomainError;
use cloudmirror_core::ports::RemoteError;

pub use context::WalkContext;
pub use retry::RetryPolicy;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// A local filesystem operation failed
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The local source of a tracked path no longer exists
    #[error("Local source missing: {}: {source}", path.display())]
    SourceMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A remote backend call failed
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The mapping store failed
    #[error("Mapping store error: {0:#}")]
    Store(anyhow::Error),

    /// Settings could not be read
    #[error("Settings error: {0:#}")]
    Settings(anyhow::Error),

    /// Creating or removing a central-folder artifact failed
    #[error("Materialization failed: {0:#}")]
    Materialize(anyhow::Error),

    /// No central folder is configured
    #[error("Central folder is not configured")]
    CentralFolderMissing,

    /// The walk was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// A walk descended deeper than allowed
    #[error("Maximum depth {max_depth} exceeded at {}", path.display())]
    DepthExceeded { path: PathBuf, max_depth: usize },

    /// Another device holds the backup folder lock
    #[error("Backup folder is locked by another device{}", holder.as_ref().map(|h| format!(" ({h})")).unwrap_or_default())]
    LockHeld { holder: Option<String> },

    /// A domain-level error propagated from cloudmirror-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl SyncError {
    /// Wraps an I/O error on a path that is being read as a sync source
    ///
    /// "Not found" becomes [`SyncError::SourceMissing`].
    pub fn source_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            SyncError::SourceMissing { path, source }
        } else {
            SyncError::Io { path, source }
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_source_missing(&self) -> bool {
        matches!(self, SyncError::SourceMissing { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        SyncError::Store(e)
    }
}
