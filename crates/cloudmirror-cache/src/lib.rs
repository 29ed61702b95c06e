//! CloudMirror Cache - Local mapping persistence
//!
//! SQLite-based storage for:
//! - Local path to remote object mappings, per provider and account
//! - The stop/resume sync policy
//!
//! ## Architecture
//!
//! This crate implements the `IMappingStore` port from `cloudmirror-core`
//! using SQLite as the storage backend. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`SqliteMappingStore`] - Full `IMappingStore` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use cloudmirror_cache::SqliteMappingStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = SqliteMappingStore::open(Path::new("/home/user/.local/share/cloudmirror/cloudmirror.db")).await?;
//! // Hand `Arc::new(store)` to the orchestrator as `Arc<dyn IMappingStore>`...
//! # Ok(())
//! # }
//! ```

pub mod store;

pub use store::SqliteMappingStore;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be turned back into a domain value
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
