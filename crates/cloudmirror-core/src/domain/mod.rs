//! Domain entities and business logic
//!
//! This module contains the core domain types for CloudMirror:
//! - Newtypes for type-safe identifiers and validated local paths
//! - Mapping records tying local paths to remote objects
//! - Remote object properties (origin tags, lock sentinel tags)
//! - The stop/resume sync policy
//! - Domain-specific error types

pub mod errors;
pub mod newtypes;
pub mod policy;
pub mod properties;
pub mod record;

// Re-export commonly used types
pub use errors::DomainError;
pub use newtypes::*;
pub use policy::StopSyncPolicy;
pub use properties::RemoteProperties;
pub use record::{MappedEntry, Provider, RemoteRecord, Scope};
