//! CloudMirror Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `RemoteRecord`, `Scope`, `StopSyncPolicy`, `RemoteProperties`
//! - **Port definitions** - Hook contracts implemented by remote backends,
//!   `IMappingStore`, `IMaterializer` and `ISettings`
//! - **Configuration** - YAML configuration and device identity
//!
//! # Architecture
//!
//! The domain module is pure data and rules with no I/O. Ports define the
//! trait interfaces that adapter crates (`cloudmirror-cache`, backend
//! wrappers) implement, and that `cloudmirror-sync` drives.

pub mod config;
pub mod device;
pub mod domain;
pub mod ports;
