//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync engine
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`hooks`] - Remote backend contracts used by walkers and the lock
//! - [`IMappingStore`] - Persistent local-path to remote-object mapping
//! - [`IMaterializer`] - Local representation in the central folder
//! - [`ISettings`] - User settings read at the start of each operation

pub mod hooks;
pub mod mapping_store;
pub mod materializer;
pub mod settings;

pub use hooks::{
    CleanupHooks, CompareHooks, DownloadHooks, LockHooks, RemoteBackend, RemoteEntry,
    RemoteError, UploadHooks,
};
pub use mapping_store::{IMappingStore, StoreEvent};
pub use materializer::IMaterializer;
pub use settings::{ISettings, StaticSettings};
