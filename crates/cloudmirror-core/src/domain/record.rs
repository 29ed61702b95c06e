//! Mapping records
//!
//! A [`RemoteRecord`] ties one local path to the remote object mirroring it
//! on one provider for one account. The Mapping Store keys records by
//! `(local path, provider, account)`, so the same path may be mirrored to
//! several backends at once.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    errors::DomainError,
    newtypes::{RemoteId, SyncPath},
};

/// Remote storage backend owning a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Drive-like object/folder API
    GoogleDrive,
    /// Box-like object/folder API
    Box,
}

impl Provider {
    /// All supported providers, in display order
    pub const ALL: [Provider; 2] = [Provider::GoogleDrive, Provider::Box];

    /// Stable storage name of the provider
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GoogleDrive => "google_drive",
            Provider::Box => "box",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google_drive" | "googledrive" | "gdrive" | "drive" => Ok(Provider::GoogleDrive),
            "box" => Ok(Provider::Box),
            other => Err(DomainError::UnknownProvider(other.to_string())),
        }
    }
}

/// The `(provider, account)` pair a walker operates in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub provider: Provider,
    pub account: String,
}

impl Scope {
    pub fn new(provider: Provider, account: impl Into<String>) -> Self {
        Self {
            provider,
            account: account.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.account)
    }
}

/// Remote counterpart of one tracked local path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Opaque id of the remote object
    pub remote_id: RemoteId,
    /// Id of the remote folder containing the object
    pub parent_id: RemoteId,
    /// Whether the local path is a directory
    pub is_directory: bool,
    /// Last time the path was confirmed in sync
    pub last_sync: DateTime<Utc>,
    /// Backend owning the remote object
    pub provider: Provider,
    /// Display identity of the remote account
    pub account: String,
}

impl RemoteRecord {
    /// Creates a record stamped with the current time
    pub fn new(remote_id: RemoteId, parent_id: RemoteId, is_directory: bool, scope: &Scope) -> Self {
        Self {
            remote_id,
            parent_id,
            is_directory,
            last_sync: Utc::now(),
            provider: scope.provider,
            account: scope.account.clone(),
        }
    }

    /// The scope this record belongs to
    pub fn scope(&self) -> Scope {
        Scope::new(self.provider, self.account.clone())
    }

    /// Returns true if the record belongs to `scope`
    pub fn is_in(&self, scope: &Scope) -> bool {
        self.provider == scope.provider && self.account == scope.account
    }

    /// Refreshes `last_sync` to now
    pub fn touch(&mut self) {
        self.last_sync = Utc::now();
    }
}

/// A record together with the local path it is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedEntry {
    pub path: SyncPath,
    pub record: RemoteRecord,
}
