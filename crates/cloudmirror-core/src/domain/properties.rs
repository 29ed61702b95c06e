//! Remote object properties
//!
//! Backends let clients attach small string key/value pairs to objects
//! (Drive "appProperties", Box metadata). CloudMirror uses them to remember
//! where an uploaded item came from and, on the lock sentinel, who holds it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{DeviceId, SyncPath};

/// Key of the local path an object was uploaded from
pub const ORIGINAL_PATH_KEY: &str = "originalPath";
/// Key of the operating system an object was uploaded from
pub const ORIGINATING_OS_KEY: &str = "originatingOS";
/// Key of the device holding a lock sentinel
pub const DEVICE_ID_KEY: &str = "deviceId";
/// Key of the creation time of a lock sentinel (RFC 3339)
pub const CREATED_AT_KEY: &str = "createdAt";

/// Name of the operating system this binary runs on
pub fn current_os() -> &'static str {
    std::env::consts::OS
}

/// String properties attached to a remote object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteProperties(BTreeMap<String, String>);

impl RemoteProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Properties recording the origin of an uploaded item
    pub fn for_upload(path: &SyncPath) -> Self {
        let mut props = Self::new();
        props.insert(ORIGINAL_PATH_KEY, path.to_key());
        props.insert(ORIGINATING_OS_KEY, current_os());
        props
    }

    /// Properties tagging a lock sentinel
    pub fn for_lock(device_id: &DeviceId, created_at: DateTime<Utc>) -> Self {
        let mut props = Self::new();
        props.insert(DEVICE_ID_KEY, device_id.to_string());
        props.insert(CREATED_AT_KEY, created_at.to_rfc3339());
        props
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merges `other` into `self`, overwriting existing keys
    pub fn extend(&mut self, other: &RemoteProperties) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }

    pub fn original_path(&self) -> Option<SyncPath> {
        self.get(ORIGINAL_PATH_KEY)
            .and_then(|raw| raw.parse::<SyncPath>().ok())
    }

    pub fn originating_os(&self) -> Option<&str> {
        self.get(ORIGINATING_OS_KEY)
    }

    /// Original path, but only when the item was uploaded from this OS
    pub fn same_os_original_path(&self) -> Option<SyncPath> {
        if self.originating_os() == Some(current_os()) {
            self.original_path()
        } else {
            None
        }
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.get(DEVICE_ID_KEY).and_then(|raw| raw.parse().ok())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.get(CREATED_AT_KEY)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl FromIterator<(String, String)> for RemoteProperties {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
