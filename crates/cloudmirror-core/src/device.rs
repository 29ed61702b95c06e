//! Device identity
//!
//! Each installation generates a [`DeviceId`] on first run and keeps it in a
//! `device-id` file in the data directory. The id tags the lock sentinel so
//! that a device can re-enter its own lock after a crash.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

use crate::config::Config;
use crate::domain::newtypes::DeviceId;

/// File name of the persisted device id
pub const DEVICE_ID_FILE: &str = "device-id";

/// Default location of the device id file
pub fn default_path() -> PathBuf {
    Config::data_dir().join(DEVICE_ID_FILE)
}

/// Reads the device id at `path`, generating and persisting one if absent
pub fn load_or_create(path: &Path) -> anyhow::Result<DeviceId> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .parse::<DeviceId>()
            .with_context(|| format!("corrupt device id file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = DeviceId::new();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(path, format!("{id}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(device_id = %id, path = %path.display(), "Generated new device id");
            Ok(id)
        }
        Err(e) => {
            Err(e).with_context(|| format!("failed to read device id file {}", path.display()))
        }
    }
}
