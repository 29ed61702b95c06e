//! Settings port
//!
//! The orchestrator reads the central folder at the start of every
//! operation, so a user changing it takes effect on the next sync.

use std::path::PathBuf;

use async_trait::async_trait;

#[async_trait]
pub trait ISettings: Send + Sync {
    /// Configured central folder, `None` when unset
    async fn central_folder(&self) -> anyhow::Result<Option<PathBuf>>;
}

/// Settings with a fixed central folder
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    central_folder: Option<PathBuf>,
}

impl StaticSettings {
    pub fn new(central_folder: Option<PathBuf>) -> Self {
        Self { central_folder }
    }
}

#[async_trait]
impl ISettings for StaticSettings {
    async fn central_folder(&self) -> anyhow::Result<Option<PathBuf>> {
        Ok(self.central_folder.clone())
    }
}
