//! Local representation port
//!
//! After a tracked path is uploaded or pulled, a representation of it is
//! placed in the central folder (a symlink, or a copy where links are
//! refused).

use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[async_trait]
pub trait IMaterializer: Send + Sync {
    /// Ensures `central_folder/<name of source>` exists and returns it
    async fn materialize(&self, source: &Path, central_folder: &Path) -> anyhow::Result<PathBuf>;

    /// Removes the artifact for `source`; returns false if none existed
    async fn remove(&self, source: &Path, central_folder: &Path) -> anyhow::Result<bool>;
}
