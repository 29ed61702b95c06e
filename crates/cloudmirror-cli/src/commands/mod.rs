//! CLI subcommands

pub mod completions;
pub mod config;
pub mod device;
pub mod list;
pub mod policy;
pub mod untrack;

use std::path::Path;

use anyhow::{Context, Result};

use cloudmirror_core::domain::newtypes::SyncPath;

/// Resolves a user-supplied path against the working directory
pub fn resolve_path(raw: &Path) -> Result<SyncPath> {
    let absolute = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read the current directory")?
            .join(raw)
    };
    SyncPath::new(absolute).with_context(|| format!("Invalid path: {}", raw.display()))
}
