//! Local materializer adapter
//!
//! Places a representation of each tracked root inside the central folder:
//! a symlink where the platform allows it, otherwise a hard link (files) or
//! a recursive copy (directories).
//!
//! The artifact is named after the source. When that name is taken by a link
//! to another source, `name (2)`, `name (3)`, ... are tried in turn. Only
//! symlinks reveal their source; a copy or hard link found under a candidate
//! name is assumed to belong to the source being materialized.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use cloudmirror_core::ports::IMaterializer;

/// How an artifact was created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Symlink,
    HardLink,
    Copy,
}

/// Highest suffix tried for a taken artifact name
const MAX_CANDIDATES: u32 = 100;

/// What occupies a candidate artifact path
#[derive(Debug, PartialEq, Eq)]
enum Slot {
    Free,
    /// A symlink to the source
    Ours,
    /// A symlink to some other path
    Foreign,
    /// A copy or hard link
    Unknown,
}

/// [`IMaterializer`] over the local filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalMaterializer {
    force_copy: bool,
}

impl LocalMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skips link creation and always copies
    pub fn copying() -> Self {
        Self { force_copy: true }
    }

    /// Candidate target of `source` inside `central_folder`
    ///
    /// `attempt` 1 is the plain name, later attempts carry a ` (n)` suffix.
    pub fn artifact_path(source: &Path, central_folder: &Path, attempt: u32) -> Option<PathBuf> {
        let name = source.file_name()?;
        if attempt <= 1 {
            return Some(central_folder.join(name));
        }
        let mut suffixed = name.to_os_string();
        suffixed.push(format!(" ({attempt})"));
        Some(central_folder.join(suffixed))
    }

    async fn slot(target: &Path, source: &Path) -> Result<Slot> {
        let metadata = match tokio::fs::symlink_metadata(target).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Slot::Free),
            Err(e) => return Err(e).with_context(|| format!("failed to stat {}", target.display())),
        };
        if !metadata.file_type().is_symlink() {
            return Ok(Slot::Unknown);
        }
        let points_to = tokio::fs::read_link(target)
            .await
            .with_context(|| format!("failed to read link {}", target.display()))?;
        Ok(if points_to == source { Slot::Ours } else { Slot::Foreign })
    }

    async fn create(&self, source: &Path, target: &Path) -> Result<ArtifactKind> {
        if !self.force_copy {
            match symlink(source, target).await {
                Ok(()) => return Ok(ArtifactKind::Symlink),
                Err(e) if e.kind() == ErrorKind::PermissionDenied || e.kind() == ErrorKind::Unsupported => {
                    debug!(source = %source.display(), error = %e, "Symlink refused, falling back");
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("failed to link {} -> {}", target.display(), source.display())
                    })
                }
            }
        }

        let metadata = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("failed to stat {}", source.display()))?;
        if metadata.is_dir() {
            copy_dir(source.to_path_buf(), target.to_path_buf()).await?;
            return Ok(ArtifactKind::Copy);
        }
        if !self.force_copy && tokio::fs::hard_link(source, target).await.is_ok() {
            return Ok(ArtifactKind::HardLink);
        }
        tokio::fs::copy(source, target)
            .await
            .with_context(|| format!("failed to copy {}", source.display()))?;
        Ok(ArtifactKind::Copy)
    }
}

#[async_trait]
impl IMaterializer for LocalMaterializer {
    async fn materialize(&self, source: &Path, central_folder: &Path) -> Result<PathBuf> {
        for attempt in 1..=MAX_CANDIDATES {
            let target = Self::artifact_path(source, central_folder, attempt)
                .with_context(|| format!("{} has no file name", source.display()))?;
            if target == source {
                return Ok(target);
            }

            match Self::slot(&target, source).await? {
                Slot::Ours | Slot::Unknown => return Ok(target),
                Slot::Foreign => {
                    debug!(target = %target.display(), "Artifact name taken by another source");
                    continue;
                }
                Slot::Free => {}
            }

            tokio::fs::create_dir_all(central_folder)
                .await
                .with_context(|| format!("failed to create {}", central_folder.display()))?;
            let kind = self.create(source, &target).await?;
            info!(
                source = %source.display(),
                target = %target.display(),
                ?kind,
                "Materialized in central folder"
            );
            return Ok(target);
        }
        bail!(
            "no free artifact name for {} in {}",
            source.display(),
            central_folder.display()
        )
    }

    async fn remove(&self, source: &Path, central_folder: &Path) -> Result<bool> {
        let mut found = None;
        for attempt in 1..=MAX_CANDIDATES {
            let Some(target) = Self::artifact_path(source, central_folder, attempt) else {
                return Ok(false);
            };
            if target == source {
                return Ok(false);
            }
            match Self::slot(&target, source).await? {
                Slot::Free => return Ok(false),
                Slot::Foreign => continue,
                Slot::Ours | Slot::Unknown => {
                    found = Some(target);
                    break;
                }
            }
        }
        let Some(target) = found else {
            return Ok(false);
        };

        let metadata = tokio::fs::symlink_metadata(&target)
            .await
            .with_context(|| format!("failed to stat {}", target.display()))?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        }
        .with_context(|| format!("failed to remove {}", target.display()))?;

        debug!(target = %target.display(), "Removed central folder artifact");
        Ok(true)
    }
}

#[cfg(unix)]
async fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(source, target).await
}

#[cfg(windows)]
async fn symlink(source: &Path, target: &Path) -> std::io::Result<()> {
    if tokio::fs::metadata(source).await?.is_dir() {
        tokio::fs::symlink_dir(source, target).await
    } else {
        tokio::fs::symlink_file(source, target).await
    }
}

fn copy_dir(source: PathBuf, target: PathBuf) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(&target)
            .await
            .with_context(|| format!("failed to create {}", target.display()))?;
        let mut entries = tokio::fs::read_dir(&source)
            .await
            .with_context(|| format!("failed to read {}", source.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let from = entry.path();
            let to = target.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                copy_dir(from, to).await?;
            } else {
                tokio::fs::copy(&from, &to)
                    .await
                    .with_context(|| format!("failed to copy {}", from.display()))?;
            }
        }
        Ok(())
    })
}
