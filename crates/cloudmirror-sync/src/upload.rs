//! Upload Walker
//!
//! Depth-first, pre-order mirror of a local tree into a remote folder. A
//! directory's remote folder is created and recorded before any of its
//! children are uploaded, so an interrupted walk resumes on the next run
//! without creating duplicates.

use std::fs::Metadata;
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;

use tracing::{debug, info};

use cloudmirror_core::domain::{
    newtypes::{RemoteId, SyncPath},
    properties::RemoteProperties,
    record::RemoteRecord,
};
use cloudmirror_core::ports::{CleanupHooks, IMappingStore, UploadHooks};

use crate::cleanup::cleanup_tree;
use crate::context::WalkContext;
use crate::SyncError;

/// Counts of the remote actions one upload walk performed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub folders_created: u32,
    pub folders_reused: u32,
    pub files_created: u32,
    pub files_updated: u32,
    pub excluded: u32,
}

impl UploadSummary {
    /// Number of new remote objects
    pub fn created(&self) -> u32 {
        self.folders_created + self.files_created
    }
}

/// Uploads `local_path` (file or directory) under `remote_parent_id`
///
/// Paths equal to an entry of `exclude` are skipped together with their
/// subtree. Only a vanished `local_path` surfaces as
/// [`SyncError::SourceMissing`]; a descendant that disappears during the walk
/// has its own remote copy cleaned up and the walk goes on. Dangling symlinks
/// are skipped.
pub async fn upload_tree<H>(
    local_path: &SyncPath,
    remote_parent_id: &RemoteId,
    hooks: &H,
    store: &dyn IMappingStore,
    ctx: &WalkContext,
    exclude: &[SyncPath],
) -> Result<UploadSummary, SyncError>
where
    H: UploadHooks + CleanupHooks + ?Sized,
{
    let walker = Uploader {
        hooks,
        store,
        ctx,
        exclude,
    };
    let mut summary = UploadSummary::default();
    walker
        .visit(local_path, remote_parent_id, 0, &mut summary)
        .await?;

    info!(
        path = %local_path,
        scope = %ctx.scope,
        created = summary.created(),
        updated = summary.files_updated,
        reused = summary.folders_reused,
        "Upload walk finished"
    );
    Ok(summary)
}

struct Uploader<'w, H: ?Sized> {
    hooks: &'w H,
    store: &'w dyn IMappingStore,
    ctx: &'w WalkContext,
    exclude: &'w [SyncPath],
}

impl<'w, H> Uploader<'w, H>
where
    H: UploadHooks + CleanupHooks + ?Sized,
{
    fn visit<'a>(
        &'a self,
        path: &'a SyncPath,
        parent_id: &'a RemoteId,
        depth: usize,
        summary: &'a mut UploadSummary,
    ) -> Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send + 'a>>
    where
        'w: 'a,
    {
        Box::pin(async move {
            self.ctx.checkpoint()?;
            self.ctx.check_depth(depth, path.as_path())?;

            if self.exclude.contains(path) {
                debug!(path = %path, "Excluded from upload");
                summary.excluded += 1;
                return Ok(());
            }

            let metadata = match stat_source(path).await {
                Ok(Some(metadata)) => metadata,
                Ok(None) if depth > 0 => return self.forget_vanished(path).await,
                Ok(None) => {
                    debug!(path = %path, "Skipping dangling symlink");
                    return Ok(());
                }
                Err(e) if depth > 0 && e.kind() == ErrorKind::NotFound => {
                    return self.forget_vanished(path).await;
                }
                Err(e) => return Err(SyncError::source_io(path.as_path(), e)),
            };
            let existing = self.store.get(path, &self.ctx.scope).await?;

            if metadata.is_dir() {
                let folder_id = self.upload_dir(path, parent_id, existing, summary).await?;
                let children = match list_dir_sorted(path).await {
                    Err(e) if depth > 0 && e.is_source_missing() => {
                        return self.forget_vanished(path).await;
                    }
                    listed => listed?,
                };
                for child in children {
                    self.visit(&child, &folder_id, depth + 1, summary).await?;
                }
            } else if metadata.is_file() {
                self.upload_file(path, parent_id, existing, summary).await?;
            } else {
                debug!(path = %path, "Skipping special file");
            }
            Ok(())
        })
    }

    /// Drops the remote copy of a child that is gone or now a dangling link
    async fn forget_vanished(&self, path: &SyncPath) -> Result<(), SyncError> {
        if self.store.get(path, &self.ctx.scope).await?.is_none() {
            debug!(path = %path, "Skipping dangling or vanished entry");
            return Ok(());
        }
        debug!(path = %path, "Tracked source vanished during walk, removing remote copy");
        cleanup_tree(path, self.hooks, self.store, self.ctx).await?;
        Ok(())
    }

    /// Removes a tracked object whose kind no longer matches the local path
    async fn drop_replaced(
        &self,
        path: &SyncPath,
        existing: Option<RemoteRecord>,
        is_directory: bool,
    ) -> Result<Option<RemoteRecord>, SyncError> {
        match existing {
            Some(record) if record.is_directory != is_directory => {
                debug!(
                    path = %path,
                    remote_id = %record.remote_id,
                    was_directory = record.is_directory,
                    "Local kind changed, removing old remote object"
                );
                cleanup_tree(path, self.hooks, self.store, self.ctx).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn upload_dir(
        &self,
        path: &SyncPath,
        parent_id: &RemoteId,
        existing: Option<RemoteRecord>,
        summary: &mut UploadSummary,
    ) -> Result<RemoteId, SyncError> {
        let existing = self.drop_replaced(path, existing, true).await?;
        let folder_id = match existing {
            Some(record) if record.is_directory && record.parent_id == *parent_id => {
                debug!(path = %path, remote_id = %record.remote_id, "Reusing remote folder");
                summary.folders_reused += 1;
                record.remote_id
            }
            _ => {
                let name = path.file_name().unwrap_or_else(|| path.to_key());
                let id = self
                    .ctx
                    .once(self.hooks.upload_folder(&name, parent_id, path))
                    .await?;
                self.tag(&id, path).await?;
                debug!(path = %path, remote_id = %id, "Created remote folder");
                summary.folders_created += 1;
                id
            }
        };

        let record = RemoteRecord::new(folder_id.clone(), parent_id.clone(), true, &self.ctx.scope);
        self.store.set(path, &record).await?;
        Ok(folder_id)
    }

    async fn upload_file(
        &self,
        path: &SyncPath,
        parent_id: &RemoteId,
        existing: Option<RemoteRecord>,
        summary: &mut UploadSummary,
    ) -> Result<(), SyncError> {
        let existing = self.drop_replaced(path, existing, false).await?;
        let file_id = match existing {
            Some(record) if !record.is_directory && record.parent_id == *parent_id => {
                let id = record.remote_id;
                self.ctx
                    .retry("update_file", || self.hooks.update_file(&id, path))
                    .await?;
                debug!(path = %path, remote_id = %id, "Updated remote file");
                summary.files_updated += 1;
                id
            }
            _ => {
                let id = self
                    .ctx
                    .once(self.hooks.upload_file(path, parent_id))
                    .await?;
                self.tag(&id, path).await?;
                debug!(path = %path, remote_id = %id, "Uploaded new file");
                summary.files_created += 1;
                id
            }
        };

        let record = RemoteRecord::new(file_id, parent_id.clone(), false, &self.ctx.scope);
        self.store.set(path, &record).await?;
        Ok(())
    }

    /// Attaches the origin properties used to steer same-OS restores
    async fn tag(&self, id: &RemoteId, path: &SyncPath) -> Result<(), SyncError> {
        let properties = RemoteProperties::for_upload(path);
        self.ctx
            .retry("set_metadata", || self.hooks.set_metadata(id, &properties))
            .await
    }
}

/// Stats a source without failing on dangling symlinks
///
/// Links are followed. `Ok(None)` means the path is a symlink whose target
/// does not exist.
async fn stat_source(path: &SyncPath) -> std::io::Result<Option<Metadata>> {
    let link = tokio::fs::symlink_metadata(path.as_path()).await?;
    if !link.file_type().is_symlink() {
        return Ok(Some(link));
    }
    match tokio::fs::metadata(path.as_path()).await {
        Ok(target) => Ok(Some(target)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Lists a directory's children sorted by name
async fn list_dir_sorted(dir: &SyncPath) -> Result<Vec<SyncPath>, SyncError> {
    let mut entries = tokio::fs::read_dir(dir.as_path())
        .await
        .map_err(|e| SyncError::source_io(dir.as_path(), e))?;

    let mut children = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SyncError::io(dir.as_path(), e))?
    {
        children.push(SyncPath::new(entry.path())?);
    }
    children.sort();
    Ok(children)
}
