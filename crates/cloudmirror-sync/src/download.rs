//! Download Walker
//!
//! Restores a remote tree to local disk. Items uploaded from the same
//! operating system go back to their recorded `originalPath` and are tracked
//! again; everything else lands under the target directory by name and is
//! left untracked.
//!
//! File content is streamed into a temporary sibling and renamed into place,
//! so a failed download never leaves a truncated file at the target path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use cloudmirror_core::domain::{
    newtypes::{RemoteId, SyncPath},
    record::{Provider, RemoteRecord},
};
use cloudmirror_core::ports::{DownloadHooks, IMappingStore, RemoteEntry};

use crate::context::WalkContext;
use crate::lock::LOCK_SENTINEL_NAME;
use crate::SyncError;

/// Suffix of in-progress download files
const PARTIAL_SUFFIX: &str = ".cloudmirror-part";

/// One item processed by a download walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedEntry {
    pub remote_id: RemoteId,
    pub parent_id: RemoteId,
    pub local_path: PathBuf,
    pub provider: Provider,
    pub account: String,
    pub originating_os: Option<String>,
    pub is_directory: bool,
}

impl DownloadedEntry {
    /// Returns true if the item was restored to its original path
    pub fn is_same_os(&self) -> bool {
        self.originating_os.as_deref() == Some(cloudmirror_core::domain::properties::current_os())
    }
}

/// Downloads every child of `remote_parent_id` into `local_dir`
///
/// Each processed item is appended to `downloaded`.
pub async fn download_tree<H>(
    remote_parent_id: &RemoteId,
    local_dir: &SyncPath,
    hooks: &H,
    store: &dyn IMappingStore,
    ctx: &WalkContext,
    downloaded: &mut Vec<DownloadedEntry>,
) -> Result<(), SyncError>
where
    H: DownloadHooks + ?Sized,
{
    let before = downloaded.len();
    let walker = Downloader { hooks, store, ctx };
    walker.visit(remote_parent_id, local_dir, 0, downloaded).await?;
    info!(
        target_dir = %local_dir,
        scope = %ctx.scope,
        items = downloaded.len() - before,
        "Download walk finished"
    );
    Ok(())
}

struct Downloader<'w, H: ?Sized> {
    hooks: &'w H,
    store: &'w dyn IMappingStore,
    ctx: &'w WalkContext,
}

impl<'w, H> Downloader<'w, H>
where
    H: DownloadHooks + ?Sized,
{
    fn visit<'a>(
        &'a self,
        parent_id: &'a RemoteId,
        local_dir: &'a SyncPath,
        depth: usize,
        downloaded: &'a mut Vec<DownloadedEntry>,
    ) -> Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send + 'a>>
    where
        'w: 'a,
    {
        Box::pin(async move {
            self.ctx.checkpoint()?;
            self.ctx.check_depth(depth, local_dir.as_path())?;

            let children = self
                .ctx
                .retry("list_children", || self.hooks.list_children(parent_id))
                .await?;

            for child in children {
                self.ctx.checkpoint()?;

                if !child.is_folder && child.name == LOCK_SENTINEL_NAME {
                    continue;
                }

                let same_os_path = child.properties.same_os_original_path();
                let target = match &same_os_path {
                    Some(original) => original.clone(),
                    None => match local_dir.join(&child.name) {
                        Ok(target) => target,
                        Err(err) => {
                            warn!(name = %child.name, %err, "Skipping remote item with unusable name");
                            continue;
                        }
                    },
                };
                let same_os = same_os_path.is_some();

                if child.is_folder {
                    tokio::fs::create_dir_all(target.as_path())
                        .await
                        .map_err(|e| SyncError::io(target.as_path(), e))?;
                    self.record(&target, &child, parent_id, same_os, downloaded)
                        .await?;
                    self.visit(&child.id, &target, depth + 1, downloaded).await?;
                } else {
                    if !same_os && tokio::fs::try_exists(target.as_path()).await.unwrap_or(true) {
                        warn!(
                            path = %target,
                            remote_id = %child.id,
                            "Conflict: foreign item would overwrite an existing local file, skipping"
                        );
                        continue;
                    }
                    self.fetch(&child.id, target.as_path()).await?;
                    self.record(&target, &child, parent_id, same_os, downloaded)
                        .await?;
                }
            }
            Ok(())
        })
    }

    async fn record(
        &self,
        target: &SyncPath,
        child: &RemoteEntry,
        parent_id: &RemoteId,
        same_os: bool,
        downloaded: &mut Vec<DownloadedEntry>,
    ) -> Result<(), SyncError> {
        if same_os {
            let record = RemoteRecord::new(
                child.id.clone(),
                parent_id.clone(),
                child.is_folder,
                &self.ctx.scope,
            );
            self.store.set(target, &record).await?;
        }
        debug!(path = %target, remote_id = %child.id, same_os, "Downloaded");

        downloaded.push(DownloadedEntry {
            remote_id: child.id.clone(),
            parent_id: parent_id.clone(),
            local_path: target.as_path().to_path_buf(),
            provider: self.ctx.scope.provider,
            account: self.ctx.scope.account.clone(),
            originating_os: child.properties.originating_os().map(str::to_string),
            is_directory: child.is_folder,
        });
        Ok(())
    }

    /// Streams the remote content to `target` via a temporary sibling
    async fn fetch(&self, remote_id: &RemoteId, target: &Path) -> Result<(), SyncError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }

        let partial = partial_path(target);
        let result = self.write_partial(remote_id, &partial).await;
        let result = match result {
            Ok(bytes) => tokio::fs::rename(&partial, target)
                .await
                .map(|()| bytes)
                .map_err(|e| SyncError::io(target, e)),
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                debug!(path = %target.display(), bytes, "File content written");
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e)
            }
        }
    }

    async fn write_partial(&self, remote_id: &RemoteId, partial: &Path) -> Result<u64, SyncError> {
        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| SyncError::io(partial, e))?;
        let bytes = self.ctx.once(self.hooks.read_file(remote_id, &mut file)).await?;
        file.flush().await.map_err(|e| SyncError::io(partial, e))?;
        file.sync_all().await.map_err(|e| SyncError::io(partial, e))?;
        Ok(bytes)
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}
