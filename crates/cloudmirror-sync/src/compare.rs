//! Compare Walker
//!
//! Detects changes over paths already present in the mapping store. It never
//! discovers new local files; those are picked up by the next explicit
//! upload of their tracked ancestor.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cloudmirror_core::domain::{
    newtypes::{RemoteId, SyncPath},
    policy::StopSyncPolicy,
};
use cloudmirror_core::ports::{CompareHooks, IMappingStore, RemoteError};

use crate::context::WalkContext;
use crate::SyncError;

/// Compares the tracked tree at `local_path` against its remote counterpart
///
/// Returns true if anything changed: a newer local file was pushed as a new
/// version, or a vanished local path was deleted remotely and untracked.
/// Paths paused by `policy` are skipped.
pub async fn compare_tree<H>(
    local_path: &SyncPath,
    remote_id: &RemoteId,
    hooks: &H,
    store: &dyn IMappingStore,
    policy: &StopSyncPolicy,
    ctx: &WalkContext,
) -> Result<bool, SyncError>
where
    H: CompareHooks + ?Sized,
{
    let is_directory = store
        .get(local_path, &ctx.scope)
        .await?
        .map(|record| record.is_directory)
        .unwrap_or(false);

    let walker = Comparer {
        hooks,
        store,
        policy,
        ctx,
    };
    let changed = walker.visit(local_path, remote_id, is_directory, 0).await?;
    info!(path = %local_path, scope = %ctx.scope, changed, "Compare walk finished");
    Ok(changed)
}

struct Comparer<'w, H: ?Sized> {
    hooks: &'w H,
    store: &'w dyn IMappingStore,
    policy: &'w StopSyncPolicy,
    ctx: &'w WalkContext,
}

impl<'w, H> Comparer<'w, H>
where
    H: CompareHooks + ?Sized,
{
    fn visit<'a>(
        &'a self,
        path: &'a SyncPath,
        remote_id: &'a RemoteId,
        is_directory: bool,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<bool, SyncError>> + Send + 'a>>
    where
        'w: 'a,
    {
        Box::pin(async move {
            self.ctx.checkpoint()?;
            self.ctx.check_depth(depth, path.as_path())?;

            let paused = self.policy.is_paused(path);
            if paused && !self.policy.has_resumed_below(path) {
                debug!(path = %path, "Sync paused, skipping");
                return Ok(false);
            }

            let metadata = match tokio::fs::metadata(path.as_path()).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && paused => {
                    debug!(path = %path, "Paused path vanished, leaving remote copy");
                    return Ok(false);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    self.propagate_deletion(path, remote_id, is_directory).await?;
                    return Ok(true);
                }
                Err(e) => return Err(SyncError::io(path.as_path(), e)),
            };

            let changed = if metadata.is_dir() {
                let mut changed = false;
                for child in self.store.children(path, &self.ctx.scope).await? {
                    let child_changed = self
                        .visit(
                            &child.path,
                            &child.record.remote_id,
                            child.record.is_directory,
                            depth + 1,
                        )
                        .await?;
                    changed |= child_changed;
                }
                changed
            } else if paused {
                false
            } else {
                let modified = metadata
                    .modified()
                    .map_err(|e| SyncError::io(path.as_path(), e))?;
                self.compare_file(path, remote_id, modified.into()).await?
            };

            if changed {
                self.store.touch(path, &self.ctx.scope).await?;
            }
            Ok(changed)
        })
    }

    async fn compare_file(
        &self,
        path: &SyncPath,
        remote_id: &RemoteId,
        local_modified: DateTime<Utc>,
    ) -> Result<bool, SyncError> {
        let remote_modified = self
            .ctx
            .retry("get_remote_modified_time", || {
                self.hooks.get_remote_modified_time(remote_id)
            })
            .await?;

        if local_modified <= remote_modified {
            return Ok(false);
        }

        self.ctx
            .retry("new_version", || self.hooks.new_version(remote_id, path))
            .await?;
        debug!(
            path = %path,
            remote_id = %remote_id,
            %local_modified,
            %remote_modified,
            "Pushed new version"
        );
        Ok(true)
    }

    async fn propagate_deletion(
        &self,
        path: &SyncPath,
        remote_id: &RemoteId,
        is_directory: bool,
    ) -> Result<(), SyncError> {
        match self
            .ctx
            .retry("delete_remote", || {
                self.hooks.delete_remote(remote_id, is_directory)
            })
            .await
        {
            Ok(()) => {}
            Err(SyncError::Remote(RemoteError::NotFound(_))) => {
                debug!(path = %path, remote_id = %remote_id, "Remote object already gone");
            }
            Err(e) => return Err(e),
        }

        let removed = self.store.delete_subtree(path, &self.ctx.scope).await?;
        warn!(path = %path, remote_id = %remote_id, removed, "Local path vanished, removed remote copy");
        Ok(())
    }
}
