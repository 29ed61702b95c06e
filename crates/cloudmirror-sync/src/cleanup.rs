//! Cleanup Walker
//!
//! Removes the remote counterparts of a local subtree and forgets the
//! subtree's mappings. Only top-most records are deleted remotely; folder
//! deletion is recursive on every backend.

use tracing::{debug, info};

use cloudmirror_core::domain::newtypes::SyncPath;
use cloudmirror_core::ports::{CleanupHooks, IMappingStore, RemoteError};

use crate::context::WalkContext;
use crate::SyncError;

/// Deletes every remote object tracked at or under `local_path`
///
/// Returns the number of remote delete calls issued.
pub async fn cleanup_tree<H>(
    local_path: &SyncPath,
    hooks: &H,
    store: &dyn IMappingStore,
    ctx: &WalkContext,
) -> Result<u32, SyncError>
where
    H: CleanupHooks + ?Sized,
{
    let mut entries: Vec<_> = store
        .entries(Some(&ctx.scope))
        .await?
        .into_iter()
        .filter(|entry| entry.path.is_within(local_path))
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut deleted_folders: Vec<SyncPath> = Vec::new();
    let mut deletions = 0;
    for entry in &entries {
        if deleted_folders.iter().any(|dir| entry.path.is_within(dir)) {
            continue;
        }

        let remote_id = &entry.record.remote_id;
        let is_directory = entry.record.is_directory;
        match ctx
            .retry("delete_remote", || hooks.delete_remote(remote_id, is_directory))
            .await
        {
            Ok(()) => {}
            Err(SyncError::Remote(RemoteError::NotFound(_))) => {
                debug!(path = %entry.path, remote_id = %remote_id, "Remote object already gone");
            }
            Err(e) => return Err(e),
        }
        deletions += 1;
        if is_directory {
            deleted_folders.push(entry.path.clone());
        }
    }

    let removed = store.delete_subtree(local_path, &ctx.scope).await?;
    info!(
        path = %local_path,
        scope = %ctx.scope,
        deletions,
        removed,
        "Cleanup walk finished"
    );
    Ok(deletions)
}
