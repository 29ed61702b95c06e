//! Distributed lock over a remote backup folder
//!
//! Devices sharing a backup folder serialize their mutations through a
//! zero-byte sentinel object named [`LOCK_SENTINEL_NAME`] inside the folder.
//! The sentinel carries the owner's device id and its creation time as
//! remote properties.
//!
//! ## Acquisition
//!
//! 1. Make sure the backup folder still exists, re-resolving it by name
//!    if it was deleted remotely.
//! 2. Inspect existing sentinels. A live sentinel (younger than the TTL)
//!    owned by another device means the lock is held. Stale sentinels and
//!    sentinels of this device are removed.
//! 3. Create a fresh sentinel.
//! 4. List again. If other live sentinels are present, another device raced
//!    us between steps 2 and 3. The sentinel with the earliest `createdAt`
//!    wins, ties broken by the smaller sentinel id. Every other racer
//!    withdraws its sentinel and reports the lock as held, so exactly one of
//!    the racers acquires.
//!
//! Release and exit cleanup treat "already gone" and "forbidden" as success.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cloudmirror_core::domain::{
    newtypes::{DeviceId, RemoteId},
    properties::RemoteProperties,
};
use cloudmirror_core::ports::{LockHooks, RemoteEntry};

use crate::retry::{with_retry, RetryPolicy};
use crate::SyncError;

/// Name of the lock sentinel inside the backup folder
pub const LOCK_SENTINEL_NAME: &str = ".cloudmirror.lock";

/// Default lock time-to-live
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(600);

/// Outcome of [`RemoteLock::acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAcquisition {
    pub acquired: bool,
    /// Id of our sentinel when acquired
    pub lock_id: Option<RemoteId>,
    /// Backup folder the lock lives in, possibly re-resolved
    pub backup_folder_id: RemoteId,
    /// Device holding the lock when not acquired, if known
    pub holder: Option<DeviceId>,
}

/// A sentinel found in the backup folder
#[derive(Debug, Clone)]
struct Sentinel {
    id: RemoteId,
    owner: Option<DeviceId>,
    created_at: Option<DateTime<Utc>>,
}

impl Sentinel {
    fn from_entry(entry: RemoteEntry) -> Self {
        Self {
            owner: entry.properties.device_id(),
            created_at: entry.properties.created_at(),
            id: entry.id,
        }
    }

    /// Race order: earliest creation first, then smallest id
    fn precedes(&self, other: &Sentinel) -> bool {
        (self.created_at, &self.id) < (other.created_at, &other.id)
    }

    /// A sentinel without a readable timestamp counts as stale
    fn is_live(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.created_at.is_some_and(|created| now - created < ttl)
    }
}

/// Lock handle bound to one device and one backup folder name
#[derive(Debug, Clone)]
pub struct RemoteLock {
    device_id: DeviceId,
    ttl: chrono::Duration,
    backup_folder_name: String,
    retry: RetryPolicy,
}

impl RemoteLock {
    pub fn new(device_id: DeviceId, ttl: Duration, backup_folder_name: impl Into<String>) -> Self {
        Self {
            device_id,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100)),
            backup_folder_name: backup_folder_name.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn backup_folder_name(&self) -> &str {
        &self.backup_folder_name
    }

    /// Finds or creates the backup folder
    pub async fn resolve_backup_folder<H>(&self, hooks: &H) -> Result<RemoteId, SyncError>
    where
        H: LockHooks + ?Sized,
    {
        Ok(with_retry(&self.retry, "ensure_backup_folder", || {
            hooks.ensure_backup_folder(&self.backup_folder_name)
        })
        .await?)
    }

    /// Tries to take the lock in `backup_folder_id`
    pub async fn acquire<H>(
        &self,
        hooks: &H,
        backup_folder_id: &RemoteId,
    ) -> Result<LockAcquisition, SyncError>
    where
        H: LockHooks + ?Sized,
    {
        let exists = with_retry(&self.retry, "folder_exists", || {
            hooks.folder_exists(backup_folder_id)
        })
        .await?;
        let folder_id = if exists {
            backup_folder_id.clone()
        } else {
            warn!(folder_id = %backup_folder_id, "Backup folder vanished, re-resolving");
            self.resolve_backup_folder(hooks).await?
        };

        let now = Utc::now();
        for sentinel in self.sentinels(hooks, &folder_id).await? {
            let foreign = sentinel.owner != Some(self.device_id);
            if foreign && sentinel.is_live(now, self.ttl) {
                info!(
                    holder = ?sentinel.owner,
                    created_at = ?sentinel.created_at,
                    "Backup folder locked by another device"
                );
                return Ok(LockAcquisition {
                    acquired: false,
                    lock_id: None,
                    backup_folder_id: folder_id,
                    holder: sentinel.owner,
                });
            }
            debug!(sentinel_id = %sentinel.id, foreign, "Removing stale or own sentinel");
            self.delete_quietly(hooks, &sentinel.id).await?;
        }

        let properties = RemoteProperties::for_lock(&self.device_id, Utc::now());
        let lock_id = hooks
            .create_sentinel(&folder_id, LOCK_SENTINEL_NAME, &properties)
            .await?;
        let ours = Sentinel {
            id: lock_id.clone(),
            owner: Some(self.device_id),
            created_at: properties.created_at(),
        };

        let now = Utc::now();
        let winner = self
            .sentinels(hooks, &folder_id)
            .await?
            .into_iter()
            .filter(|s| s.id != lock_id && s.is_live(now, self.ttl))
            .fold(ours, |best, s| if s.precedes(&best) { s } else { best });
        if winner.id != lock_id {
            let rival = winner;
            info!(
                holder = ?rival.owner,
                "Lost lock race, withdrawing sentinel"
            );
            self.delete_quietly(hooks, &lock_id).await?;
            return Ok(LockAcquisition {
                acquired: false,
                lock_id: None,
                backup_folder_id: folder_id,
                holder: rival.owner,
            });
        }

        info!(lock_id = %lock_id, device_id = %self.device_id, "Lock acquired");
        Ok(LockAcquisition {
            acquired: true,
            lock_id: Some(lock_id),
            backup_folder_id: folder_id,
            holder: Some(self.device_id),
        })
    }

    /// Deletes our sentinel; "already gone" and "forbidden" are success
    pub async fn release<H>(&self, hooks: &H, lock_id: &RemoteId) -> Result<(), SyncError>
    where
        H: LockHooks + ?Sized,
    {
        self.delete_quietly(hooks, lock_id).await?;
        info!(lock_id = %lock_id, "Lock released");
        Ok(())
    }

    /// Best-effort removal of every sentinel, regardless of owner or age
    ///
    /// Used at process shutdown. Never fails.
    pub async fn cleanup_on_exit<H>(&self, hooks: &H, backup_folder_id: &RemoteId)
    where
        H: LockHooks + ?Sized,
    {
        let sentinels = match self.sentinels(hooks, backup_folder_id).await {
            Ok(sentinels) => sentinels,
            Err(err) => {
                debug!(%err, "Exit cleanup could not list sentinels");
                return;
            }
        };
        for sentinel in sentinels {
            if let Err(err) = self.delete_quietly(hooks, &sentinel.id).await {
                debug!(sentinel_id = %sentinel.id, %err, "Exit cleanup could not delete sentinel");
            }
        }
    }

    async fn sentinels<H>(
        &self,
        hooks: &H,
        folder_id: &RemoteId,
    ) -> Result<Vec<Sentinel>, SyncError>
    where
        H: LockHooks + ?Sized,
    {
        let children = with_retry(&self.retry, "list_children", || {
            hooks.list_children(folder_id)
        })
        .await?;
        Ok(children
            .into_iter()
            .filter(|child| !child.is_folder && child.name == LOCK_SENTINEL_NAME)
            .map(Sentinel::from_entry)
            .collect())
    }

    async fn delete_quietly<H>(&self, hooks: &H, id: &RemoteId) -> Result<(), SyncError>
    where
        H: LockHooks + ?Sized,
    {
        match with_retry(&self.retry, "delete_remote", || hooks.delete_remote(id, false)).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_gone_or_forbidden() => {
                debug!(sentinel_id = %id, %err, "Sentinel already gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
