//! Sync orchestrator
//!
//! The [`SyncOrchestrator`] is the per-provider facade the UI and the CLI
//! drive. Every mutating operation follows the same sequence:
//!
//! 1. Read the central folder from settings (unset is fatal for the call)
//! 2. Resolve the backup folder, creating it on first use
//! 3. Take the distributed lock; if another device holds it, log and return
//!    a successful no-op
//! 4. Walk each path, isolating per-path failures
//! 5. Release the lock, logging and swallowing any release error
//!
//! Operations of one orchestrator are serialized by an internal mutex, so a
//! manual sync never interleaves with the periodic auto-sync.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cloudmirror_core::config::Config;
use cloudmirror_core::domain::{
    newtypes::{DeviceId, RemoteId, SyncPath},
    record::{Provider, Scope},
};
use cloudmirror_core::ports::{IMappingStore, IMaterializer, ISettings, RemoteBackend, StoreEvent};

use crate::cleanup::cleanup_tree;
use crate::compare::compare_tree;
use crate::context::{WalkContext, DEFAULT_MAX_DEPTH};
use crate::download::download_tree;
use crate::lock::{RemoteLock, DEFAULT_LOCK_TTL};
use crate::retry::RetryPolicy;
use crate::upload::{upload_tree, UploadSummary};
use crate::SyncError;

// ============================================================================
// Options and results
// ============================================================================

/// Tunables of one orchestrator
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub backup_folder_name: String,
    pub lock_ttl: Duration,
    pub max_depth: usize,
    pub retry: RetryPolicy,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            backup_folder_name: config.sync.backup_folder_name.clone(),
            lock_ttl: config.sync.lock_ttl(),
            max_depth: config.sync.max_depth,
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            backup_folder_name: cloudmirror_core::config::DEFAULT_BACKUP_FOLDER_NAME.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
            max_depth: DEFAULT_MAX_DEPTH,
            retry: RetryPolicy::default(),
        }
    }
}

/// A path of a batch that did not sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFailure {
    pub path: SyncPath,
    pub message: String,
    /// The local source had vanished; its remote copy was cleaned up
    pub source_missing: bool,
}

/// Outcome of [`SyncOrchestrator::sync`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// True when every path synced
    pub success: bool,
    pub failures: Vec<PathFailure>,
    /// True when the batch did not run because another device held the lock
    pub skipped: bool,
    pub uploaded: UploadSummary,
}

impl BatchResult {
    fn skipped() -> Self {
        Self {
            success: true,
            skipped: true,
            ..Self::default()
        }
    }

    /// Message of the first failed path
    pub fn first_failure(&self) -> Option<&str> {
        self.failures.first().map(|f| f.message.as_str())
    }
}

/// A tracked entry joined with the current state of its local path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedFile {
    pub path: SyncPath,
    /// Size in bytes of a local file, `None` for directories and missing paths
    pub size: Option<u64>,
    pub is_directory: bool,
    pub last_sync: DateTime<Utc>,
    pub provider: Provider,
    pub account: String,
    pub exists: bool,
}

/// Lists tracked entries with live local stats
pub async fn tracked_files(
    store: &dyn IMappingStore,
    scope: Option<&Scope>,
) -> anyhow::Result<Vec<TrackedFile>> {
    let mut tracked = Vec::new();
    for entry in store.entries(scope).await? {
        let metadata = tokio::fs::metadata(entry.path.as_path()).await.ok();
        tracked.push(TrackedFile {
            size: metadata.as_ref().filter(|m| m.is_file()).map(|m| m.len()),
            exists: metadata.is_some(),
            is_directory: entry.record.is_directory,
            last_sync: entry.record.last_sync,
            provider: entry.record.provider,
            account: entry.record.account,
            path: entry.path,
        });
    }
    Ok(tracked)
}

/// Reduces `paths` to the minimal set of roots
///
/// A path is dropped when another path of the set is its ancestor.
pub fn resolve_roots(paths: &[SyncPath]) -> Vec<SyncPath> {
    let mut sorted = paths.to_vec();
    sorted.sort();
    sorted.dedup();

    let mut roots: Vec<SyncPath> = Vec::new();
    for path in sorted {
        if !roots.iter().any(|root| path.is_within(root)) {
            roots.push(path);
        }
    }
    roots
}

enum Locked<T> {
    Ran(T),
    Held(Option<DeviceId>),
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SyncOrchestrator<B: RemoteBackend> {
    backend: Arc<B>,
    store: Arc<dyn IMappingStore>,
    settings: Arc<dyn ISettings>,
    materializer: Arc<dyn IMaterializer>,
    lock: RemoteLock,
    options: SyncOptions,
    cancel: CancellationToken,
    operation: tokio::sync::Mutex<()>,
    backup_folder: Mutex<Option<RemoteId>>,
}

impl<B: RemoteBackend> SyncOrchestrator<B> {
    pub fn new(
        backend: Arc<B>,
        store: Arc<dyn IMappingStore>,
        settings: Arc<dyn ISettings>,
        materializer: Arc<dyn IMaterializer>,
        device_id: DeviceId,
        options: SyncOptions,
    ) -> Self {
        let lock = RemoteLock::new(device_id, options.lock_ttl, options.backup_folder_name.clone())
            .with_retry(options.retry);
        Self {
            backend,
            store,
            settings,
            materializer,
            lock,
            options,
            cancel: CancellationToken::new(),
            operation: tokio::sync::Mutex::new(()),
            backup_folder: Mutex::new(None),
        }
    }

    pub fn scope(&self) -> Scope {
        self.backend.scope()
    }

    /// Token cancelling every running and future walk of this orchestrator
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads each of `paths` into the backup folder
    ///
    /// Paths equal to an entry of `exclude` are skipped with their subtree.
    /// A vanished path has its remote copy removed and is reported as a
    /// failure carrying the original error message.
    #[tracing::instrument(skip(self, paths, exclude), fields(scope = %self.scope(), paths = paths.len()))]
    pub async fn sync(
        &self,
        paths: &[SyncPath],
        exclude: &[SyncPath],
    ) -> Result<BatchResult, SyncError> {
        let _operation = self.operation.lock().await;
        let central = self.central_folder().await?;

        let outcome = self
            .with_lock(|folder| async move {
                self.sync_locked(paths, exclude, &central, &folder).await
            })
            .await?;

        match outcome {
            Locked::Ran(result) => {
                info!(
                    success = result.success,
                    failures = result.failures.len(),
                    created = result.uploaded.created(),
                    updated = result.uploaded.files_updated,
                    "Sync batch finished"
                );
                Ok(result)
            }
            Locked::Held(_) => Ok(BatchResult::skipped()),
        }
    }

    /// Compares every tracked root of this scope against the remote side
    ///
    /// Returns true if anything changed. Roots paused by the stop/resume
    /// policy are skipped; a failing root does not stop the others.
    #[tracing::instrument(skip(self), fields(scope = %self.scope()))]
    pub async fn auto_sync(&self) -> Result<bool, SyncError> {
        let _operation = self.operation.lock().await;
        self.central_folder().await?;

        let outcome = self
            .with_lock(|_folder| async move { self.auto_sync_locked().await })
            .await?;
        Ok(matches!(outcome, Locked::Ran(true)))
    }

    /// Restores the backup folder into local paths
    ///
    /// Returns true when the download ran and false when another device
    /// held the lock.
    #[tracing::instrument(skip(self), fields(scope = %self.scope()))]
    pub async fn pull(&self) -> Result<bool, SyncError> {
        let _operation = self.operation.lock().await;
        let central = self.central_folder().await?;
        let central_dir = SyncPath::new(central.clone())?;

        let outcome = self
            .with_lock(|folder| async move {
                self.pull_locked(&folder, &central, &central_dir).await
            })
            .await?;
        Ok(matches!(outcome, Locked::Ran(())))
    }

    /// Stops tracking `path`: deletes its remote copy, its mappings and its
    /// central-folder artifact
    ///
    /// Returns the number of remote deletions issued.
    #[tracing::instrument(skip(self), fields(scope = %self.scope()))]
    pub async fn untrack(&self, path: &SyncPath) -> Result<u32, SyncError> {
        let _operation = self.operation.lock().await;
        let central = self
            .settings
            .central_folder()
            .await
            .map_err(SyncError::Settings)?;

        let outcome = self
            .with_lock(|_folder| async move {
                let ctx = self.context();
                cleanup_tree(path, self.backend.as_ref(), self.store.as_ref(), &ctx).await
            })
            .await?;
        let deletions = match outcome {
            Locked::Ran(deletions) => deletions,
            Locked::Held(holder) => {
                return Err(SyncError::LockHeld {
                    holder: holder.map(|h| h.to_string()),
                })
            }
        };

        if let Some(central) = central {
            self.materializer
                .remove(path.as_path(), &central)
                .await
                .map_err(SyncError::Materialize)?;
        }
        info!(path = %path, deletions, "Path untracked");
        Ok(deletions)
    }

    /// Tracked entries of this scope with live local stats
    pub async fn list_tracked(&self) -> Result<Vec<TrackedFile>, SyncError> {
        Ok(tracked_files(self.store.as_ref(), Some(&self.scope())).await?)
    }

    /// Runs [`auto_sync`](Self::auto_sync) every `interval` until cancelled
    ///
    /// A policy change triggers an immediate run.
    pub async fn run(&self, interval: Duration) {
        info!(scope = %self.scope(), interval_secs = interval.as_secs(), "Auto-sync loop starting");

        let mut events = self.store.subscribe();
        let mut timer = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                _ = timer.tick() => {}

                event = events.recv() => match event {
                    Ok(StoreEvent::PolicyChanged(_)) => {
                        debug!("Policy changed, running auto-sync now");
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Store events lagged");
                    }
                    Err(RecvError::Closed) => {
                        info!("Mapping store closed");
                        break;
                    }
                },
            }

            match self.auto_sync().await {
                Ok(changed) => debug!(changed, "Auto-sync pass finished"),
                Err(SyncError::Cancelled) => break,
                Err(err) => error!(error = %err, "Auto-sync pass failed"),
            }
        }

        info!(scope = %self.scope(), "Auto-sync loop stopped");
    }

    /// Cancels running walks, removes lock sentinels and flushes the store
    #[tracing::instrument(skip(self), fields(scope = %self.scope()))]
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.cancel.cancel();
        let _operation = self.operation.lock().await;

        if let Some(folder) = self.cached_backup_folder() {
            self.lock
                .cleanup_on_exit(self.backend.as_ref(), &folder)
                .await;
        }
        self.store.flush().await.map_err(SyncError::Store)?;
        info!("Orchestrator shut down");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Locked bodies
    // ------------------------------------------------------------------------

    async fn sync_locked(
        &self,
        paths: &[SyncPath],
        exclude: &[SyncPath],
        central: &Path,
        backup_folder: &RemoteId,
    ) -> Result<BatchResult, SyncError> {
        let ctx = self.context();
        let mut result = BatchResult::default();

        for path in paths {
            let uploaded = upload_tree(
                path,
                backup_folder,
                self.backend.as_ref(),
                self.store.as_ref(),
                &ctx,
                exclude,
            )
            .await;

            match uploaded {
                Ok(summary) => {
                    accumulate(&mut result.uploaded, &summary);
                    if let Err(err) = self.materialize(path, central).await {
                        warn!(path = %path, error = %err, "Could not materialize synced path");
                        result.failures.push(PathFailure {
                            path: path.clone(),
                            message: err.to_string(),
                            source_missing: false,
                        });
                    }
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) if err.is_source_missing() => {
                    warn!(path = %path, error = %err, "Local source missing, removing remote copy");
                    if let Err(cleanup_err) =
                        cleanup_tree(path, self.backend.as_ref(), self.store.as_ref(), &ctx).await
                    {
                        warn!(path = %path, error = %cleanup_err, "Cleanup after missing source failed");
                    }
                    result.failures.push(PathFailure {
                        path: path.clone(),
                        message: err.to_string(),
                        source_missing: true,
                    });
                }
                Err(err) => {
                    error!(path = %path, error = %err, "Sync failed for path");
                    result.failures.push(PathFailure {
                        path: path.clone(),
                        message: err.to_string(),
                        source_missing: false,
                    });
                }
            }
        }

        result.success = result.failures.is_empty();
        Ok(result)
    }

    async fn auto_sync_locked(&self) -> Result<bool, SyncError> {
        let ctx = self.context();
        let scope = self.scope();
        let policy = self.store.policy().await?;
        let roots = resolve_roots(&self.store.keys(Some(&scope)).await?);

        let mut changed = false;
        for root in &roots {
            let Some(record) = self.store.get(root, &scope).await? else {
                continue;
            };
            match compare_tree(
                root,
                &record.remote_id,
                self.backend.as_ref(),
                self.store.as_ref(),
                &policy,
                &ctx,
            )
            .await
            {
                Ok(root_changed) => changed |= root_changed,
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => warn!(path = %root, error = %err, "Compare failed for root"),
            }
        }

        info!(roots = roots.len(), changed, "Auto-sync finished");
        Ok(changed)
    }

    async fn pull_locked(
        &self,
        backup_folder: &RemoteId,
        central: &Path,
        central_dir: &SyncPath,
    ) -> Result<(), SyncError> {
        let ctx = self.context();
        let mut downloaded = Vec::new();
        download_tree(
            backup_folder,
            central_dir,
            self.backend.as_ref(),
            self.store.as_ref(),
            &ctx,
            &mut downloaded,
        )
        .await?;

        let roots = resolve_roots(&self.store.keys(Some(&self.scope())).await?);
        for root in &roots {
            if let Err(err) = self.materialize(root, central).await {
                warn!(path = %root, error = %err, "Could not materialize restored root");
            }
        }

        let restored = downloaded.iter().filter(|d| d.is_same_os()).count();
        info!(
            items = downloaded.len(),
            restored,
            foreign = downloaded.len() - restored,
            "Pull finished"
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn with_lock<T, F, Fut>(&self, body: F) -> Result<Locked<T>, SyncError>
    where
        F: FnOnce(RemoteId) -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let folder = self.backup_folder_id().await?;
        let acquisition = self.lock.acquire(self.backend.as_ref(), &folder).await?;
        self.remember_backup_folder(acquisition.backup_folder_id.clone());

        let lock_id = match acquisition.lock_id {
            Some(lock_id) if acquisition.acquired => lock_id,
            _ => {
                info!(holder = ?acquisition.holder, "Backup folder locked by another device, skipping");
                return Ok(Locked::Held(acquisition.holder));
            }
        };

        let result = body(acquisition.backup_folder_id).await;

        if let Err(err) = self.lock.release(self.backend.as_ref(), &lock_id).await {
            warn!(lock_id = %lock_id, error = %err, "Failed to release lock");
        }
        result.map(Locked::Ran)
    }

    fn context(&self) -> WalkContext {
        WalkContext::new(self.scope())
            .with_cancel(self.cancel.child_token())
            .with_max_depth(self.options.max_depth)
            .with_retry(self.options.retry)
    }

    async fn central_folder(&self) -> Result<PathBuf, SyncError> {
        self.settings
            .central_folder()
            .await
            .map_err(SyncError::Settings)?
            .ok_or(SyncError::CentralFolderMissing)
    }

    async fn backup_folder_id(&self) -> Result<RemoteId, SyncError> {
        if let Some(folder) = self.cached_backup_folder() {
            return Ok(folder);
        }
        let folder = self.lock.resolve_backup_folder(self.backend.as_ref()).await?;
        self.remember_backup_folder(folder.clone());
        Ok(folder)
    }

    fn cached_backup_folder(&self) -> Option<RemoteId> {
        self.backup_folder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_backup_folder(&self, folder: RemoteId) {
        *self
            .backup_folder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(folder);
    }

    /// Materializes `path` unless it already lives in the central folder
    async fn materialize(&self, path: &SyncPath, central: &Path) -> Result<(), SyncError> {
        if path.as_path().starts_with(central) {
            return Ok(());
        }
        self.materializer
            .materialize(path.as_path(), central)
            .await
            .map_err(SyncError::Materialize)?;
        Ok(())
    }
}

fn accumulate(total: &mut UploadSummary, walk: &UploadSummary) {
    total.folders_created += walk.folders_created;
    total.folders_reused += walk.folders_reused;
    total.files_created += walk.files_created;
    total.files_updated += walk.files_updated;
    total.excluded += walk.excluded;
}
