//! SyncOrchestrator end to end over the in-memory backend

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use cloudmirror_core::domain::{
    newtypes::{DeviceId, RemoteId},
    properties::RemoteProperties,
};
use cloudmirror_core::ports::{IMappingStore, StaticSettings};
use cloudmirror_sync::lock::{DEFAULT_LOCK_TTL, LOCK_SENTINEL_NAME};
use cloudmirror_sync::materializer::LocalMaterializer;
use cloudmirror_sync::memory::{MemoryBackend, Op};
use cloudmirror_sync::orchestrator::{SyncOptions, SyncOrchestrator};
use cloudmirror_sync::SyncError;

use crate::common::{fast_retry, read, Fixture, BACKUP_FOLDER};

fn central(fx: &Fixture) -> PathBuf {
    fx.dir.path().join("central")
}

fn orchestrator(fx: &Fixture, central: Option<PathBuf>) -> SyncOrchestrator<MemoryBackend> {
    let options = SyncOptions {
        backup_folder_name: BACKUP_FOLDER.to_string(),
        lock_ttl: DEFAULT_LOCK_TTL,
        max_depth: 64,
        retry: fast_retry(),
    };
    SyncOrchestrator::new(
        Arc::clone(&fx.backend),
        fx.store.clone(),
        Arc::new(StaticSettings::new(central)),
        Arc::new(LocalMaterializer::new()),
        DeviceId::new(),
        options,
    )
}

fn lock_sentinels(fx: &Fixture, folder: &RemoteId) -> usize {
    fx.backend
        .children_of(folder)
        .into_iter()
        .filter(|(_, node)| node.name == LOCK_SENTINEL_NAME)
        .count()
}

async fn hold_lock_elsewhere(fx: &Fixture) -> RemoteId {
    let folder = fx.backup_folder().await;
    fx.backend
        .put(
            &folder,
            LOCK_SENTINEL_NAME,
            false,
            &[],
            RemoteProperties::for_lock(&DeviceId::new(), Utc::now()),
        )
        .unwrap();
    folder
}

#[tokio::test]
async fn test_sync_uploads_materializes_and_releases_lock() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let orch = orchestrator(&fx, Some(central(&fx)));

    let result = orch.sync(&[docs.clone()], &[]).await.unwrap();
    assert!(result.success);
    assert!(!result.skipped);
    assert_eq!(result.uploaded.created(), 4);

    let folder = fx.backup_folder().await;
    assert_eq!(lock_sentinels(&fx, &folder), 0);
    assert_eq!(read(&central(&fx).join("docs").join("a.txt")), "alpha");
    assert_eq!(fx.store.keys(Some(&orch.scope())).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_missing_source_is_cleaned_up_and_reported() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let gone = fx.write("gone/x.txt", "x");
    let gone_dir = fx.path("gone");
    let orch = orchestrator(&fx, Some(central(&fx)));
    orch.sync(&[docs.clone(), gone_dir.clone()], &[]).await.unwrap();
    let gone_id = fx
        .store
        .get(&gone, &orch.scope())
        .await
        .unwrap()
        .unwrap()
        .remote_id;

    std::fs::remove_dir_all(gone_dir.as_path()).unwrap();
    let result = orch.sync(&[docs.clone(), gone_dir.clone()], &[]).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].source_missing);
    assert_eq!(result.failures[0].path, gone_dir);
    assert!(result
        .first_failure()
        .unwrap()
        .starts_with("Local source missing"));
    assert!(!fx.backend.exists(&gone_id));
    assert!(fx.store.get(&gone_dir, &orch.scope()).await.unwrap().is_none());
    // The healthy path of the batch still synced.
    assert!(fx.store.get(&docs, &orch.scope()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_central_folder_is_fatal() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let orch = orchestrator(&fx, None);

    let err = orch.sync(&[docs], &[]).await.unwrap_err();
    assert!(matches!(err, SyncError::CentralFolderMissing));
    assert_eq!(fx.backend.object_count(), 0);
    assert!(matches!(
        orch.pull().await,
        Err(SyncError::CentralFolderMissing)
    ));
}

#[tokio::test]
async fn test_lock_held_elsewhere_makes_sync_a_no_op() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    hold_lock_elsewhere(&fx).await;
    let orch = orchestrator(&fx, Some(central(&fx)));

    let result = orch.sync(&[docs], &[]).await.unwrap();
    assert!(result.success);
    assert!(result.skipped);
    assert_eq!(fx.backend.calls(Op::UploadFolder), 0);
    assert!(!orch.pull().await.unwrap());
    assert!(!orch.auto_sync().await.unwrap());
}

#[tokio::test]
async fn test_untrack_fails_while_locked_elsewhere() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    hold_lock_elsewhere(&fx).await;
    let orch = orchestrator(&fx, Some(central(&fx)));

    let err = orch.untrack(&docs).await.unwrap_err();
    assert!(matches!(err, SyncError::LockHeld { holder: Some(_) }));
}

#[tokio::test]
async fn test_auto_sync_propagates_local_deletion() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let orch = orchestrator(&fx, Some(central(&fx)));
    orch.sync(&[docs.clone()], &[]).await.unwrap();
    assert!(!orch.auto_sync().await.unwrap());

    std::fs::remove_file(fx.path("docs/a.txt").as_path()).unwrap();
    assert!(orch.auto_sync().await.unwrap());
    assert!(fx
        .store
        .get(&fx.path("docs/a.txt"), &orch.scope())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_auto_sync_respects_stopped_paths() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let orch = orchestrator(&fx, Some(central(&fx)));
    orch.sync(&[docs.clone()], &[]).await.unwrap();

    fx.store.stop_sync(&docs).await.unwrap();
    std::fs::remove_file(fx.path("docs/a.txt").as_path()).unwrap();
    assert!(!orch.auto_sync().await.unwrap());
    assert!(fx
        .store
        .get(&fx.path("docs/a.txt"), &orch.scope())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_pull_restores_moved_tree() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let orch = orchestrator(&fx, Some(central(&fx)));
    orch.sync(&[docs.clone()], &[]).await.unwrap();

    std::fs::rename(docs.as_path(), fx.dir.path().join("docs-old")).unwrap();
    assert!(orch.pull().await.unwrap());
    assert_eq!(read(&docs.as_path().join("b").join("c.txt")), "gamma");

    let folder = fx.backup_folder().await;
    assert_eq!(lock_sentinels(&fx, &folder), 0);
}

#[tokio::test]
async fn test_untrack_removes_remote_mappings_and_artifact() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let orch = orchestrator(&fx, Some(central(&fx)));
    orch.sync(&[docs.clone()], &[]).await.unwrap();
    let artifact = central(&fx).join("docs");
    assert!(std::fs::symlink_metadata(&artifact).is_ok());

    let deletions = orch.untrack(&docs).await.unwrap();
    assert_eq!(deletions, 1);
    assert!(fx.store.keys(None).await.unwrap().is_empty());
    assert!(std::fs::symlink_metadata(&artifact).is_err());
    // Only the backup folder remains remotely.
    assert_eq!(fx.backend.object_count(), 1);
    // The local source is untouched.
    assert_eq!(read(fx.path("docs/a.txt").as_path()), "alpha");
}

#[tokio::test]
async fn test_list_tracked_joins_local_stats() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let orch = orchestrator(&fx, Some(central(&fx)));
    orch.sync(&[docs.clone()], &[]).await.unwrap();
    std::fs::remove_file(fx.path("docs/b/c.txt").as_path()).unwrap();

    let tracked = orch.list_tracked().await.unwrap();
    assert_eq!(tracked.len(), 4);

    let a = tracked.iter().find(|t| t.path == fx.path("docs/a.txt")).unwrap();
    assert_eq!(a.size, Some(5));
    assert!(a.exists);
    let c = tracked.iter().find(|t| t.path == fx.path("docs/b/c.txt")).unwrap();
    assert!(!c.exists);
    assert_eq!(c.size, None);
    let d = tracked.iter().find(|t| t.path == docs).unwrap();
    assert!(d.is_directory);
    assert_eq!(d.size, None);
}

#[tokio::test]
async fn test_shutdown_cancels_and_clears_sentinels() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let orch = orchestrator(&fx, Some(central(&fx)));
    orch.sync(&[docs.clone()], &[]).await.unwrap();
    let folder = hold_lock_elsewhere(&fx).await;

    orch.shutdown().await.unwrap();
    assert_eq!(lock_sentinels(&fx, &folder), 0);

    let err = orch.sync(&[docs], &[]).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(lock_sentinels(&fx, &folder), 0);
}

#[tokio::test]
async fn test_run_loop_stops_on_cancel() {
    let fx = Fixture::new().await;
    let orch = orchestrator(&fx, Some(central(&fx)));
    orch.cancel_token().cancel();

    tokio::time::timeout(std::time::Duration::from_secs(5), orch.run(std::time::Duration::from_secs(60)))
        .await
        .expect("run loop did not stop after cancellation");
}

#[cfg(unix)]
#[tokio::test]
async fn test_broken_symlink_inside_root_keeps_backup() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let orch = orchestrator(&fx, Some(central(&fx)));
    orch.sync(&[docs.clone()], &[]).await.unwrap();
    let objects = fx.backend.object_count();

    std::os::unix::fs::symlink("/nonexistent/target", fx.path("docs/zz_broken").as_path())
        .unwrap();
    let result = orch.sync(&[docs.clone()], &[]).await.unwrap();

    assert!(result.success, "failures: {:?}", result.failures);
    assert_eq!(result.uploaded.created(), 0);
    assert_eq!(fx.backend.object_count(), objects);
    assert_eq!(fx.store.keys(Some(&orch.scope())).await.unwrap().len(), 4);
}

#[cfg(unix)]
#[tokio::test]
async fn test_untrack_keeps_artifact_of_same_named_root() {
    let fx = Fixture::new().await;
    fx.write("a/docs/x.txt", "first");
    fx.write("b/docs/x.txt", "second");
    let (first, second) = (fx.path("a/docs"), fx.path("b/docs"));
    let orch = orchestrator(&fx, Some(central(&fx)));
    let result = orch.sync(&[first.clone(), second.clone()], &[]).await.unwrap();
    assert!(result.success, "failures: {:?}", result.failures);

    assert_eq!(read(&central(&fx).join("docs").join("x.txt")), "first");
    assert_eq!(read(&central(&fx).join("docs (2)").join("x.txt")), "second");

    orch.untrack(&second).await.unwrap();
    assert!(std::fs::symlink_metadata(central(&fx).join("docs (2)")).is_err());
    assert_eq!(read(&central(&fx).join("docs").join("x.txt")), "first");
}
