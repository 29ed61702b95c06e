//! Download Walker: same-OS restores, foreign items, conflicts

use chrono::Utc;

use cloudmirror_core::domain::{
    newtypes::DeviceId,
    properties::{RemoteProperties, ORIGINAL_PATH_KEY, ORIGINATING_OS_KEY},
};
use cloudmirror_core::ports::{IMappingStore, RemoteError};
use cloudmirror_sync::download::download_tree;
use cloudmirror_sync::lock::LOCK_SENTINEL_NAME;
use cloudmirror_sync::memory::Op;
use cloudmirror_sync::upload::upload_tree;

use crate::common::{read, Fixture};

fn foreign_properties(original: &str) -> RemoteProperties {
    let mut props = RemoteProperties::new();
    props.insert(ORIGINAL_PATH_KEY, original);
    props.insert(ORIGINATING_OS_KEY, "plan9");
    props
}

#[tokio::test]
async fn test_same_os_round_trip_restores_original_paths() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;
    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();

    // Move the originals away and forget the mappings.
    std::fs::rename(docs.as_path(), fx.dir.path().join("docs-old")).unwrap();
    fx.store.delete_subtree(&docs, &fx.ctx.scope).await.unwrap();
    let target = fx.mkdir("restore");

    let mut downloaded = Vec::new();
    download_tree(&backup, &target, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &mut downloaded)
        .await
        .unwrap();

    assert_eq!(downloaded.len(), 4);
    assert!(downloaded.iter().all(|d| d.is_same_os()));
    assert_eq!(read(fx.path("docs/a.txt").as_path()), "alpha");
    assert_eq!(read(fx.path("docs/b/c.txt").as_path()), "gamma");
    assert_eq!(std::fs::read_dir(target.as_path()).unwrap().count(), 0);

    // Restored items are tracked again under their original paths.
    let keys = fx.store.keys(Some(&fx.ctx.scope)).await.unwrap();
    assert_eq!(keys.len(), 4);
    let c_rec = fx
        .store
        .get(&fx.path("docs/b/c.txt"), &fx.ctx.scope)
        .await
        .unwrap()
        .unwrap();
    let b_rec = fx
        .store
        .get(&fx.path("docs/b"), &fx.ctx.scope)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c_rec.parent_id, b_rec.remote_id);
}

#[tokio::test]
async fn test_foreign_items_land_under_target_untracked() {
    let fx = Fixture::new().await;
    let backup = fx.backup_folder().await;
    let folder = fx
        .backend
        .put(&backup, "Reports", true, &[], foreign_properties("C:\\Reports"))
        .unwrap();
    fx.backend
        .put(&folder, "q1.txt", false, b"numbers", foreign_properties("C:\\Reports\\q1.txt"))
        .unwrap();
    let target = fx.mkdir("central");

    let mut downloaded = Vec::new();
    download_tree(&backup, &target, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &mut downloaded)
        .await
        .unwrap();

    assert_eq!(downloaded.len(), 2);
    assert!(downloaded.iter().all(|d| !d.is_same_os()));
    assert_eq!(downloaded[0].originating_os.as_deref(), Some("plan9"));
    assert_eq!(read(&target.as_path().join("Reports").join("q1.txt")), "numbers");
    assert!(fx.store.keys(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_foreign_file_never_overwrites_existing_local_file() {
    let fx = Fixture::new().await;
    let backup = fx.backup_folder().await;
    fx.backend
        .put(&backup, "notes.txt", false, b"remote", foreign_properties("C:\\notes.txt"))
        .unwrap();
    let target = fx.mkdir("central");
    fx.write("central/notes.txt", "local");

    let mut downloaded = Vec::new();
    download_tree(&backup, &target, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &mut downloaded)
        .await
        .unwrap();

    assert!(downloaded.is_empty());
    assert_eq!(read(fx.path("central/notes.txt").as_path()), "local");
    assert_eq!(fx.backend.calls(Op::ReadFile), 0);
}

#[tokio::test]
async fn test_lock_sentinel_is_not_downloaded() {
    let fx = Fixture::new().await;
    let backup = fx.backup_folder().await;
    fx.backend
        .put(
            &backup,
            LOCK_SENTINEL_NAME,
            false,
            &[],
            RemoteProperties::for_lock(&DeviceId::new(), Utc::now()),
        )
        .unwrap();
    let target = fx.mkdir("central");

    let mut downloaded = Vec::new();
    download_tree(&backup, &target, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &mut downloaded)
        .await
        .unwrap();

    assert!(downloaded.is_empty());
    assert!(!target.as_path().join(LOCK_SENTINEL_NAME).exists());
}

#[tokio::test]
async fn test_failed_download_leaves_no_partial_file() {
    let fx = Fixture::new().await;
    let backup = fx.backup_folder().await;
    fx.backend
        .put(&backup, "big.bin", false, b"0123456789", foreign_properties("C:\\big.bin"))
        .unwrap();
    let target = fx.mkdir("central");
    fx.backend
        .fail_next(Op::ReadFile, RemoteError::Network("reset".into()));

    let mut downloaded = Vec::new();
    let result = download_tree(&backup, &target, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &mut downloaded)
        .await;

    assert!(result.is_err());
    assert_eq!(std::fs::read_dir(target.as_path()).unwrap().count(), 0);
    assert_eq!(fx.backend.calls(Op::ReadFile), 1);
}
