//! Upload Walker against the in-memory backend

use cloudmirror_core::domain::properties::{current_os, ORIGINAL_PATH_KEY, ORIGINATING_OS_KEY};
use cloudmirror_core::ports::{IMappingStore, RemoteError};
use cloudmirror_sync::memory::Op;
use cloudmirror_sync::upload::upload_tree;
use cloudmirror_sync::SyncError;

use crate::common::Fixture;

#[tokio::test]
async fn test_docs_tree_produces_four_linked_records() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;

    let summary = upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    assert_eq!(summary.folders_created, 2);
    assert_eq!(summary.files_created, 2);

    let scope = &fx.ctx.scope;
    let docs_rec = fx.store.get(&docs, scope).await.unwrap().unwrap();
    let a_rec = fx.store.get(&fx.path("docs/a.txt"), scope).await.unwrap().unwrap();
    let b_rec = fx.store.get(&fx.path("docs/b"), scope).await.unwrap().unwrap();
    let c_rec = fx.store.get(&fx.path("docs/b/c.txt"), scope).await.unwrap().unwrap();

    assert!(docs_rec.is_directory);
    assert_eq!(docs_rec.parent_id, backup);
    assert!(!a_rec.is_directory);
    assert_eq!(a_rec.parent_id, docs_rec.remote_id);
    assert!(b_rec.is_directory);
    assert_eq!(b_rec.parent_id, docs_rec.remote_id);
    assert_eq!(c_rec.parent_id, b_rec.remote_id);
    assert_eq!(fx.store.keys(Some(scope)).await.unwrap().len(), 4);

    // Remote layout mirrors the local one and carries origin tags.
    let node = fx.backend.node(&docs_rec.remote_id).unwrap();
    assert_eq!(node.name, "docs");
    assert_eq!(
        node.properties.get(ORIGINAL_PATH_KEY),
        Some(docs.to_key().as_str())
    );
    assert_eq!(node.properties.get(ORIGINATING_OS_KEY), Some(current_os()));
    assert_eq!(fx.backend.node(&c_rec.remote_id).unwrap().content, b"gamma");
}

#[tokio::test]
async fn test_second_upload_creates_nothing_new() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;

    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    let objects = fx.backend.object_count();

    let summary = upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    assert_eq!(summary.created(), 0);
    assert_eq!(summary.folders_reused, 2);
    assert_eq!(summary.files_updated, 2);
    assert_eq!(fx.backend.object_count(), objects);
    assert_eq!(fx.backend.calls(Op::UploadFolder), 2);
    assert_eq!(fx.backend.calls(Op::UploadFile), 2);
}

#[tokio::test]
async fn test_new_file_in_tracked_tree_is_uploaded_on_next_run() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;
    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();

    let d = fx.write("docs/b/d.txt", "delta");
    let summary = upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    assert_eq!(summary.files_created, 1);

    let b_rec = fx.store.get(&fx.path("docs/b"), &fx.ctx.scope).await.unwrap().unwrap();
    let d_rec = fx.store.get(&d, &fx.ctx.scope).await.unwrap().unwrap();
    assert_eq!(d_rec.parent_id, b_rec.remote_id);
}

#[tokio::test]
async fn test_excluded_subtree_is_skipped() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;
    let exclude = vec![fx.path("docs/b")];

    let summary = upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &exclude)
        .await
        .unwrap();
    assert_eq!(summary.excluded, 1);
    assert_eq!(summary.created(), 2);

    let keys = fx.store.keys(Some(&fx.ctx.scope)).await.unwrap();
    assert_eq!(keys, vec![docs.clone(), fx.path("docs/a.txt")]);
}

#[tokio::test]
async fn test_missing_source_is_reported() {
    let fx = Fixture::new().await;
    let backup = fx.backup_folder().await;
    let missing = fx.path("nowhere");

    let err = upload_tree(&missing, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap_err();
    assert!(err.is_source_missing(), "unexpected error: {err}");
    assert_eq!(fx.backend.object_count(), 1);
}

#[tokio::test]
async fn test_interrupted_upload_resumes_without_duplicates() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;

    fx.backend
        .fail_next(Op::UploadFile, RemoteError::Other("disk full".into()));
    let err = upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Remote(RemoteError::Other(_))));
    // The folder made it out before the failure and was recorded.
    assert!(fx.store.get(&docs, &fx.ctx.scope).await.unwrap().is_some());

    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    // backup + docs + a.txt + b + c.txt
    assert_eq!(fx.backend.object_count(), 5);
    assert_eq!(fx.backend.children_of(&backup).len(), 1);
}

#[tokio::test]
async fn test_transient_metadata_failure_is_retried() {
    let fx = Fixture::new().await;
    let a = fx.write("a.txt", "alpha");
    let backup = fx.backup_folder().await;

    fx.backend
        .fail_next(Op::SetMetadata, RemoteError::Network("reset".into()));
    upload_tree(&a, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    assert_eq!(fx.backend.calls(Op::SetMetadata), 2);
    assert_eq!(fx.backend.calls(Op::UploadFile), 1);
}

#[tokio::test]
async fn test_transient_create_failure_is_not_retried() {
    let fx = Fixture::new().await;
    let a = fx.write("a.txt", "alpha");
    let backup = fx.backup_folder().await;

    fx.backend
        .fail_next(Op::UploadFile, RemoteError::Network("reset".into()));
    let result = upload_tree(&a, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[]).await;
    assert!(matches!(result, Err(SyncError::Remote(RemoteError::Network(_)))));
    assert_eq!(fx.backend.calls(Op::UploadFile), 1);
}

#[tokio::test]
async fn test_depth_limit() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;
    let ctx = fx.ctx.clone().with_max_depth(1);

    let err = upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &ctx, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DepthExceeded { max_depth: 1, .. }));
}

#[tokio::test]
async fn test_cancelled_walk_makes_no_remote_calls() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;
    fx.ctx.cancel.cancel();

    let err = upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(fx.backend.calls(Op::UploadFolder), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_dangling_symlink_is_skipped() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;
    let broken = fx.path("docs/zz_broken");
    std::os::unix::fs::symlink("/nonexistent/target", broken.as_path()).unwrap();

    let summary = upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    assert_eq!(summary.created(), 4);
    assert!(fx.store.get(&broken, &fx.ctx.scope).await.unwrap().is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_link_turned_dangling_drops_only_its_copy() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let target = fx.write("elsewhere/t.txt", "tee");
    let link = fx.path("docs/link.txt");
    std::os::unix::fs::symlink(target.as_path(), link.as_path()).unwrap();
    let backup = fx.backup_folder().await;

    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    let link_id = fx.store.get(&link, &fx.ctx.scope).await.unwrap().unwrap().remote_id;
    assert_eq!(fx.backend.node(&link_id).unwrap().content, b"tee");

    std::fs::remove_file(target.as_path()).unwrap();
    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();

    assert!(!fx.backend.exists(&link_id));
    assert!(fx.store.get(&link, &fx.ctx.scope).await.unwrap().is_none());
    assert_eq!(fx.store.keys(Some(&fx.ctx.scope)).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_directory_replaced_by_file_removes_old_folder() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;
    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    let b = fx.path("docs/b");
    let old_folder = fx.store.get(&b, &fx.ctx.scope).await.unwrap().unwrap().remote_id;

    std::fs::remove_dir_all(b.as_path()).unwrap();
    fx.write("docs/b", "now a file");
    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();

    assert!(!fx.backend.exists(&old_folder));
    let record = fx.store.get(&b, &fx.ctx.scope).await.unwrap().unwrap();
    assert!(!record.is_directory);
    assert_eq!(fx.backend.node(&record.remote_id).unwrap().content, b"now a file");
    assert!(fx
        .store
        .get(&fx.path("docs/b/c.txt"), &fx.ctx.scope)
        .await
        .unwrap()
        .is_none());
    // backup + docs + a.txt + b
    assert_eq!(fx.backend.object_count(), 4);
}

#[tokio::test]
async fn test_file_replaced_by_directory_removes_old_file() {
    let fx = Fixture::new().await;
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;
    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    let a = fx.path("docs/a.txt");
    let old_file = fx.store.get(&a, &fx.ctx.scope).await.unwrap().unwrap().remote_id;

    std::fs::remove_file(a.as_path()).unwrap();
    fx.write("docs/a.txt/inner.txt", "inner");
    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();

    assert!(!fx.backend.exists(&old_file));
    let record = fx.store.get(&a, &fx.ctx.scope).await.unwrap().unwrap();
    assert!(record.is_directory);
    assert!(fx
        .store
        .get(&fx.path("docs/a.txt/inner.txt"), &fx.ctx.scope)
        .await
        .unwrap()
        .is_some());
}
