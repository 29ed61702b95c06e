//! Compare Walker: change detection, deletion propagation, pause policy

use chrono::{Duration, Utc};

use cloudmirror_core::domain::{newtypes::RemoteId, policy::StopSyncPolicy};
use cloudmirror_core::ports::IMappingStore;
use cloudmirror_sync::compare::compare_tree;
use cloudmirror_sync::memory::Op;
use cloudmirror_sync::upload::upload_tree;

use crate::common::Fixture;

/// Uploads the docs tree and returns the remote id of `docs`
async fn uploaded_docs(fx: &Fixture) -> RemoteId {
    let docs = fx.docs_tree();
    let backup = fx.backup_folder().await;
    upload_tree(&docs, &backup, fx.backend.as_ref(), fx.store.as_ref(), &fx.ctx, &[])
        .await
        .unwrap();
    fx.store
        .get(&docs, &fx.ctx.scope)
        .await
        .unwrap()
        .unwrap()
        .remote_id
}

async fn remote_id_of(fx: &Fixture, relative: &str) -> RemoteId {
    fx.store
        .get(&fx.path(relative), &fx.ctx.scope)
        .await
        .unwrap()
        .unwrap()
        .remote_id
}

#[tokio::test]
async fn test_unchanged_tree_reports_no_change() {
    let fx = Fixture::new().await;
    let docs_id = uploaded_docs(&fx).await;

    let changed = compare_tree(
        &fx.path("docs"),
        &docs_id,
        fx.backend.as_ref(),
        fx.store.as_ref(),
        &StopSyncPolicy::default(),
        &fx.ctx,
    )
    .await
    .unwrap();
    assert!(!changed);
    assert_eq!(fx.backend.calls(Op::NewVersion), 0);
    assert_eq!(fx.backend.calls(Op::GetModifiedTime), 2);
}

#[tokio::test]
async fn test_newer_local_file_pushes_new_version() {
    let fx = Fixture::new().await;
    let docs_id = uploaded_docs(&fx).await;
    let c_id = remote_id_of(&fx, "docs/b/c.txt").await;

    fx.write("docs/b/c.txt", "gamma v2");
    fx.backend.set_modified(&c_id, Utc::now() - Duration::hours(1));

    let changed = compare_tree(
        &fx.path("docs"),
        &docs_id,
        fx.backend.as_ref(),
        fx.store.as_ref(),
        &StopSyncPolicy::default(),
        &fx.ctx,
    )
    .await
    .unwrap();
    assert!(changed);

    let node = fx.backend.node(&c_id).unwrap();
    assert_eq!(node.version, 2);
    assert_eq!(node.content, b"gamma v2");
    assert_eq!(fx.backend.calls(Op::NewVersion), 1);
}

#[tokio::test]
async fn test_vanished_directory_is_deleted_remotely_and_untracked() {
    let fx = Fixture::new().await;
    let docs_id = uploaded_docs(&fx).await;
    let b_id = remote_id_of(&fx, "docs/b").await;
    let c_id = remote_id_of(&fx, "docs/b/c.txt").await;

    std::fs::remove_dir_all(fx.path("docs/b").as_path()).unwrap();

    let changed = compare_tree(
        &fx.path("docs"),
        &docs_id,
        fx.backend.as_ref(),
        fx.store.as_ref(),
        &StopSyncPolicy::default(),
        &fx.ctx,
    )
    .await
    .unwrap();
    assert!(changed);
    assert!(!fx.backend.exists(&b_id));
    assert!(!fx.backend.exists(&c_id));

    let keys = fx.store.keys(Some(&fx.ctx.scope)).await.unwrap();
    assert_eq!(keys, vec![fx.path("docs"), fx.path("docs/a.txt")]);
}

#[tokio::test]
async fn test_remote_already_gone_is_tolerated() {
    let fx = Fixture::new().await;
    let docs_id = uploaded_docs(&fx).await;
    let a_id = remote_id_of(&fx, "docs/a.txt").await;

    std::fs::remove_file(fx.path("docs/a.txt").as_path()).unwrap();
    fx.backend.remove(&a_id);

    let changed = compare_tree(
        &fx.path("docs"),
        &docs_id,
        fx.backend.as_ref(),
        fx.store.as_ref(),
        &StopSyncPolicy::default(),
        &fx.ctx,
    )
    .await
    .unwrap();
    assert!(changed);
    assert!(fx
        .store
        .get(&fx.path("docs/a.txt"), &fx.ctx.scope)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_paused_subtree_is_left_alone() {
    let fx = Fixture::new().await;
    let docs_id = uploaded_docs(&fx).await;
    let b_id = remote_id_of(&fx, "docs/b").await;

    std::fs::remove_dir_all(fx.path("docs/b").as_path()).unwrap();
    let policy = StopSyncPolicy::new(vec![fx.path("docs/b")], vec![]);

    let changed = compare_tree(
        &fx.path("docs"),
        &docs_id,
        fx.backend.as_ref(),
        fx.store.as_ref(),
        &policy,
        &fx.ctx,
    )
    .await
    .unwrap();
    assert!(!changed);
    assert!(fx.backend.exists(&b_id));
    assert!(fx
        .store
        .get(&fx.path("docs/b/c.txt"), &fx.ctx.scope)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_resumed_path_inside_paused_subtree_is_compared() {
    let fx = Fixture::new().await;
    let docs_id = uploaded_docs(&fx).await;
    let a_id = remote_id_of(&fx, "docs/a.txt").await;
    let c_id = remote_id_of(&fx, "docs/b/c.txt").await;

    fx.backend.set_modified(&a_id, Utc::now() - Duration::hours(1));
    fx.backend.set_modified(&c_id, Utc::now() - Duration::hours(1));
    let policy = StopSyncPolicy::new(vec![fx.path("docs")], vec![fx.path("docs/b/c.txt")]);

    let changed = compare_tree(
        &fx.path("docs"),
        &docs_id,
        fx.backend.as_ref(),
        fx.store.as_ref(),
        &policy,
        &fx.ctx,
    )
    .await
    .unwrap();
    assert!(changed);
    assert_eq!(fx.backend.node(&c_id).unwrap().version, 2);
    assert_eq!(fx.backend.node(&a_id).unwrap().version, 1);
}
