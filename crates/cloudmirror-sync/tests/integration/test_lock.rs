//! Distributed lock over the backup folder

use std::time::Duration;

use chrono::Utc;

use cloudmirror_core::domain::{
    newtypes::{DeviceId, RemoteId},
    properties::{RemoteProperties, DEVICE_ID_KEY},
    record::Provider,
};
use cloudmirror_core::ports::LockHooks;
use cloudmirror_sync::lock::{RemoteLock, LOCK_SENTINEL_NAME};
use cloudmirror_sync::memory::MemoryBackend;

use crate::common::{fast_retry, BACKUP_FOLDER};

const TTL: Duration = Duration::from_secs(600);

fn lock_for(device: DeviceId) -> RemoteLock {
    RemoteLock::new(device, TTL, BACKUP_FOLDER).with_retry(fast_retry())
}

fn sentinels(backend: &MemoryBackend, folder: &RemoteId) -> Vec<RemoteId> {
    backend
        .children_of(folder)
        .into_iter()
        .filter(|(_, node)| node.name == LOCK_SENTINEL_NAME)
        .map(|(id, _)| id)
        .collect()
}

async fn setup() -> (MemoryBackend, RemoteId) {
    let backend = MemoryBackend::new(Provider::Box, "bob");
    let folder = backend.ensure_backup_folder(BACKUP_FOLDER).await.unwrap();
    (backend, folder)
}

#[tokio::test]
async fn test_acquire_and_release() {
    let (backend, folder) = setup().await;
    let device = DeviceId::new();
    let lock = lock_for(device);

    let acquisition = lock.acquire(&backend, &folder).await.unwrap();
    assert!(acquisition.acquired);
    assert_eq!(acquisition.holder, Some(device));
    let lock_id = acquisition.lock_id.unwrap();

    let node = backend.node(&lock_id).unwrap();
    assert_eq!(node.name, LOCK_SENTINEL_NAME);
    assert_eq!(
        node.properties.get(DEVICE_ID_KEY),
        Some(device.to_string().as_str())
    );

    lock.release(&backend, &lock_id).await.unwrap();
    assert!(sentinels(&backend, &folder).is_empty());
}

#[tokio::test]
async fn test_same_device_reenters_and_replaces_its_sentinel() {
    let (backend, folder) = setup().await;
    let lock = lock_for(DeviceId::new());

    let first = lock.acquire(&backend, &folder).await.unwrap();
    let second = lock.acquire(&backend, &folder).await.unwrap();
    assert!(first.acquired);
    assert!(second.acquired);
    assert_ne!(first.lock_id, second.lock_id);
    assert_eq!(sentinels(&backend, &folder), vec![second.lock_id.unwrap()]);
}

#[tokio::test]
async fn test_live_foreign_sentinel_blocks() {
    let (backend, folder) = setup().await;
    let other = DeviceId::new();
    backend
        .put(
            &folder,
            LOCK_SENTINEL_NAME,
            false,
            &[],
            RemoteProperties::for_lock(&other, Utc::now()),
        )
        .unwrap();

    let acquisition = lock_for(DeviceId::new())
        .acquire(&backend, &folder)
        .await
        .unwrap();
    assert!(!acquisition.acquired);
    assert_eq!(acquisition.holder, Some(other));
    assert_eq!(acquisition.lock_id, None);
    assert_eq!(sentinels(&backend, &folder).len(), 1);
}

#[tokio::test]
async fn test_stale_and_undated_sentinels_are_removed() {
    let (backend, folder) = setup().await;
    let stale = backend
        .put(
            &folder,
            LOCK_SENTINEL_NAME,
            false,
            &[],
            RemoteProperties::for_lock(&DeviceId::new(), Utc::now() - chrono::Duration::hours(2)),
        )
        .unwrap();
    let undated = backend
        .put(&folder, LOCK_SENTINEL_NAME, false, &[], RemoteProperties::new())
        .unwrap();

    let acquisition = lock_for(DeviceId::new())
        .acquire(&backend, &folder)
        .await
        .unwrap();
    assert!(acquisition.acquired);
    assert!(!backend.exists(&stale));
    assert!(!backend.exists(&undated));
    assert_eq!(sentinels(&backend, &folder).len(), 1);
}

#[tokio::test]
async fn test_concurrent_acquirers_elect_exactly_one() {
    for _ in 0..50 {
        let backend = MemoryBackend::new(Provider::GoogleDrive, "alice").yielding();
        let folder = backend.ensure_backup_folder(BACKUP_FOLDER).await.unwrap();
        let a = lock_for(DeviceId::new());
        let b = lock_for(DeviceId::new());

        let (ra, rb) = tokio::join!(a.acquire(&backend, &folder), b.acquire(&backend, &folder));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        let winners = usize::from(ra.acquired) + usize::from(rb.acquired);
        assert_eq!(winners, 1, "a={ra:?} b={rb:?}");

        // Only the winner's sentinel is left behind.
        let winner = if ra.acquired { &ra } else { &rb };
        assert_eq!(sentinels(&backend, &folder), vec![winner.lock_id.clone().unwrap()]);
        let loser = if ra.acquired { &rb } else { &ra };
        let winning_device = if ra.acquired { a.device_id() } else { b.device_id() };
        assert_eq!(loser.holder, Some(winning_device));
    }
}

#[tokio::test]
async fn test_release_of_vanished_sentinel_succeeds() {
    let (backend, folder) = setup().await;
    let lock = lock_for(DeviceId::new());
    let lock_id = lock.acquire(&backend, &folder).await.unwrap().lock_id.unwrap();

    backend.remove(&lock_id);
    lock.release(&backend, &lock_id).await.unwrap();
}

#[tokio::test]
async fn test_cleanup_on_exit_removes_every_sentinel() {
    let (backend, folder) = setup().await;
    backend
        .put(
            &folder,
            LOCK_SENTINEL_NAME,
            false,
            &[],
            RemoteProperties::for_lock(&DeviceId::new(), Utc::now()),
        )
        .unwrap();
    let lock = lock_for(DeviceId::new());
    lock.cleanup_on_exit(&backend, &folder).await;
    assert!(sentinels(&backend, &folder).is_empty());

    // A missing folder is not an error either.
    backend.remove(&folder);
    lock.cleanup_on_exit(&backend, &folder).await;
}

#[tokio::test]
async fn test_vanished_backup_folder_is_re_resolved() {
    let (backend, folder) = setup().await;
    backend.remove(&folder);

    let acquisition = lock_for(DeviceId::new())
        .acquire(&backend, &folder)
        .await
        .unwrap();
    assert!(acquisition.acquired);
    assert_ne!(acquisition.backup_folder_id, folder);
    assert!(backend.exists(&acquisition.backup_folder_id));
    assert_eq!(backend.node(&acquisition.backup_folder_id).unwrap().name, BACKUP_FOLDER);
}
