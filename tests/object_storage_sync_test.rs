//! 对象存储作为一端参与完整同步

use opendal::Operator;
use spacesync::{
    primary_conflict_resolver, MemoryStorage, ObjectStorage, SpaceSync, Storage, SyncError,
    SyncStatusMap,
};
use std::sync::Arc;
use std::time::Duration;

fn fs_object_storage(dir: &tempfile::TempDir) -> ObjectStorage {
    let root = dir.path().to_string_lossy().to_string();
    let operator = Operator::new(opendal::services::Fs::default().root(&root))
        .unwrap()
        .finish();
    ObjectStorage::from_operator(operator, "fs://replica")
}

async fn pause() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn test_edits_on_object_side_are_synced() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Arc::new(MemoryStorage::new("p"));
    let object = Arc::new(fs_object_storage(&dir));
    let sync = SpaceSync::new(primary.clone(), object.clone());
    let resolver = primary_conflict_resolver();
    let mut status = SyncStatusMap::new();

    primary.write_file("index.md", b"v1".to_vec(), None).await.unwrap();
    let report = sync.sync_files(&mut status, &resolver).await.unwrap();
    assert_eq!(report.actions, 1);
    assert_eq!(object.read_text("index.md").await.unwrap(), "v1");
    assert!(object.get_file_meta("index.md").await.unwrap().last_modified > 0);

    pause().await;
    assert_eq!(sync.sync_files(&mut status, &resolver).await.unwrap().actions, 0);

    // 对象存储一端的修改必须被发现并复制回主端
    pause().await;
    object
        .write_file("index.md", b"v2 from object".to_vec(), None)
        .await
        .unwrap();
    pause().await;
    let report = sync.sync_files(&mut status, &resolver).await.unwrap();
    assert_eq!(report.actions, 1);
    assert_eq!(primary.read_text("index.md").await.unwrap(), "v2 from object");

    pause().await;
    assert_eq!(sync.sync_files(&mut status, &resolver).await.unwrap().actions, 0);

    // 两端同时修改时败方内容保留为冲突副本
    pause().await;
    primary.write_file("index.md", b"v3 primary".to_vec(), None).await.unwrap();
    object
        .write_file("index.md", b"v3 object".to_vec(), None)
        .await
        .unwrap();
    pause().await;
    let report = sync.sync_files(&mut status, &resolver).await.unwrap();
    assert_eq!(report.conflicts.len(), 1);
    let copy = &report.conflicts[0].conflict_copy;
    assert_eq!(object.read_text("index.md").await.unwrap(), "v3 primary");
    assert_eq!(object.read_text(copy).await.unwrap(), "v3 object");
    assert_eq!(primary.read_text(copy).await.unwrap(), "v3 object");

    pause().await;
    assert_eq!(sync.sync_files(&mut status, &resolver).await.unwrap().actions, 0);
}

#[tokio::test]
async fn test_backend_without_mtime_aborts_pass() {
    let operator = Operator::new(opendal::services::Memory::default())
        .unwrap()
        .finish();
    // 直接通过 operator 写入，绕过 ObjectStorage 的写后检查
    operator.write("index.md", b"v1".to_vec()).await.unwrap();
    let object = Arc::new(ObjectStorage::from_operator(operator, "memory://replica"));
    let primary = Arc::new(MemoryStorage::new("p"));
    let sync = SpaceSync::new(primary.clone(), object);
    let mut status = SyncStatusMap::new();

    let err = sync
        .sync_files(&mut status, &primary_conflict_resolver())
        .await
        .unwrap_err();
    assert!(matches!(&err, SyncError::Listing { space, .. } if space == "memory://replica"));
    assert!(status.is_empty());
    assert!(primary.fetch_file_list().await.unwrap().files.is_empty());
}
