//! 单个文件失败、冲突解决器失败、取消和列举失败时的行为

use anyhow::Result;
use async_trait::async_trait;
use spacesync::storage::{FileData, FileList};
use spacesync::{
    primary_conflict_resolver, ConflictPolicy, ConflictResolver, FileMeta, MemoryStorage,
    PolicyResolver, SpaceSync, Storage, SyncConfig, SyncError, SyncStatusMap,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 对指定文件的写入失败，其余操作转发给内存存储
struct FlakyStorage {
    inner: MemoryStorage,
    failing_writes: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
    write_attempts: AtomicUsize,
}

impl FlakyStorage {
    fn new(name: &str) -> Self {
        Self {
            inner: MemoryStorage::new(name),
            failing_writes: Mutex::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
            write_attempts: AtomicUsize::new(0),
        }
    }

    fn fail_writes_to(&self, name: &str) {
        self.failing_writes.lock().unwrap().insert(name.to_string());
    }

    fn heal(&self) {
        self.failing_writes.lock().unwrap().clear();
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn fetch_file_list(&self) -> Result<FileList> {
        if self.fail_listing.load(Ordering::SeqCst) {
            anyhow::bail!("listing unavailable");
        }
        self.inner.fetch_file_list().await
    }

    async fn read_file(&self, name: &str) -> Result<FileData> {
        self.inner.read_file(name).await
    }

    async fn write_file(&self, name: &str, data: Vec<u8>, timestamp: Option<i64>) -> Result<FileMeta> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing_writes.lock().unwrap().contains(name) {
            anyhow::bail!("disk full");
        }
        self.inner.write_file(name, data, timestamp).await
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        self.inner.delete_file(name).await
    }

    async fn get_file_meta(&self, name: &str) -> Result<FileMeta> {
        self.inner.get_file_meta(name).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

fn no_retry_config() -> SyncConfig {
    SyncConfig {
        max_retries: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_failed_file_does_not_abort_pass() {
    let primary = Arc::new(MemoryStorage::new("p"));
    let secondary = Arc::new(FlakyStorage::new("s"));
    let sync = SpaceSync::with_config(primary.clone(), secondary.clone(), no_retry_config());
    let resolver = primary_conflict_resolver();
    let mut status = SyncStatusMap::new();

    primary.write_file("good.md", b"ok".to_vec(), None).await.unwrap();
    primary.write_file("bad.md", b"nope".to_vec(), None).await.unwrap();
    secondary.fail_writes_to("bad.md");

    let report = sync.sync_files(&mut status, &resolver).await.unwrap();
    assert_eq!(report.actions, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].file_name(), Some("bad.md"));
    assert!(!report.is_clean());
    assert!(status.contains_key("good.md"));
    assert!(!status.contains_key("bad.md"));

    // 恢复后下一轮重试失败的文件
    secondary.heal();
    let report = sync.sync_files(&mut status, &resolver).await.unwrap();
    assert_eq!(report.actions, 1);
    assert!(report.is_clean());
    assert_eq!(secondary.read_text("bad.md").await.unwrap(), "nope");
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let primary = Arc::new(MemoryStorage::new("p"));
    let secondary = Arc::new(FlakyStorage::new("s"));
    let config = SyncConfig {
        max_retries: 2,
        retry_base_delay_ms: 1,
        ..Default::default()
    };
    let sync = SpaceSync::with_config(primary.clone(), secondary.clone(), config);
    let mut status = SyncStatusMap::new();

    primary.write_file("bad.md", b"x".to_vec(), None).await.unwrap();
    secondary.fail_writes_to("bad.md");

    let report = sync
        .sync_files(&mut status, &primary_conflict_resolver())
        .await
        .unwrap();
    assert_eq!(report.errors.len(), 1);
    // 首次尝试加两次重试
    assert_eq!(secondary.write_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_listing_failure_aborts_before_any_action() {
    let primary = Arc::new(MemoryStorage::new("p"));
    let secondary = Arc::new(FlakyStorage::new("s"));
    let sync = SpaceSync::new(primary.clone(), secondary.clone());
    let mut status = SyncStatusMap::new();

    primary.write_file("a.md", b"a".to_vec(), None).await.unwrap();
    secondary.fail_listing.store(true, Ordering::SeqCst);

    let err = sync
        .sync_files(&mut status, &primary_conflict_resolver())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Listing { .. }));
    assert_eq!(secondary.write_attempts.load(Ordering::SeqCst), 0);
    assert!(status.is_empty());
}

/// 总是失败的冲突解决器
struct BrokenResolver;

#[async_trait]
impl ConflictResolver for BrokenResolver {
    async fn resolve(
        &self,
        _name: &str,
        _timestamp: i64,
        _primary: &dyn Storage,
        _secondary: &dyn Storage,
    ) -> Result<spacesync::core::Resolution> {
        anyhow::bail!("resolver exploded")
    }
}

#[tokio::test]
async fn test_resolver_failure_is_reported_per_file() {
    let primary = Arc::new(MemoryStorage::new("p"));
    let secondary = Arc::new(MemoryStorage::new("s"));
    let sync = SpaceSync::new(primary.clone(), secondary.clone());
    let mut status = SyncStatusMap::new();

    primary.write_file("clash.md", b"1".to_vec(), None).await.unwrap();
    secondary.write_file("clash.md", b"2".to_vec(), None).await.unwrap();
    primary.write_file("fine.md", b"ok".to_vec(), None).await.unwrap();

    let report = sync.sync_files(&mut status, &BrokenResolver).await.unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(&report.errors[0], SyncError::Resolver { name, .. } if name == "clash.md"));
    assert_eq!(secondary.read_text("fine.md").await.unwrap(), "ok");
    assert!(!status.contains_key("clash.md"));
}

#[tokio::test]
async fn test_secondary_wins_policy() {
    let primary = Arc::new(MemoryStorage::new("p"));
    let secondary = Arc::new(MemoryStorage::new("s"));
    let sync = SpaceSync::new(primary.clone(), secondary.clone());
    let resolver = PolicyResolver::new(ConflictPolicy::SecondaryWins);
    let mut status = SyncStatusMap::new();

    primary.write_file("doc.md", b"primary".to_vec(), None).await.unwrap();
    secondary.write_file("doc.md", b"secondary".to_vec(), None).await.unwrap();

    let report = sync.sync_files(&mut status, &resolver).await.unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(primary.read_text("doc.md").await.unwrap(), "secondary");

    let copy = &report.conflicts[0].conflict_copy;
    assert_eq!(primary.read_text(copy).await.unwrap(), "primary");
    assert_eq!(secondary.read_text(copy).await.unwrap(), "primary");

    let report = sync.sync_files(&mut status, &resolver).await.unwrap();
    assert_eq!(report.actions, 0);
}

#[tokio::test]
async fn test_read_only_peer_reports_errors_without_losing_status() {
    let assets = Arc::new(MemoryStorage::read_only(
        "assets",
        vec![("logo.svg".to_string(), b"<svg/>".to_vec())],
    ));
    let space = Arc::new(MemoryStorage::new("space"));
    let sync = SpaceSync::with_config(space.clone(), assets.clone(), no_retry_config());
    let mut status = SyncStatusMap::new();

    space.write_file("page.md", b"text".to_vec(), None).await.unwrap();

    let report = sync
        .sync_files(&mut status, &primary_conflict_resolver())
        .await
        .unwrap();
    // logo 复制到主端成功，page 写入只读端失败
    assert_eq!(report.actions, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(space.read_text("logo.svg").await.unwrap(), "<svg/>");
    assert!(status.contains_key("logo.svg"));
    assert!(!status.contains_key("page.md"));
}

/// 每次写入都有延迟的存储，用来在同步途中取消
struct SlowStorage {
    inner: MemoryStorage,
}

#[async_trait]
impl Storage for SlowStorage {
    async fn fetch_file_list(&self) -> Result<FileList> {
        self.inner.fetch_file_list().await
    }

    async fn read_file(&self, name: &str) -> Result<FileData> {
        self.inner.read_file(name).await
    }

    async fn write_file(&self, name: &str, data: Vec<u8>, timestamp: Option<i64>) -> Result<FileMeta> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        self.inner.write_file(name, data, timestamp).await
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        self.inner.delete_file(name).await
    }

    async fn get_file_meta(&self, name: &str) -> Result<FileMeta> {
        self.inner.get_file_meta(name).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[tokio::test]
async fn test_cancel_stops_new_operations() {
    let primary = Arc::new(MemoryStorage::new("p"));
    let secondary = Arc::new(SlowStorage {
        inner: MemoryStorage::new("s"),
    });
    let config = SyncConfig {
        max_concurrent_transfers: 1,
        ..Default::default()
    };
    let sync = Arc::new(SpaceSync::with_config(primary.clone(), secondary.clone(), config));

    for i in 0..5 {
        primary
            .write_file(&format!("{}.md", i), b"x".to_vec(), None)
            .await
            .unwrap();
    }

    let task = {
        let sync = sync.clone();
        tokio::spawn(async move {
            let mut status = SyncStatusMap::new();
            let report = sync
                .sync_files(&mut status, &primary_conflict_resolver())
                .await
                .unwrap();
            (report, status)
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    sync.cancel();
    let (report, mut status) = task.await.unwrap();

    assert!(report.cancelled);
    assert!(!report.is_clean());
    assert!(report.actions < 5);
    assert_eq!(status.len(), report.actions);

    // 下一轮不受上次取消影响，补齐剩余文件
    let report = sync
        .sync_files(&mut status, &primary_conflict_resolver())
        .await
        .unwrap();
    assert!(!report.cancelled);
    assert_eq!(status.len(), 5);
    assert_eq!(secondary.inner.fetch_file_list().await.unwrap().files.len(), 5);
}
