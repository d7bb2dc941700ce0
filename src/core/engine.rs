use crate::config::SyncConfig;
use crate::core::comparator::{compare_trees, summarize_actions, Side, SyncAction};
use crate::core::conflict::{ConflictRecord, ConflictResolver};
use crate::core::normalizer::ContentNormalizer;
use crate::core::status::{SyncStatusItem, SyncStatusMap};
use crate::error::{StorageError, SyncError};
use crate::storage::{now_millis, FileMeta, Storage};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 同步报告
#[derive(Debug, Default)]
pub struct SyncReport {
    pub pass_id: String,
    /// 本轮同步开始时间（毫秒）
    pub timestamp: i64,
    /// 实际执行的文件操作数（复制、删除、冲突解决），0 表示两端已一致
    pub actions: usize,
    pub copied: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub conflicts: Vec<ConflictRecord>,
    /// 失败的文件，它们的状态条目保持不变，下次同步重试
    pub errors: Vec<SyncError>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

/// 对状态表的一次修改
#[derive(Debug)]
enum StatusUpdate {
    Set(String, SyncStatusItem),
    Remove(String),
}

#[derive(Debug)]
enum OutcomeKind {
    Copied,
    Deleted,
    /// 内容相同，只记录状态
    Recorded,
    Resolved(Option<ConflictRecord>),
}

/// 单个动作的执行结果，由编排循环统一写回状态表
#[derive(Debug)]
struct ActionOutcome {
    kind: OutcomeKind,
    performed: usize,
    updates: Vec<StatusUpdate>,
}

/// 两个文件空间之间的同步引擎
pub struct SpaceSync {
    primary: Arc<dyn Storage>,
    secondary: Arc<dyn Storage>,
    config: SyncConfig,
    normalizer: ContentNormalizer,
    cancelled: Arc<AtomicBool>,
    /// 同一副本对同一时间只允许一轮同步
    pass_lock: Mutex<()>,
}

impl SpaceSync {
    pub fn new(primary: Arc<dyn Storage>, secondary: Arc<dyn Storage>) -> Self {
        Self::with_config(primary, secondary, SyncConfig::default())
    }

    pub fn with_config(
        primary: Arc<dyn Storage>,
        secondary: Arc<dyn Storage>,
        config: SyncConfig,
    ) -> Self {
        let normalizer = ContentNormalizer::new(config.text_extensions.clone());
        Self {
            primary,
            secondary,
            config,
            normalizer,
            cancelled: Arc::new(AtomicBool::new(false)),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &ContentNormalizer {
        &self.normalizer
    }

    /// 取消当前同步：不再开始新的文件操作，进行中的操作照常完成
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn store(&self, side: Side) -> &dyn Storage {
        match side {
            Side::Primary => self.primary.as_ref(),
            Side::Secondary => self.secondary.as_ref(),
        }
    }

    /// 执行一轮完整同步，返回同步报告（`actions` 为实际执行的操作数）
    pub async fn sync_files(
        &self,
        status: &mut SyncStatusMap,
        resolver: &dyn ConflictResolver,
    ) -> Result<SyncReport, SyncError> {
        let _pass = self.pass_lock.lock().await;
        self.cancelled.store(false, Ordering::SeqCst);

        let started = Instant::now();
        let mut report = SyncReport {
            pass_id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            ..Default::default()
        };

        debug!(
            "开始同步: {} <-> {} ({})",
            self.primary.name(),
            self.secondary.name(),
            report.pass_id
        );

        // 先拿到两端完整的文件列表，再开始分类
        let (primary_list, secondary_list) = tokio::join!(
            self.primary.fetch_file_list(),
            self.secondary.fetch_file_list()
        );
        let primary_files = index_by_name(primary_list.map_err(|e| SyncError::Listing {
            space: self.primary.name().to_string(),
            source: e,
        })?);
        let secondary_files = index_by_name(secondary_list.map_err(|e| SyncError::Listing {
            space: self.secondary.name().to_string(),
            source: e,
        })?);

        let actions = compare_trees(&primary_files, &secondary_files, status);
        let summary = summarize_actions(&actions);
        debug!(
            "比较完成: {} 个文件, 复制 {}/{}, 删除 {}, 待比较 {}, 跳过 {}, 过期状态 {}",
            summary.total_files(),
            summary.copy_to_secondary,
            summary.copy_to_primary,
            summary.delete_count,
            summary.compare_count,
            summary.skip_count,
            summary.stale_count
        );

        let mut io_actions = Vec::new();
        for action in actions {
            if action.needs_io() {
                io_actions.push(action);
                continue;
            }
            match action {
                SyncAction::DropStatus { name } => {
                    debug!("清理过期状态: {}", name);
                    status.remove(&name);
                }
                _ => report.skipped += 1,
            }
        }

        let cancelled = self.cancelled.clone();
        let timestamp = report.timestamp;
        let results = stream::iter(io_actions)
            .take_while(move |_| futures::future::ready(!cancelled.load(Ordering::SeqCst)))
            .map(move |action| self.execute_with_retry(action, resolver, timestamp))
            .buffer_unordered(self.config.max_concurrent_transfers.max(1));
        let mut results = std::pin::pin!(results);

        // 状态表只在这里修改，每个文件操作完成后依次写回
        while let Some((name, result)) = results.next().await {
            match result {
                Ok(outcome) => apply_outcome(status, &mut report, outcome),
                Err(e) => {
                    error!("{}", e);
                    debug!("保留状态条目以便下次重试: {}", name);
                    report.errors.push(e);
                }
            }
        }

        report.cancelled = self.is_cancelled();
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "同步完成: {} 个操作 (复制 {}, 删除 {}, 冲突 {}, 失败 {}){}",
            report.actions,
            report.copied,
            report.deleted,
            report.conflicts.len(),
            report.errors.len(),
            if report.cancelled { " [已取消]" } else { "" }
        );

        Ok(report)
    }

    /// 只同步一个文件，分类和状态规则与整轮同步相同；返回实际执行的操作数
    pub async fn sync_file(
        &self,
        name: &str,
        status: &mut SyncStatusMap,
        resolver: &dyn ConflictResolver,
    ) -> Result<usize, SyncError> {
        let _pass = self.pass_lock.lock().await;
        self.cancelled.store(false, Ordering::SeqCst);

        let (primary_meta, secondary_meta) = tokio::join!(
            self.primary.get_file_meta(name),
            self.secondary.get_file_meta(name)
        );
        let primary_meta = optional_meta(name, primary_meta)?;
        let secondary_meta = optional_meta(name, secondary_meta)?;

        let action = crate::core::comparator::classify(
            name,
            primary_meta.as_ref(),
            secondary_meta.as_ref(),
            status.get(name),
        );

        match action {
            SyncAction::Skip { .. } => Ok(0),
            SyncAction::DropStatus { .. } => {
                status.remove(name);
                Ok(0)
            }
            _ if self.is_cancelled() => Err(SyncError::Cancelled),
            action => {
                let (_, result) = self
                    .execute_with_retry(action, resolver, now_millis())
                    .await;
                let outcome = result?;
                let performed = outcome.performed;
                let mut report = SyncReport::default();
                apply_outcome(status, &mut report, outcome);
                Ok(performed)
            }
        }
    }

    /// 带重试的动作执行
    async fn execute_with_retry(
        &self,
        action: SyncAction,
        resolver: &dyn ConflictResolver,
        timestamp: i64,
    ) -> (String, Result<ActionOutcome, SyncError>) {
        let name = action.name().to_string();
        let max_retries = self.config.max_retries;

        let mut attempt = 0;
        loop {
            match self.execute(&action, resolver, timestamp).await {
                Ok(outcome) => return (name, Ok(outcome)),
                Err(SyncError::File { name: n, source }) if attempt < max_retries => {
                    // 文件已不存在时重试没有意义，留给下一轮重新分类
                    if StorageError::is_not_found(&source) {
                        return (name, Err(SyncError::File { name: n, source }));
                    }
                    let delay = retry_delay_ms(self.config.retry_base_delay_ms, attempt);
                    warn!(
                        "操作失败，{}ms 后重试 ({}/{}): {}: {}",
                        delay,
                        attempt + 1,
                        max_retries,
                        n,
                        source
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return (name, Err(e)),
            }
        }
    }

    /// 执行单个动作（不修改状态表）
    async fn execute(
        &self,
        action: &SyncAction,
        resolver: &dyn ConflictResolver,
        timestamp: i64,
    ) -> Result<ActionOutcome, SyncError> {
        match action {
            SyncAction::Copy { name, from } => {
                let (source, dest) = (self.store(*from), self.store(from.other()));
                debug!("复制: {} ({} -> {})", name, source.name(), dest.name());

                let file = source.read_file(name).await.map_err(|e| file_error(name, e))?;
                let hash = self
                    .normalizer
                    .content_hash(name, &file.meta.content_type, &file.data);
                let written = dest
                    .write_file(name, file.data, Some(file.meta.last_modified))
                    .await
                    .map_err(|e| file_error(name, e))?;

                Ok(ActionOutcome {
                    kind: OutcomeKind::Copied,
                    performed: 1,
                    updates: vec![StatusUpdate::Set(
                        name.clone(),
                        SyncStatusItem {
                            last_sync: file.meta.last_modified.max(written.last_modified),
                            hash,
                        },
                    )],
                })
            }

            SyncAction::Delete { name, from } => {
                let storage = self.store(*from);
                debug!("删除: {} ({})", name, storage.name());
                storage
                    .delete_file(name)
                    .await
                    .map_err(|e| file_error(name, e))?;

                Ok(ActionOutcome {
                    kind: OutcomeKind::Deleted,
                    performed: 1,
                    updates: vec![StatusUpdate::Remove(name.clone())],
                })
            }

            SyncAction::FirstContact { name } | SyncAction::BothModified { name } => {
                let (primary_file, secondary_file) = tokio::try_join!(
                    self.primary.read_file(name),
                    self.secondary.read_file(name)
                )
                .map_err(|e| file_error(name, e))?;

                let primary_hash = self.normalizer.content_hash(
                    name,
                    &primary_file.meta.content_type,
                    &primary_file.data,
                );
                let secondary_hash = self.normalizer.content_hash(
                    name,
                    &secondary_file.meta.content_type,
                    &secondary_file.data,
                );

                if primary_hash == secondary_hash {
                    debug!("两端内容一致，仅记录状态: {}", name);
                    return Ok(ActionOutcome {
                        kind: OutcomeKind::Recorded,
                        performed: 0,
                        updates: vec![StatusUpdate::Set(
                            name.clone(),
                            SyncStatusItem {
                                last_sync: primary_file
                                    .meta
                                    .last_modified
                                    .max(secondary_file.meta.last_modified),
                                hash: primary_hash,
                            },
                        )],
                    });
                }

                debug!("检测到冲突: {}", name);
                let resolution = resolver
                    .resolve(name, timestamp, self.primary.as_ref(), self.secondary.as_ref())
                    .await
                    .map_err(|e| SyncError::Resolver {
                        name: name.clone(),
                        source: e,
                    })?;

                Ok(ActionOutcome {
                    kind: OutcomeKind::Resolved(resolution.record),
                    performed: resolution.actions,
                    updates: resolution
                        .statuses
                        .into_iter()
                        .map(|(n, item)| StatusUpdate::Set(n, item))
                        .collect(),
                })
            }

            SyncAction::Skip { .. } | SyncAction::DropStatus { .. } => Ok(ActionOutcome {
                kind: OutcomeKind::Recorded,
                performed: 0,
                updates: Vec::new(),
            }),
        }
    }
}

/// 指数退避，配置值过大时饱和而不是溢出
fn retry_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2_u64.saturating_pow(attempt))
}

fn file_error(name: &str, source: anyhow::Error) -> SyncError {
    SyncError::File {
        name: name.to_string(),
        source,
    }
}

fn index_by_name(list: crate::storage::FileList) -> HashMap<String, FileMeta> {
    list.files
        .into_iter()
        .map(|meta| (meta.name.clone(), meta))
        .collect()
}

/// 文件不存在转为 None，其他错误照常返回
fn optional_meta(
    name: &str,
    result: anyhow::Result<FileMeta>,
) -> Result<Option<FileMeta>, SyncError> {
    match result {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if StorageError::is_not_found(&e) => Ok(None),
        Err(e) => Err(file_error(name, e)),
    }
}

fn apply_outcome(status: &mut SyncStatusMap, report: &mut SyncReport, outcome: ActionOutcome) {
    for update in outcome.updates {
        match update {
            StatusUpdate::Set(name, item) => {
                status.insert(name, item);
            }
            StatusUpdate::Remove(name) => {
                status.remove(&name);
            }
        }
    }

    report.actions += outcome.performed;
    match outcome.kind {
        OutcomeKind::Copied => report.copied += 1,
        OutcomeKind::Deleted => report.deleted += 1,
        OutcomeKind::Recorded => {}
        OutcomeKind::Resolved(record) => report.conflicts.extend(record),
    }
}
