use crate::core::comparator::Side;
use crate::core::normalizer::ContentNormalizer;
use crate::core::status::SyncStatusItem;
use crate::storage::{FileData, Storage};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// 冲突解决策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// 主端内容胜出
    #[default]
    PrimaryWins,
    /// 副端内容胜出
    SecondaryWins,
    /// 修改时间较新的一端胜出，相同时主端胜出
    NewestWins,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::PrimaryWins => write!(f, "primary_wins"),
            ConflictPolicy::SecondaryWins => write!(f, "secondary_wins"),
            ConflictPolicy::NewestWins => write!(f, "newest_wins"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary_wins" | "primary" => Ok(ConflictPolicy::PrimaryWins),
            "secondary_wins" | "secondary" => Ok(ConflictPolicy::SecondaryWins),
            "newest_wins" | "newest" => Ok(ConflictPolicy::NewestWins),
            _ => Err(anyhow::anyhow!("未知的冲突解决策略: {}", s)),
        }
    }
}

/// 一次冲突解决的结果
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// 实际发生的文件操作数（内容相同则为 0）
    pub actions: usize,
    /// 需要写入状态表的条目（原文件以及冲突副本）
    pub statuses: Vec<(String, SyncStatusItem)>,
    /// 冲突记录（内容实际相同时为空）
    pub record: Option<ConflictRecord>,
}

/// 冲突记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub file_name: String,
    /// 保存败方内容的文件名
    pub conflict_copy: String,
    pub winner: Side,
    pub primary_time: i64,
    pub secondary_time: i64,
    pub resolved_at: i64,
}

/// 冲突解决器：两端都修改了同一文件且内容确实不同时调用
///
/// 实现必须让两端达到确定的一致状态，并且不能悄悄丢弃败方的修改。
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(
        &self,
        name: &str,
        timestamp: i64,
        primary: &dyn Storage,
        secondary: &dyn Storage,
    ) -> Result<Resolution>;
}

/// 按策略选出胜方，败方内容以冲突副本的形式保存在两端
#[derive(Debug, Clone, Default)]
pub struct PolicyResolver {
    policy: ConflictPolicy,
    normalizer: ContentNormalizer,
}

/// 默认策略：主端胜出
pub fn primary_conflict_resolver() -> PolicyResolver {
    PolicyResolver::new(ConflictPolicy::PrimaryWins)
}

impl PolicyResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            normalizer: ContentNormalizer::default(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: ContentNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    fn pick_winner(&self, primary: &FileData, secondary: &FileData) -> Side {
        match self.policy {
            ConflictPolicy::PrimaryWins => Side::Primary,
            ConflictPolicy::SecondaryWins => Side::Secondary,
            ConflictPolicy::NewestWins => {
                if secondary.meta.last_modified > primary.meta.last_modified {
                    Side::Secondary
                } else {
                    Side::Primary
                }
            }
        }
    }

    fn hash(&self, name: &str, file: &FileData) -> String {
        self.normalizer
            .content_hash(name, &file.meta.content_type, &file.data)
    }
}

#[async_trait]
impl ConflictResolver for PolicyResolver {
    async fn resolve(
        &self,
        name: &str,
        timestamp: i64,
        primary: &dyn Storage,
        secondary: &dyn Storage,
    ) -> Result<Resolution> {
        let (primary_file, secondary_file) =
            tokio::try_join!(primary.read_file(name), secondary.read_file(name))?;

        let primary_hash = self.hash(name, &primary_file);
        let secondary_hash = self.hash(name, &secondary_file);

        if primary_hash == secondary_hash {
            debug!("内容相同，无需解决冲突: {}", name);
            return Ok(Resolution {
                actions: 0,
                statuses: vec![(
                    name.to_string(),
                    SyncStatusItem {
                        last_sync: primary_file
                            .meta
                            .last_modified
                            .max(secondary_file.meta.last_modified),
                        hash: primary_hash,
                    },
                )],
                record: None,
            });
        }

        let winner = self.pick_winner(&primary_file, &secondary_file);
        let (winner_store, loser_store, winner_file, loser_file, winner_hash, loser_hash) =
            match winner {
                Side::Primary => (
                    primary,
                    secondary,
                    &primary_file,
                    secondary_file.clone(),
                    primary_hash,
                    secondary_hash,
                ),
                Side::Secondary => (
                    secondary,
                    primary,
                    &secondary_file,
                    primary_file.clone(),
                    secondary_hash,
                    primary_hash,
                ),
            };

        let copy_name = generate_conflict_name(name, timestamp);
        info!(
            "解决冲突: {} ({} 胜出)，败方内容保存为 {}",
            name, winner, copy_name
        );

        // 败方内容写入两端的冲突副本
        let copy_meta = winner_store
            .write_file(&copy_name, loser_file.data.clone(), None)
            .await?;
        let copy_peer_meta = loser_store
            .write_file(&copy_name, loser_file.data, Some(copy_meta.last_modified))
            .await?;

        // 胜方内容覆盖败方
        let written = loser_store
            .write_file(
                name,
                winner_file.data.clone(),
                Some(winner_file.meta.last_modified),
            )
            .await?;

        Ok(Resolution {
            actions: 1,
            statuses: vec![
                (
                    name.to_string(),
                    SyncStatusItem {
                        last_sync: winner_file.meta.last_modified.max(written.last_modified),
                        hash: winner_hash,
                    },
                ),
                (
                    copy_name.clone(),
                    SyncStatusItem {
                        last_sync: copy_meta.last_modified.max(copy_peer_meta.last_modified),
                        hash: loser_hash,
                    },
                ),
            ],
            record: Some(ConflictRecord {
                file_name: name.to_string(),
                conflict_copy: copy_name,
                winner,
                primary_time: primary_file.meta.last_modified,
                secondary_time: secondary_file.meta.last_modified,
                resolved_at: timestamp,
            }),
        })
    }
}

/// 生成冲突副本文件名：在扩展名前插入 `.conflicting copy <时间>`，没有扩展名则追加在末尾
pub fn generate_conflict_name(name: &str, timestamp: i64) -> String {
    use chrono::DateTime;

    let dt = DateTime::from_timestamp_millis(timestamp)
        .map(|d| d.format("%Y%m%d_%H%M%S").to_string())
        .unwrap_or_else(|| timestamp.to_string());
    let marker = format!(".conflicting copy {}", dt);

    // 只在最后一段路径中查找扩展名，隐藏文件的前导点不算
    let segment_start = name.rfind('/').map_or(0, |i| i + 1);
    let ext_pos = name[segment_start..]
        .rfind('.')
        .filter(|&i| i > 0)
        .map(|i| segment_start + i)
        .filter(|&i| {
            let ext = &name[i + 1..];
            !ext.is_empty() && !ext.contains(char::is_whitespace)
        });

    match ext_pos {
        Some(pos) => {
            let (stem, ext) = name.split_at(pos);
            format!("{}{}{}", stem, marker, ext)
        }
        None => format!("{}{}", name, marker),
    }
}
