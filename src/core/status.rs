//! 同步状态 - 每个文件最近一次同步时的 hash 和时间
//!
//! 状态表由调用方持有，在多次同步之间持久化；引擎只读取和修改它。

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 单个文件的同步状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusItem {
    /// 最近一次同步完成时记录的时间（毫秒）
    pub last_sync: i64,
    /// 同步时规范化内容的 hash
    pub hash: String,
}

/// 文件名 -> 同步状态
pub type SyncStatusMap = HashMap<String, SyncStatusItem>;

/// 由两端存储名称生成稳定的副本对 ID
pub fn pair_id(primary: &str, secondary: &str) -> String {
    let hash = blake3::hash(format!("{}\0{}", primary, secondary).as_bytes());
    hash.to_hex()[..16].to_string()
}

/// 状态表持久化接口
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn load(&self, pair_id: &str) -> Result<SyncStatusMap>;

    /// 用给定状态表整体替换该副本对的记录
    async fn save(&self, pair_id: &str, status: &SyncStatusMap) -> Result<()>;
}

/// 数据库行
#[derive(Debug, sqlx::FromRow)]
struct SyncStatusRow {
    file_name: String,
    hash: String,
    last_sync: i64,
}

/// 基于 SQLite 的状态存储
pub struct SqliteStatusStore {
    db: Arc<SqlitePool>,
}

impl SqliteStatusStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// 打开（或创建）数据库文件并执行迁移
    pub async fn connect(db_path: &Path) -> Result<Self> {
        // Windows 路径需要转换反斜杠为正斜杠
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid database path"))?
            .replace('\\', "/");

        let db = SqlitePoolOptions::new()
            .max_connections(5) // SQLite 单文件，不需要太多连接
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!("sqlite:{}?mode=rwc", db_path_str))
            .await?;

        Self::from_pool(db).await
    }

    /// 内存数据库（单连接，否则每个连接是独立的库）
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(db).await
    }

    async fn from_pool(db: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&db).await?;
        Ok(Self::new(Arc::new(db)))
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn load(&self, pair_id: &str) -> Result<SyncStatusMap> {
        let rows = sqlx::query_as::<_, SyncStatusRow>(
            "SELECT file_name, hash, last_sync FROM sync_status WHERE pair_id = ?",
        )
        .bind(pair_id)
        .fetch_all(&*self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.file_name,
                    SyncStatusItem {
                        last_sync: r.last_sync,
                        hash: r.hash,
                    },
                )
            })
            .collect())
    }

    async fn save(&self, pair_id: &str, status: &SyncStatusMap) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM sync_status WHERE pair_id = ?")
            .bind(pair_id)
            .execute(&mut *tx)
            .await?;

        for (name, item) in status {
            sqlx::query(
                "INSERT INTO sync_status (pair_id, file_name, hash, last_sync) VALUES (?, ?, ?, ?)",
            )
            .bind(pair_id)
            .bind(name)
            .bind(&item.hash)
            .bind(item.last_sync)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("已保存 {} 个文件的同步状态 (pair={})", status.len(), pair_id);
        Ok(())
    }
}

/// 基于 JSON 文件的状态存储，文件内按副本对 ID 分组
pub struct JsonStatusStore {
    path: PathBuf,
}

impl JsonStatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Result<HashMap<String, SyncStatusMap>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StatusStore for JsonStatusStore {
    async fn load(&self, pair_id: &str) -> Result<SyncStatusMap> {
        Ok(self.read_all().await?.remove(pair_id).unwrap_or_default())
    }

    async fn save(&self, pair_id: &str, status: &SyncStatusMap) -> Result<()> {
        let mut all = self.read_all().await?;
        all.insert(pair_id.to_string(), status.clone());

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // 先写临时文件再重命名，避免中途失败留下半个文件
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, serde_json::to_vec_pretty(&all)?).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
