pub mod local;
pub mod memory;
pub mod object;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use object::ObjectStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 默认不参与同步的内部文件（数据库、状态文件）
pub const DEFAULT_EXCLUDED_NAMES: &[&str] = &["data.db", "sync.json", "spacesync.db"];

/// 文件权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilePerm {
    Rw,
    Ro,
}

/// 文件元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    /// 文件名（类路径字符串，同步键）
    pub name: String,
    /// 最后修改时间（毫秒时间戳，由存储分配）
    pub last_modified: i64,
    pub size: u64,
    pub content_type: String,
    pub perm: FilePerm,
}

/// 一次列举的结果
#[derive(Debug, Clone, Default)]
pub struct FileList {
    pub files: Vec<FileMeta>,
    /// 列举完成时的时间戳（毫秒）
    pub timestamp: i64,
}

/// 读取结果
#[derive(Debug, Clone)]
pub struct FileData {
    pub data: Vec<u8>,
    pub meta: FileMeta,
}

/// 存储抽象接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 列出所有文件（排除的内部文件不会出现在结果中）
    async fn fetch_file_list(&self) -> Result<FileList>;

    /// 读取整个文件，不存在时返回 `StorageError::NotFound`
    async fn read_file(&self, name: &str) -> Result<FileData>;

    /// 写入整个文件，自动创建父目录；`timestamp` 用于固定写入后的修改时间
    async fn write_file(&self, name: &str, data: Vec<u8>, timestamp: Option<i64>)
        -> Result<FileMeta>;

    /// 删除文件
    async fn delete_file(&self, name: &str) -> Result<()>;

    /// 获取单个文件元数据
    async fn get_file_meta(&self, name: &str) -> Result<FileMeta>;

    /// 以 UTF-8 文本读取
    async fn read_text(&self, name: &str) -> Result<String> {
        let file = self.read_file(name).await?;
        Ok(String::from_utf8(file.data)?)
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据扩展名推断内容类型，未知扩展名为 application/octet-stream
pub fn lookup_content_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// 当前毫秒时间戳
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
