//! 错误类型

use thiserror::Error;

/// 存储层错误（可通过 downcast 从 anyhow::Error 中识别）
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("文件不存在: {0}")]
    NotFound(String),

    #[error("路径不在存储空间内: {0}")]
    OutsideSpace(String),

    #[error("存储为只读: {0}")]
    ReadOnly(String),

    /// 后端没有提供修改时间，无法判断文件在上次同步后是否被修改
    #[error("存储 {space} 未提供文件修改时间: {name}")]
    MissingModifiedTime { space: String, name: String },
}

impl StorageError {
    /// 判断一个 anyhow 错误是否为文件不存在
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<StorageError>(), Some(StorageError::NotFound(_)))
    }
}

/// 同步过程错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 获取文件列表失败，整个同步轮次中止
    #[error("获取文件列表失败 ({space}): {source}")]
    Listing {
        space: String,
        #[source]
        source: anyhow::Error,
    },

    /// 单个文件的读写删除失败，状态条目保持不变，下次同步重试
    #[error("同步文件失败 {name}: {source}")]
    File {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// 冲突解决器自身失败
    #[error("冲突解决失败 {name}: {source}")]
    Resolver {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("同步已取消")]
    Cancelled,
}

impl SyncError {
    /// 出错的文件名（仅针对单文件错误）
    pub fn file_name(&self) -> Option<&str> {
        match self {
            SyncError::File { name, .. } | SyncError::Resolver { name, .. } => Some(name),
            _ => None,
        }
    }
}
