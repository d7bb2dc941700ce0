//! 应用配置模块

use crate::core::conflict::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// 最大并发传输数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
    /// 单个文件操作失败后的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），按指数退避
    #[serde(default = "default_retry_delay")]
    pub retry_base_delay_ms: u64,
    /// 默认冲突解决策略
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// 视为文本（参与指令块规范化）的扩展名
    #[serde(default = "default_text_extensions")]
    pub text_extensions: Vec<String>,
    /// 本地存储不列举的内部文件
    #[serde(default = "default_excluded_names")]
    pub excluded_names: Vec<String>,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    200
}

pub fn default_text_extensions() -> Vec<String> {
    ["md", "markdown", "txt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_excluded_names() -> Vec<String> {
    crate::storage::DEFAULT_EXCLUDED_NAMES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_delay(),
            conflict_policy: ConflictPolicy::default(),
            text_extensions: default_text_extensions(),
            excluded_names: default_excluded_names(),
        }
    }
}

impl SyncConfig {
    /// 从配置文件加载同步配置，缺失或格式错误时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        read_section(config_dir, "sync").unwrap_or_default()
    }

    /// 保存同步配置（保留配置文件中的其他部分）
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        write_section(config_dir, "sync", self)
    }
}

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("spacesync"))
        .unwrap_or_else(|| PathBuf::from(".spacesync"))
}

/// 读取 config.json 中的某一部分
pub(crate) fn read_section<T: serde::de::DeserializeOwned>(
    config_dir: &Path,
    key: &str,
) -> Option<T> {
    let content = fs::read_to_string(config_dir.join("config.json")).ok()?;
    let config = serde_json::from_str::<serde_json::Value>(&content).ok()?;
    serde_json::from_value(config.get(key)?.clone()).ok()
}

/// 更新 config.json 中的某一部分
pub(crate) fn write_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;
    let config_file = config_dir.join("config.json");

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[key] = serde_json::to_value(value).map_err(io::Error::other)?;

    let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
    fs::write(&config_file, content)
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
