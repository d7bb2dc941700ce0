//! # spacesync
//!
//! 两个文件空间（主端、副端）之间的双向同步引擎。每轮同步对比两端当前的文件列表
//! 和上次同步时记录的状态，推断出新建、修改、删除和冲突，并让两端收敛到一致。
//!
//! ```rust,ignore
//! use spacesync::{primary_conflict_resolver, LocalStorage, SpaceSync, SyncStatusMap};
//! use std::sync::Arc;
//!
//! let sync = SpaceSync::new(
//!     Arc::new(LocalStorage::new("./primary")?),
//!     Arc::new(LocalStorage::new("./secondary")?),
//! );
//! let mut status = SyncStatusMap::new();
//! let report = sync.sync_files(&mut status, &primary_conflict_resolver()).await?;
//! println!("{} 个操作", report.actions);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::core::{
    primary_conflict_resolver, remove_directive_body, ConflictPolicy, ConflictResolver,
    JsonStatusStore, PolicyResolver, SpaceSync, SqliteStatusStore, StatusStore, SyncReport,
    SyncStatusItem, SyncStatusMap,
};
pub use config::SyncConfig;
pub use error::{StorageError, SyncError};
pub use storage::{FileMeta, LocalStorage, MemoryStorage, ObjectStorage, Storage};
