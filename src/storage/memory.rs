//! 内存存储 - 进程内的文件空间，可设为只读（打包资源）

use super::{lookup_content_type, now_millis, FileData, FileList, FileMeta, FilePerm, Storage};
use crate::error::StorageError;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    last_modified: i64,
}

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<String, MemoryFile>,
    /// 单调时钟，保证同一存储内的写入时间严格递增
    clock: i64,
}

pub struct MemoryStorage {
    inner: Mutex<Inner>,
    name: String,
    read_only: bool,
}

impl MemoryStorage {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            name: format!("memory:{}", name),
            read_only: false,
        }
    }

    /// 用给定文件构造只读存储
    pub fn read_only(name: &str, files: Vec<(String, Vec<u8>)>) -> Self {
        let storage = Self::new(name);
        {
            let mut inner = storage.lock();
            for (file_name, data) in files {
                let ts = inner.tick();
                inner.files.insert(
                    file_name,
                    MemoryFile {
                        data,
                        last_modified: ts,
                    },
                );
            }
        }
        Self {
            read_only: true,
            ..storage
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // 锁内没有会 panic 的操作，中毒时直接取回数据
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn perm(&self) -> FilePerm {
        if self.read_only {
            FilePerm::Ro
        } else {
            FilePerm::Rw
        }
    }

    fn meta(&self, name: &str, file: &MemoryFile) -> FileMeta {
        FileMeta {
            name: name.to_string(),
            last_modified: file.last_modified,
            size: file.data.len() as u64,
            content_type: lookup_content_type(name),
            perm: self.perm(),
        }
    }

    fn ensure_writable(&self, name: &str) -> Result<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly(name.to_string()).into());
        }
        Ok(())
    }
}

impl Inner {
    fn tick(&mut self) -> i64 {
        self.clock = now_millis().max(self.clock + 1);
        self.clock
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn fetch_file_list(&self) -> Result<FileList> {
        let inner = self.lock();
        let files = inner
            .files
            .iter()
            .map(|(name, file)| self.meta(name, file))
            .collect();
        Ok(FileList {
            files,
            timestamp: now_millis(),
        })
    }

    async fn read_file(&self, name: &str) -> Result<FileData> {
        let inner = self.lock();
        let file = inner
            .files
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        Ok(FileData {
            data: file.data.clone(),
            meta: self.meta(name, file),
        })
    }

    async fn write_file(
        &self,
        name: &str,
        data: Vec<u8>,
        timestamp: Option<i64>,
    ) -> Result<FileMeta> {
        self.ensure_writable(name)?;
        let mut inner = self.lock();
        let last_modified = match timestamp {
            Some(ts) => {
                inner.clock = inner.clock.max(ts);
                ts
            }
            None => inner.tick(),
        };
        let file = MemoryFile {
            data,
            last_modified,
        };
        let meta = self.meta(name, &file);
        inner.files.insert(name.to_string(), file);
        Ok(meta)
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        self.ensure_writable(name)?;
        self.lock().files.remove(name);
        Ok(())
    }

    async fn get_file_meta(&self, name: &str) -> Result<FileMeta> {
        let inner = self.lock();
        inner
            .files
            .get(name)
            .map(|f| self.meta(name, f))
            .ok_or_else(|| StorageError::NotFound(name.to_string()).into())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
