//! 对象存储 - 基于 opendal Operator（S3、WebDAV 等）

use super::{
    lookup_content_type, now_millis, FileData, FileList, FileMeta, FilePerm, Storage,
    IO_TIMEOUT_SECS, OP_TIMEOUT_SECS,
};
use crate::error::StorageError;
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

pub struct ObjectStorage {
    operator: Operator,
    name: String,
    excluded_names: Vec<String>,
}

impl ObjectStorage {
    /// 包装任意 opendal Operator
    pub fn from_operator(operator: Operator, name: &str) -> Self {
        Self {
            operator,
            name: name.to_string(),
            excluded_names: super::DEFAULT_EXCLUDED_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
        prefix: Option<String>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref p) = prefix {
            builder = builder.root(p);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "s3://{}{}",
            bucket,
            prefix
                .as_deref()
                .map(|p| format!("/{}", p))
                .unwrap_or_default()
        );

        Ok(Self::from_operator(operator, &name))
    }

    pub async fn webdav(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<String>,
    ) -> Result<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        let operator = Operator::new(builder)?.finish();

        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.as_deref()
                .map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        // 某些 WebDAV 服务器需要先创建根目录，已存在时忽略错误
        let _ = operator.create_dir("/").await;

        Ok(Self::from_operator(operator, &name))
    }

    /// 替换排除的文件名列表
    pub fn with_excluded(mut self, names: Vec<String>) -> Self {
        self.excluded_names = names;
        self
    }

    /// 没有修改时间的后端直接报错，否则该端的修改永远不会被同步发现
    fn to_meta(&self, name: &str, meta: &opendal::Metadata) -> Result<FileMeta> {
        let last_modified = meta
            .last_modified()
            .ok_or_else(|| StorageError::MissingModifiedTime {
                space: self.name.clone(),
                name: name.to_string(),
            })?
            .timestamp_millis();

        Ok(FileMeta {
            name: name.to_string(),
            last_modified,
            size: meta.content_length(),
            content_type: meta
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| lookup_content_type(name)),
            perm: FilePerm::Rw,
        })
    }

    fn map_not_found(name: &str, e: opendal::Error) -> anyhow::Error {
        if e.kind() == opendal::ErrorKind::NotFound {
            StorageError::NotFound(name.to_string()).into()
        } else {
            e.into()
        }
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn fetch_file_list(&self) -> Result<FileList> {
        let mut files = Vec::new();

        let mut lister = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let meta = entry.metadata();
            if meta.is_dir() {
                continue;
            }

            let name = entry.path().trim_start_matches('/').to_string();
            if name.is_empty() || self.excluded_names.iter().any(|x| *x == name) {
                continue;
            }

            files.push(self.to_meta(&name, meta)?);
        }

        Ok(FileList {
            files,
            timestamp: now_millis(),
        })
    }

    async fn read_file(&self, name: &str) -> Result<FileData> {
        let data = self
            .operator
            .read(name)
            .await
            .map_err(|e| Self::map_not_found(name, e))?;
        let meta = self.get_file_meta(name).await?;
        Ok(FileData {
            data: data.to_vec(),
            meta,
        })
    }

    async fn write_file(
        &self,
        name: &str,
        data: Vec<u8>,
        _timestamp: Option<i64>,
    ) -> Result<FileMeta> {
        // 对象存储无法固定修改时间，使用服务端分配的时间
        self.operator.write(name, data).await?;
        self.get_file_meta(name).await
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        // 删除不存在的对象不会报错
        self.operator.delete(name).await?;
        Ok(())
    }

    async fn get_file_meta(&self, name: &str) -> Result<FileMeta> {
        let meta = self
            .operator
            .stat(name)
            .await
            .map_err(|e| Self::map_not_found(name, e))?;
        self.to_meta(name, &meta)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
