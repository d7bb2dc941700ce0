use super::{lookup_content_type, now_millis, FileData, FileList, FileMeta, FilePerm, Storage};
use crate::error::StorageError;
use anyhow::Result;
use async_trait::async_trait;
use filetime::FileTime;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use walkdir::WalkDir;

/// 写入过程中临时文件的后缀，列举时跳过
const TEMP_SUFFIX: &str = ".spacesync-tmp";

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
    excluded_names: Vec<String>,
}

impl LocalStorage {
    pub fn new(path: &str) -> Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let base_path = base_path.canonicalize()?;
        let name = format!("local:{}", path);
        Ok(Self {
            base_path,
            name,
            excluded_names: super::DEFAULT_EXCLUDED_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
    }

    /// 替换排除的文件名列表
    pub fn with_excluded(mut self, names: Vec<String>) -> Self {
        self.excluded_names = names;
        self
    }

    /// 将文件名解析为空间内的绝对路径，拒绝越出根目录的名字
    fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        let trimmed = name.trim_start_matches('/').trim_start_matches('\\');
        let relative = Path::new(trimmed);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if trimmed.is_empty() || escapes {
            return Err(StorageError::OutsideSpace(name.to_string()).into());
        }
        Ok(self.base_path.join(relative))
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    fn meta_from(name: &str, metadata: &std::fs::Metadata) -> Result<FileMeta> {
        let modified = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)?
            .as_millis() as i64;

        Ok(FileMeta {
            name: name.to_string(),
            last_modified: modified,
            size: metadata.len(),
            content_type: lookup_content_type(name),
            perm: FilePerm::Rw,
        })
    }

    fn map_not_found(name: &str, e: std::io::Error) -> anyhow::Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(name.to_string()).into()
        } else {
            e.into()
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn fetch_file_list(&self) -> Result<FileList> {
        let base_path = self.base_path.clone();
        let excluded = self.excluded_names.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let files: Vec<FileMeta> = tokio::task::spawn_blocking(move || {
            WalkDir::new(&base_path)
                .follow_links(false)
                .into_iter()
                // 跳过空间内的隐藏目录，根目录本身即使隐藏也照常列举
                .filter_entry(|e| {
                    e.depth() == 0
                        || !e.file_type().is_dir()
                        || !e.file_name().to_string_lossy().starts_with('.')
                })
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|entry| {
                    let relative = entry.path().strip_prefix(&base_path).ok()?.to_str()?;
                    let name = Self::normalize_path(relative);

                    if name.ends_with(TEMP_SUFFIX) || excluded.iter().any(|x| *x == name) {
                        return None;
                    }

                    // 列举过程中被删除的文件直接忽略
                    let metadata = entry.metadata().ok()?;
                    Self::meta_from(&name, &metadata).ok()
                })
                .collect()
        })
        .await?;

        Ok(FileList {
            files,
            timestamp: now_millis(),
        })
    }

    async fn read_file(&self, name: &str) -> Result<FileData> {
        let full_path = self.resolve_path(name)?;
        let data = fs::read(&full_path)
            .await
            .map_err(|e| Self::map_not_found(name, e))?;
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| Self::map_not_found(name, e))?;

        Ok(FileData {
            data,
            meta: Self::meta_from(name, &metadata)?,
        })
    }

    async fn write_file(
        &self,
        name: &str,
        data: Vec<u8>,
        timestamp: Option<i64>,
    ) -> Result<FileMeta> {
        let full_path = self.resolve_path(name)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let mut temp_name = full_path.as_os_str().to_owned();
        temp_name.push(TEMP_SUFFIX);
        let temp_path = PathBuf::from(temp_name);
        fs::write(&temp_path, data).await?;

        if let Some(ts) = timestamp {
            let mtime = FileTime::from_unix_time(
                ts.div_euclid(1000),
                (ts.rem_euclid(1000) * 1_000_000) as u32,
            );
            let pinned = temp_path.clone();
            tokio::task::spawn_blocking(move || filetime::set_file_mtime(&pinned, mtime))
                .await??;
        }

        fs::rename(&temp_path, &full_path).await?;

        let metadata = fs::metadata(&full_path).await?;
        Self::meta_from(name, &metadata)
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        let full_path = self.resolve_path(name)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            // 已经不存在，视为删除成功
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_file_meta(&self, name: &str) -> Result<FileMeta> {
        let full_path = self.resolve_path(name)?;
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| Self::map_not_found(name, e))?;
        if metadata.is_dir() {
            return Err(StorageError::NotFound(name.to_string()).into());
        }
        Self::meta_from(name, &metadata)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap()).unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn write_creates_parents_and_pins_mtime() {
        let (_dir, storage) = storage();
        let meta = storage
            .write_file("notes/deep/page.md", b"hi".to_vec(), Some(1_600_000_000_123))
            .await
            .unwrap();

        assert_eq!(meta.last_modified, 1_600_000_000_123);
        assert_eq!(meta.size, 2);
        assert_eq!(meta.content_type, "text/markdown");

        let file = storage.read_file("notes/deep/page.md").await.unwrap();
        assert_eq!(file.data, b"hi");
        assert_eq!(file.meta.last_modified, 1_600_000_000_123);
    }

    #[tokio::test]
    async fn listing_skips_hidden_dirs_and_excluded_names() {
        let (dir, storage) = storage();
        storage.write_file("index.md", b"a".to_vec(), None).await.unwrap();
        storage.write_file("sub/b.txt", b"b".to_vec(), None).await.unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::write(dir.path().join("sync.json"), "{}").unwrap();
        std::fs::write(dir.path().join("half.md.spacesync-tmp"), "x").unwrap();

        let mut names: Vec<_> = storage
            .fetch_file_list()
            .await
            .unwrap()
            .files
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["index.md", "sub/b.txt"]);
    }

    #[tokio::test]
    async fn missing_files_report_not_found() {
        let (_dir, storage) = storage();
        let err = storage.read_file("nope").await.unwrap_err();
        assert!(StorageError::is_not_found(&err));
        let err = storage.get_file_meta("nope").await.unwrap_err();
        assert!(StorageError::is_not_found(&err));
        // 删除不存在的文件不报错
        storage.delete_file("nope").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_names_escaping_the_space() {
        let (_dir, storage) = storage();
        let err = storage
            .write_file("../outside", b"x".to_vec(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::OutsideSpace(_))
        ));
    }
}
