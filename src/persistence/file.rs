//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于文件的持久化后端，每个键对应基础目录下的一个文件。

use super::Persistence;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};
use uuid::Uuid;

/// 文件持久化后端
#[derive(Debug, Clone)]
pub struct FilePersistence {
    base_dir: PathBuf,
}

impl FilePersistence {
    /// 创建文件后端，基础目录不存在时自动创建
    ///
    /// # 参数
    ///
    /// * `base_dir` - 保存负载文件的目录
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// 基础目录
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: Uuid) -> PathBuf {
        self.base_dir.join(key.to_string())
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    #[instrument(skip(self, data), level = "debug")]
    async fn store(&self, key: Uuid, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        debug!("file store: path={}, len={}", path.display(), data.len());
        tokio::fs::write(&path, data).await.map_err(|e| {
            CacheError::Persistence(format!("failed to write {}: {}", path.display(), e))
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn load(&self, key: Uuid) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        tokio::fs::read(&path).await.map_err(|e| {
            CacheError::Persistence(format!("failed to read {}: {}", path.display(), e))
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove(&self, key: Uuid) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Persistence(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
