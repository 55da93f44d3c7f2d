//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于内存的持久化后端，主要用于测试与演示。

use super::Persistence;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

/// 内存持久化后端
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    entries: DashMap<Uuid, Vec<u8>>,
}

impl MemoryPersistence {
    /// 创建空的内存后端
    pub fn new() -> Self {
        Self::default()
    }

    /// 已保存的条目数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否没有任何条目
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 指定键是否有保存的数据
    pub fn contains(&self, key: &Uuid) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    #[instrument(skip(self, data), level = "debug")]
    async fn store(&self, key: Uuid, data: Vec<u8>) -> Result<()> {
        debug!("memory store: key={}, len={}", key, data.len());
        self.entries.insert(key, data);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn load(&self, key: Uuid) -> Result<Vec<u8>> {
        self.entries
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CacheError::Persistence(format!("no stored data for key {}", key)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn remove(&self, key: Uuid) -> Result<()> {
        self.entries.remove(&key);
        Ok(())
    }
}
