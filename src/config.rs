//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存管理器的配置结构和规范化逻辑。

use crate::error::{CacheError, Result};
use serde::Deserialize;

/// 缓存管理器配置
///
/// 非正数的池大小与初始大小不会导致构造失败，而是在 [`CacheConfig::normalized`] 中被修正为 1
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// 常驻负载的估算大小上限，超过后触发淘汰扫描
    pub capacity: u64,
    /// 初始对象数量预算，平均分配到每个蜡烛
    pub initial_size: i64,
    /// 蜡烛数量，同时也是管理侧并发修改的上限
    pub candle_pool_size: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 20 * 1024,
            initial_size: 100,
            candle_pool_size: 4,
        }
    }
}

impl CacheConfig {
    /// 创建指定池大小与初始大小的配置，容量使用默认值
    pub fn new(candle_pool_size: i64, initial_size: i64) -> Self {
        Self {
            candle_pool_size,
            initial_size,
            ..Default::default()
        }
    }

    /// 设置淘汰阈值
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// 从TOML文本解析配置
    ///
    /// # 参数
    ///
    /// * `text` - TOML格式的配置内容
    ///
    /// # 返回值
    ///
    /// 返回解析后的配置，解析失败时返回 `ConfigError`
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CacheError::ConfigError(e.to_string()))
    }

    /// 返回规范化后的配置
    ///
    /// `candle_pool_size` 与 `initial_size` 小于等于 0 时被修正为 1
    pub fn normalized(&self) -> Self {
        Self {
            capacity: self.capacity,
            initial_size: self.initial_size.max(1),
            candle_pool_size: self.candle_pool_size.max(1),
        }
    }

    /// 规范化后的蜡烛数量
    pub fn pool_size(&self) -> usize {
        self.candle_pool_size.max(1) as usize
    }

    /// 每个蜡烛的预分配容量，最少为 1
    pub fn per_candle_capacity(&self) -> usize {
        let normalized = self.normalized();
        ((normalized.initial_size / normalized.candle_pool_size) as usize).max(1)
    }
}
