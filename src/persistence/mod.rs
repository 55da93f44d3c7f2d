//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了持久化后端接口，被淘汰的负载以字节形式保存在后端中。

pub mod file;
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub use file::FilePersistence;
pub use memory::MemoryPersistence;

/// 持久化后端特征
///
/// 后端在进程生命周期内可用即可，不要求跨重启的持久性
#[async_trait]
pub trait Persistence: Send + Sync {
    /// 保存对象字节，相同键的旧数据被覆盖
    ///
    /// # 参数
    ///
    /// * `key` - 托管对象的唯一键
    /// * `data` - 序列化后的负载
    async fn store(&self, key: Uuid, data: Vec<u8>) -> Result<()>;

    /// 读取对象字节，不删除已保存的数据
    ///
    /// # 返回值
    ///
    /// 返回保存的字节，键不存在时返回错误
    async fn load(&self, key: Uuid) -> Result<Vec<u8>>;

    /// 删除对象字节，键不存在时视为成功
    async fn remove(&self, key: Uuid) -> Result<()>;
}
