//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了负载序列化机制：按负载类型绑定的序列化器，以及供管理器使用的类型擦除适配器。

pub mod adapter;
pub mod json;

use crate::error::Result;

pub use adapter::{AdapterRegistry, Payload, SerializerAdapter};
pub use json::JsonSerializer;

/// 序列化器特征
///
/// 绑定到具体的负载类型 `T`，在负载被淘汰到持久化后端时使用
pub trait Serializer<T>: Send + Sync + 'static {
    /// 序列化负载为字节数组
    fn serialize(&self, payload: &T) -> Result<Vec<u8>>;

    /// 从字节数组反序列化负载
    fn deserialize(&self, data: &[u8]) -> Result<T>;

    /// 估算负载占用的内存大小，仅用于容量统计，不要求精确
    fn estimate_size(&self, payload: &T) -> u64;
}
