//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了类型擦除的序列化适配器及其注册表。
//!
//! 蜡烛中保存的托管对象负载类型各不相同，管理器只通过适配器访问负载。
//! 适配器按（序列化器类型，负载类型）缓存在管理器自己的注册表中。

use super::Serializer;
use crate::error::{CacheError, Result};
use dashmap::DashMap;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// 类型擦除后的负载
pub type Payload = Box<dyn Any + Send + Sync>;

type SerializeFn = Box<dyn Fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>> + Send + Sync>;
type DeserializeFn = Box<dyn Fn(&[u8]) -> Result<Payload> + Send + Sync>;
type EstimateFn = Box<dyn Fn(&(dyn Any + Send + Sync)) -> Result<u64> + Send + Sync>;

/// 序列化适配器
///
/// 闭包捕获原始的类型化序列化器，对外只暴露基于 `Any` 的接口
pub struct SerializerAdapter {
    payload_type: &'static str,
    serializer_type: &'static str,
    serialize: SerializeFn,
    deserialize: DeserializeFn,
    estimate: EstimateFn,
}

impl fmt::Debug for SerializerAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerAdapter")
            .field("payload_type", &self.payload_type)
            .field("serializer_type", &self.serializer_type)
            .finish()
    }
}

fn mismatch(payload_type: &'static str, serializer_type: &'static str) -> CacheError {
    CacheError::TypeMismatch(format!(
        "{} adapter for {} received a payload of another type",
        serializer_type, payload_type
    ))
}

impl SerializerAdapter {
    /// 包装类型化序列化器
    pub fn new<T, S>(serializer: S) -> Self
    where
        T: Send + Sync + 'static,
        S: Serializer<T>,
    {
        let serializer = Arc::new(serializer);
        let payload_type = type_name::<T>();
        let serializer_type = type_name::<S>();

        let for_serialize = serializer.clone();
        let for_deserialize = serializer.clone();
        let for_estimate = serializer;

        Self {
            payload_type,
            serializer_type,
            serialize: Box::new(move |payload| {
                let typed = payload
                    .downcast_ref::<T>()
                    .ok_or_else(|| mismatch(payload_type, serializer_type))?;
                for_serialize.serialize(typed)
            }),
            deserialize: Box::new(move |data| {
                let typed = for_deserialize.deserialize(data)?;
                Ok(Box::new(typed) as Payload)
            }),
            estimate: Box::new(move |payload| {
                let typed = payload
                    .downcast_ref::<T>()
                    .ok_or_else(|| mismatch(payload_type, serializer_type))?;
                Ok(for_estimate.estimate_size(typed))
            }),
        }
    }

    /// 序列化负载
    pub fn serialize(&self, payload: &(dyn Any + Send + Sync)) -> Result<Vec<u8>> {
        (self.serialize)(payload)
    }

    /// 反序列化负载
    pub fn deserialize(&self, data: &[u8]) -> Result<Payload> {
        (self.deserialize)(data)
    }

    /// 估算负载大小
    pub fn estimate_size(&self, payload: &(dyn Any + Send + Sync)) -> Result<u64> {
        (self.estimate)(payload)
    }

    /// 负载类型名称
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// 序列化器类型名称
    pub fn serializer_type(&self) -> &'static str {
        self.serializer_type
    }
}

/// 适配器注册表
///
/// 作用域为单个管理器实例，通过 entry API 保证同一类型组合只构造一个适配器
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    adapters: DashMap<(TypeId, TypeId), Arc<SerializerAdapter>>,
}

impl AdapterRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取或创建序列化器对应的适配器
    ///
    /// 已存在时传入的序列化器实例直接丢弃，复用已有适配器
    pub fn adapter_for<T, S>(&self, serializer: S) -> Arc<SerializerAdapter>
    where
        T: Send + Sync + 'static,
        S: Serializer<T>,
    {
        self.adapters
            .entry((TypeId::of::<S>(), TypeId::of::<T>()))
            .or_insert_with(|| {
                debug!(
                    "Creating serializer adapter: serializer={}, payload={}",
                    type_name::<S>(),
                    type_name::<T>()
                );
                Arc::new(SerializerAdapter::new::<T, S>(serializer))
            })
            .clone()
    }

    /// 已构造的适配器数量
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
