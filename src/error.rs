//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了对象缓存的错误类型和处理机制。

use thiserror::Error;

/// 缓存系统错误类型枚举
///
/// 定义了托管对象生命周期中可能发生的各种错误类型
#[derive(Error, Debug)]
pub enum CacheError {
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 持久化后端操作失败
    #[error("Persistence operation failed: {0}")]
    Persistence(String),

    /// 内部不变量被破坏（蜡烛索引不一致、缺失蜡烛等）
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// 负载类型与序列化适配器不匹配
    #[error("Payload type mismatch: {0}")]
    TypeMismatch(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 关闭错误
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

/// 缓存操作结果类型别名
///
/// 简化错误处理，所有缓存操作都返回此类型
pub type Result<T> = std::result::Result<T, CacheError>;
