//! asyncmem - 异步内存管理器
//!
//! 将对象交给管理器后，管理器按预测的下一次访问时间把对象分布在一组蜡烛（可索引优先队列）中，
//! 常驻对象的估算大小超过容量时把最不急需的对象淘汰到持久化后端，再次访问时透明地重新加载。

#![doc(html_root_url = "https://docs.rs/asyncmem/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod candle;
pub mod cli;
pub mod config;
pub mod error;
pub mod handle;
pub mod hot_time;
pub mod lock;
pub mod manager;
pub mod metrics;
pub mod object;
pub mod persistence;
pub mod pool;
pub mod serialization;

// Re-export commonly used items
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use handle::{AsyncHandle, SetupHandle};
pub use hot_time::{AverageWaitCalculator, FixedDelayCalculator, HotTimeCalculator};
pub use manager::{AsyncMemManager, CacheSnapshot};
pub use metrics::MetricsSnapshot;
pub use object::ManagementState;
pub use persistence::{FilePersistence, MemoryPersistence, Persistence};
pub use serialization::{JsonSerializer, Serializer};

/// asyncmem 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
