//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了管理器的运行时计数器。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 管理器计数器
///
/// 每个管理器实例一份，只增不减
#[derive(Debug, Default)]
pub struct ManagerMetrics {
    managed: AtomicU64,
    placed: AtomicU64,
    evicted: AtomicU64,
    rematerialized: AtomicU64,
    retired: AtomicU64,
    sweep_deferred: AtomicU64,
    sweep_failed: AtomicU64,
}

/// 计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// 交给管理器的对象数
    pub managed: u64,
    /// 放入蜡烛的次数（含重新加载后的再次放入）
    pub placed: u64,
    /// 淘汰到持久化后端的次数
    pub evicted: u64,
    /// 从持久化后端重新加载的次数
    pub rematerialized: u64,
    /// 因废弃而退休的对象数
    pub retired: u64,
    /// 超出容量但没有可淘汰对象而推迟的扫描次数
    pub sweep_deferred: u64,
    /// 访问或后台触发的扫描中失败的次数
    pub sweep_failed: u64,
}

impl ManagerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_managed(&self) {
        self.managed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_placed(&self) {
        self.placed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rematerialized(&self) {
        self.rematerialized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retired(&self) {
        self.retired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep_deferred(&self) {
        self.sweep_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep_failed(&self) {
        self.sweep_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// 读取当前计数
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            managed: self.managed.load(Ordering::Relaxed),
            placed: self.placed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            rematerialized: self.rematerialized.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            sweep_deferred: self.sweep_deferred.load(Ordering::Relaxed),
            sweep_failed: self.sweep_failed.load(Ordering::Relaxed),
        }
    }
}
