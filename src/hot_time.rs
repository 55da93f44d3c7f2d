//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了热度预测接口：根据流键预测对象下一次被访问的时间。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

/// 热度预测器
///
/// 预测结果决定淘汰顺序：下一次访问越晚，越应该被淘汰
pub trait HotTimeCalculator: Send + Sync {
    /// 预测指定流键的对象下一次被访问的时间
    ///
    /// # 参数
    ///
    /// * `flow_key` - 流键
    /// * `access_count` - 该对象已被访问的次数
    fn predict(&self, flow_key: &str, access_count: u32) -> DateTime<Utc>;

    /// 反馈一次实际访问，`waited` 为距离上一次访问（或创建）的时长
    fn record_access(&self, _flow_key: &str, _access_count: u32, _waited: Duration) {}
}

fn after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64)
}

/// 固定延迟预测器
#[derive(Debug, Clone)]
pub struct FixedDelayCalculator {
    delay: Duration,
}

impl FixedDelayCalculator {
    /// 创建固定延迟预测器
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedDelayCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl HotTimeCalculator for FixedDelayCalculator {
    fn predict(&self, _flow_key: &str, _access_count: u32) -> DateTime<Utc> {
        after(self.delay)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct WaitStats {
    total_millis: u128,
    samples: u64,
}

/// 平均等待时间预测器
///
/// 按流键统计观测到的访问间隔并取平均值，没有样本时使用默认延迟
#[derive(Debug)]
pub struct AverageWaitCalculator {
    default_delay: Duration,
    stats: DashMap<String, WaitStats>,
}

impl AverageWaitCalculator {
    /// 创建平均等待时间预测器
    pub fn new(default_delay: Duration) -> Self {
        Self {
            default_delay,
            stats: DashMap::new(),
        }
    }

    /// 指定流键当前的平均等待时间
    pub fn average_wait(&self, flow_key: &str) -> Option<Duration> {
        self.stats.get(flow_key).and_then(|stats| {
            let average = stats.total_millis.checked_div(stats.samples as u128)?;
            Some(Duration::from_millis(average.min(u64::MAX as u128) as u64))
        })
    }
}

impl HotTimeCalculator for AverageWaitCalculator {
    fn predict(&self, flow_key: &str, _access_count: u32) -> DateTime<Utc> {
        after(self.average_wait(flow_key).unwrap_or(self.default_delay))
    }

    fn record_access(&self, flow_key: &str, _access_count: u32, waited: Duration) {
        let mut stats = self.stats.entry(flow_key.to_string()).or_default();
        stats.total_millis += waited.as_millis();
        stats.samples += 1;
    }
}
