//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了异步内存管理器：对象放置、淘汰扫描、重新加载、退休与关闭。
//!
//! 锁顺序约定：持有蜡烛租约期间不会等待对象锁（淘汰只用 `try_manage`），
//! 持有对象管理锁期间可以等待蜡烛，因此两者之间不会形成等待环。

use crate::candle::CandleEntry;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::handle::SetupHandle;
use crate::hot_time::{FixedDelayCalculator, HotTimeCalculator};
use crate::metrics::{ManagerMetrics, MetricsSnapshot};
use crate::object::{ManagedObject, ManagementState};
use crate::persistence::{MemoryPersistence, Persistence};
use crate::pool::{CandleLease, CandlePool};
use crate::serialization::{AdapterRegistry, Serializer};
use dashmap::DashSet;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 管理器状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSnapshot {
    /// 常驻对象估算大小之和
    pub used_size: u64,
    /// 常驻对象数量
    pub resident: usize,
    /// 每个蜡烛中的对象数量
    pub candle_sizes: Vec<usize>,
    /// 持久化后端中由本管理器保存的副本数量
    pub persisted: usize,
    /// 计数器
    pub metrics: MetricsSnapshot,
}

pub(crate) struct ManagerInner {
    config: CacheConfig,
    hot_time: Arc<dyn HotTimeCalculator>,
    persistence: Arc<dyn Persistence>,
    pool: CandlePool<ManagedObject>,
    registry: AdapterRegistry,
    used_size: AtomicU64,
    resident: AtomicUsize,
    persisted: DashSet<Uuid>,
    metrics: ManagerMetrics,
    shut_down: AtomicBool,
    next_seq: AtomicU64,
    sweep_trigger: Notify,
}

/// 异步内存管理器
///
/// 克隆开销很小，所有克隆共享同一组蜡烛与计数
#[derive(Clone)]
pub struct AsyncMemManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for AsyncMemManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMemManager")
            .field("config", &self.inner.config)
            .field("used_size", &self.used_size())
            .field("resident", &self.resident_count())
            .finish()
    }
}

impl AsyncMemManager {
    /// 创建管理器
    ///
    /// # 参数
    ///
    /// * `config` - 配置，非正数的池大小与初始大小会被规范化
    /// * `hot_time` - 热度预测器
    /// * `persistence` - 淘汰对象的持久化后端
    pub fn new(
        config: CacheConfig,
        hot_time: Arc<dyn HotTimeCalculator>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let config = config.normalized();
        let pool = CandlePool::new(config.pool_size(), config.per_candle_capacity());
        info!(
            "AsyncMemManager created: candles={}, per_candle_capacity={}, capacity={}",
            config.pool_size(),
            config.per_candle_capacity(),
            config.capacity
        );
        Self {
            inner: Arc::new(ManagerInner {
                config,
                hot_time,
                persistence,
                pool,
                registry: AdapterRegistry::new(),
                used_size: AtomicU64::new(0),
                resident: AtomicUsize::new(0),
                persisted: DashSet::new(),
                metrics: ManagerMetrics::new(),
                shut_down: AtomicBool::new(false),
                next_seq: AtomicU64::new(0),
                sweep_trigger: Notify::new(),
            }),
        }
    }

    /// 使用固定延迟预测器与内存持久化后端创建管理器
    pub fn with_defaults(config: CacheConfig) -> Self {
        Self::new(
            config,
            Arc::new(FixedDelayCalculator::default()),
            Arc::new(MemoryPersistence::new()),
        )
    }

    /// 交给管理器一个负载
    ///
    /// 负载为空时返回 `None`。此时只估算大小并创建对象，
    /// 对象在 [`SetupHandle::finish`] 之前不会进入蜡烛，也不计入已用大小。
    ///
    /// # 参数
    ///
    /// * `flow_key` - 流键，用于预测热度
    /// * `payload` - 负载
    /// * `serializer` - 负载的序列化器，同一类型的序列化器在管理器内只包装一次
    #[instrument(skip(self, payload, serializer), level = "debug")]
    pub fn manage<T, S>(
        &self,
        flow_key: &str,
        payload: Option<T>,
        serializer: S,
    ) -> Option<SetupHandle<T>>
    where
        T: Send + Sync + 'static,
        S: Serializer<T>,
    {
        let payload = payload?;
        let adapter = self.inner.registry.adapter_for::<T, S>(serializer);
        let estimated_size = match adapter.estimate_size(&payload) {
            Ok(size) => size,
            Err(e) => {
                error!("Failed to estimate size for flow {}: {}", flow_key, e);
                return None;
            }
        };
        let seq = self.inner.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        let object = Arc::new(ManagedObject::new(
            flow_key,
            Box::new(payload),
            estimated_size,
            adapter,
            seq,
        ));
        self.inner.metrics.record_managed();
        debug!(
            "Object managed: key={}, flow_key={}, size={}, serializer={}",
            object.key(),
            flow_key,
            estimated_size,
            object.adapter().serializer_type()
        );
        Some(SetupHandle::new(self.clone(), object))
    }

    /// 常驻对象估算大小之和
    pub fn used_size(&self) -> u64 {
        self.inner.used_size.load(AtomicOrdering::Acquire)
    }

    /// 常驻对象数量
    pub fn resident_count(&self) -> usize {
        self.inner.resident.load(AtomicOrdering::Acquire)
    }

    /// 已构造的序列化适配器数量
    pub fn adapter_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// 规范化后的配置
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// 是否已关闭
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(AtomicOrdering::Acquire)
    }

    /// 计数器快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// 简短的调试信息
    pub fn debug_info(&self) -> String {
        format!("Used:{} Items:{}", self.used_size(), self.resident_count())
    }

    /// 完整的状态快照
    ///
    /// 需要依次借出每个蜡烛读取大小
    pub async fn snapshot(&self) -> Result<CacheSnapshot> {
        let mut candle_sizes = Vec::with_capacity(self.inner.pool.size());
        for id in 0..self.inner.pool.size() {
            let lease = self.inner.pool.checkout_id(id).await?;
            candle_sizes.push(lease.len());
        }
        Ok(CacheSnapshot {
            used_size: self.used_size(),
            resident: self.resident_count(),
            candle_sizes,
            persisted: self.inner.persisted.len(),
            metrics: self.metrics(),
        })
    }

    /// 检查每个蜡烛的堆性质与下标记录
    pub async fn verify_candles(&self) -> Result<bool> {
        for id in 0..self.inner.pool.size() {
            let lease = self.inner.pool.checkout_id(id).await?;
            if !lease.is_consistent() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 执行一次淘汰扫描
    ///
    /// 返回是否淘汰或退休了一个对象。没有可选对象时推迟，不会等待被锁定的对象。
    #[instrument(skip(self), level = "debug")]
    pub async fn sweep_once(&self) -> Result<bool> {
        let Some(candidate) = self.survey().await? else {
            self.inner.metrics.record_sweep_deferred();
            debug!("Sweep deferred: no peekable candidate");
            return Ok(false);
        };
        self.evict(&candidate).await
    }

    /// 已用大小超过容量时持续扫描，直到回到容量以内或没有可淘汰的对象
    pub async fn sweep_if_needed(&self) -> Result<()> {
        while self.used_size() > self.inner.config.capacity {
            if !self.sweep_once().await? {
                break;
            }
        }
        Ok(())
    }

    /// 访问或放置之后的容量检查
    ///
    /// 失败只记录并计数，不影响触发它的操作；直接调用 [`Self::sweep_once`] 可以拿到错误
    pub(crate) async fn relieve_pressure(&self) {
        if let Err(e) = self.sweep_if_needed().await {
            self.inner.metrics.record_sweep_failed();
            warn!("Sweep after access failed: {}", e);
        }
    }

    /// 启动后台淘汰任务
    ///
    /// 按周期或在放置对象超出容量时被唤醒，管理器关闭后退出
    pub fn start_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = manager.inner.sweep_trigger.notified() => {}
                }
                if manager.is_shut_down() {
                    debug!("Sweeper stopped");
                    break;
                }
                if let Err(e) = manager.sweep_if_needed().await {
                    manager.inner.metrics.record_sweep_failed();
                    warn!("Background sweep failed: {}", e);
                }
            }
        })
    }

    /// 关闭管理器
    ///
    /// 借出全部蜡烛，移除所有常驻对象并删除持久化后端中的副本。
    /// 单个删除失败不会中断关闭，所有失败合并为一个 `ShutdownError`。
    #[instrument(skip(self), level = "info")]
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down AsyncMemManager: {}", self.debug_info());
        self.inner.shut_down.store(true, AtomicOrdering::Release);
        self.inner.sweep_trigger.notify_waiters();

        let mut errors = Vec::new();
        let mut removed = 0usize;

        let mut leases = self.inner.pool.drain().await?;
        for lease in leases.iter_mut() {
            while let Some(object) = lease.pop_back() {
                self.inner.release_size(&object);
                object.take_payload();
                object.settle(ManagementState::None, None);
                self.inner.persisted.remove(&object.key());
                if let Err(e) = self.inner.persistence.remove(object.key()).await {
                    warn!("Failed to remove stored copy of {}: {}", object.key(), e);
                    errors.push(format!("{}: {}", object.key(), e));
                }
                removed += 1;
            }
        }
        drop(leases);

        let stored: Vec<Uuid> = self.inner.persisted.iter().map(|key| *key).collect();
        for key in stored {
            self.inner.persisted.remove(&key);
            if let Err(e) = self.inner.persistence.remove(key).await {
                warn!("Failed to remove stored copy of {}: {}", key, e);
                errors.push(format!("{}: {}", key, e));
            }
        }

        if errors.is_empty() {
            info!(
                "AsyncMemManager shut down: removed={}, {}",
                removed,
                self.debug_info()
            );
            Ok(())
        } else {
            warn!("AsyncMemManager shut down with {} errors", errors.len());
            Err(CacheError::ShutdownError(errors.join("; ")))
        }
    }

    pub(crate) fn inner(&self) -> &ManagerInner {
        &self.inner
    }

    /// 找出所有蜡烛最小元素中淘汰优先级最高且可选的对象
    async fn survey(&self) -> Result<Option<Arc<ManagedObject>>> {
        let mut best: Option<Arc<ManagedObject>> = None;
        for id in 0..self.inner.pool.size() {
            let lease = self.inner.pool.checkout_id(id).await?;
            let Some(min) = lease.peek_min() else {
                continue;
            };
            if !min.is_peekable() {
                continue;
            }
            let better = match &best {
                Some(current) => min.eviction_cmp(current) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some(min.clone());
            }
        }
        Ok(best)
    }

    /// 淘汰一个候选对象
    async fn evict(&self, object: &Arc<ManagedObject>) -> Result<bool> {
        let Some(_guard) = object.lock().try_manage() else {
            self.inner.metrics.record_sweep_deferred();
            return Ok(false);
        };
        let Some((_, candle)) = object.claim(&[ManagementState::Managing]) else {
            return Ok(false);
        };
        let Some(candle) = candle else {
            object.settle(ManagementState::Managing, None);
            error!("Resident object {} has no candle", object.key());
            return Err(CacheError::InvariantViolation(format!(
                "resident object {} has no candle",
                object.key()
            )));
        };

        // 写入副本期间持有租约，关闭要等写入完成才能清空蜡烛并删除副本
        let mut lease = self.inner.pool.checkout_id(candle).await?;
        let index = match self.inner.locate(&lease, object) {
            Ok(Some(index)) => index,
            // 关闭时已被清空
            Ok(None) => return Ok(false),
            Err(e) => {
                object.settle(ManagementState::Managing, Some(candle));
                return Err(e);
            }
        };
        if self.inner.check_running().is_err() {
            // 留给关闭处理
            object.settle(ManagementState::Managing, Some(candle));
            return Ok(false);
        }

        let obsoleted = object.is_obsoleted();
        if !obsoleted {
            if let Err(e) = self.inner.store(object).await {
                object.settle(ManagementState::Managing, Some(candle));
                return Err(e);
            }
        }
        lease.remove_at(index);
        self.inner.release_size(object);
        drop(lease);

        object.take_payload();
        if obsoleted {
            object.settle(ManagementState::Obsoleted, None);
            self.inner.metrics.record_retired();
            debug!("Obsoleted object dropped by sweep: key={}", object.key());
        } else {
            object.settle(ManagementState::None, None);
            self.inner.metrics.record_evicted();
            debug!(
                "Object evicted: key={}, size={}, {}",
                object.key(),
                object.estimated_size(),
                self.debug_info()
            );
        }
        Ok(true)
    }
}

impl ManagerInner {
    fn check_running(&self) -> Result<()> {
        if self.shut_down.load(AtomicOrdering::Acquire) {
            Err(CacheError::ShutdownError(
                "manager has been shut down".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn release_size(&self, object: &ManagedObject) {
        self.used_size
            .fetch_sub(object.estimated_size(), AtomicOrdering::AcqRel);
        self.resident.fetch_sub(1, AtomicOrdering::AcqRel);
    }

    /// 预测热度并放入元素最少的空闲蜡烛，调用方必须已认领对象
    async fn place(&self, object: &Arc<ManagedObject>) -> Result<()> {
        let hot_time = self.hot_time.predict(object.flow_key(), object.access_count());
        object.set_hot_time(hot_time);

        let mut lease = self.pool.checkout().await;
        // 关闭标志在借出全部蜡烛之前设置，持有租约时再检查一次即可
        self.check_running()?;
        // 归还租约后对象即可被淘汰，计数必须先于插入
        let size = object.estimated_size();
        let used = self.used_size.fetch_add(size, AtomicOrdering::AcqRel) + size;
        self.resident.fetch_add(1, AtomicOrdering::AcqRel);
        object.sync_eviction_rank();
        lease.insert(object.clone());
        let candle = lease.id();
        object.settle(ManagementState::Managing, Some(candle));
        drop(lease);
        self.metrics.record_placed();
        debug!(
            "Object placed: key={}, candle={}, hot_time={}, used_size={}",
            object.key(),
            candle,
            object.hot_time(),
            used
        );
        if used > self.config.capacity {
            self.sweep_trigger.notify_one();
        }
        Ok(())
    }

    /// 完成设置：标记设置完成并放入蜡烛
    pub(crate) async fn finish(&self, object: &Arc<ManagedObject>) -> Result<()> {
        self.check_running()?;
        object.mark_done_setup();
        if object.claim(&[ManagementState::None]).is_none() {
            // 已被并发的退休处理
            return Ok(());
        }
        if let Err(e) = self.place(object).await {
            object.settle(ManagementState::None, None);
            return Err(e);
        }
        Ok(())
    }

    /// 从持久化后端重新加载负载，调用方必须持有对象的管理锁
    pub(crate) async fn rematerialize(&self, object: &Arc<ManagedObject>) -> Result<()> {
        if object.has_payload() {
            return Ok(());
        }
        self.check_running()?;
        if object.claim(&[ManagementState::None]).is_none() {
            error!(
                "Object {} has no payload but is in state {:?}",
                object.key(),
                object.placement_state()
            );
            return Err(CacheError::InvariantViolation(format!(
                "object {} has no payload and cannot be reloaded",
                object.key()
            )));
        }

        let payload = match self.load(object).await {
            Ok(payload) => payload,
            Err(e) => {
                object.settle(ManagementState::None, None);
                return Err(e);
            }
        };
        object.put_payload(payload);

        if let Err(e) = self.place(object).await {
            object.take_payload();
            object.settle(ManagementState::None, None);
            return Err(e);
        }
        self.metrics.record_rematerialized();
        debug!("Object rematerialized: key={}", object.key());

        // 对象已常驻，旧副本删除失败时仍保留记录，关闭时会再次删除
        self.persistence.remove(object.key()).await.map_err(|e| {
            warn!("Failed to remove stored copy of {}: {}", object.key(), e);
            e
        })?;
        self.persisted.remove(&object.key());
        Ok(())
    }

    /// 退休一个已废弃的对象
    pub(crate) async fn retire(&self, object: &Arc<ManagedObject>) -> Result<()> {
        let _guard = object.lock().manage().await;
        let Some((previous, candle)) =
            object.claim(&[ManagementState::Managing, ManagementState::None])
        else {
            return Ok(());
        };

        if previous == ManagementState::Managing {
            let Some(candle) = candle else {
                object.settle(previous, None);
                error!("Resident object {} has no candle", object.key());
                return Err(CacheError::InvariantViolation(format!(
                    "resident object {} has no candle",
                    object.key()
                )));
            };
            let mut lease = self.pool.checkout_id(candle).await?;
            match self.locate(&lease, object) {
                Ok(Some(index)) => {
                    lease.remove_at(index);
                    self.release_size(object);
                }
                Ok(None) => {}
                Err(e) => {
                    object.settle(previous, Some(candle));
                    return Err(e);
                }
            }
            drop(lease);
        }

        object.take_payload();
        object.settle(ManagementState::Obsoleted, None);
        self.metrics.record_retired();
        debug!("Object retired: key={}", object.key());

        if self.persisted.remove(&object.key()).is_some() {
            self.persistence.remove(object.key()).await.map_err(|e| {
                warn!("Failed to remove stored copy of {}: {}", object.key(), e);
                e
            })?;
        }
        Ok(())
    }

    /// 在已借出的蜡烛中核对对象记录的下标
    ///
    /// 返回 `Ok(None)` 表示管理器关闭时对象已被清空
    fn locate(
        &self,
        lease: &CandleLease<'_, ManagedObject>,
        object: &Arc<ManagedObject>,
    ) -> Result<Option<usize>> {
        let located = object
            .candle_index()
            .filter(|&index| lease.get(index).is_some_and(|at| Arc::ptr_eq(at, object)));
        match located {
            Some(index) => Ok(Some(index)),
            None if self.shut_down.load(AtomicOrdering::Acquire) => Ok(None),
            None => {
                error!(
                    "Candle {} index mismatch for object {}: recorded {:?}",
                    lease.id(),
                    object.key(),
                    object.candle_index()
                );
                Err(CacheError::InvariantViolation(format!(
                    "object {} is not at its recorded position in candle {}",
                    object.key(),
                    lease.id()
                )))
            }
        }
    }

    async fn store(&self, object: &ManagedObject) -> Result<()> {
        let bytes = object.serialize_payload().map_err(|e| {
            warn!("Failed to serialize {}: {}", object.key(), e);
            e
        })?;
        self.persistence.store(object.key(), bytes).await.map_err(|e| {
            warn!("Failed to store {}: {}", object.key(), e);
            e
        })?;
        self.persisted.insert(object.key());
        Ok(())
    }

    async fn load(&self, object: &ManagedObject) -> Result<crate::serialization::Payload> {
        let bytes = self.persistence.load(object.key()).await.map_err(|e| {
            warn!("Failed to load {}: {}", object.key(), e);
            e
        })?;
        object.adapter().deserialize(&bytes).map_err(|e| {
            warn!("Failed to deserialize {}: {}", object.key(), e);
            e
        })
    }

    pub(crate) fn record_access(&self, object: &ManagedObject) {
        let (count, waited) = object.touch();
        self.hot_time.record_access(object.flow_key(), count, waited);
    }
}
