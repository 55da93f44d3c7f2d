//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了托管对象：负载、元数据、生命周期状态与读/管理锁。

use crate::candle::{CandleEntry, CandleId};
use crate::error::{CacheError, Result};
use crate::lock::AccessLock;
use crate::serialization::{Payload, SerializerAdapter};
use chrono::{DateTime, TimeZone, Utc};
use std::any::type_name;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{
    AtomicBool, AtomicI64, AtomicIsize, AtomicU32, AtomicUsize, Ordering as AtomicOrdering,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use uuid::Uuid;

const NOT_IN_CANDLE: isize = -1;

/// 管理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementState {
    /// 已创建但尚未放入蜡烛，或已被淘汰到持久化后端
    None,
    /// 已被某个管理动作认领，尚未落位
    Queued,
    /// 常驻于某个蜡烛中
    Managing,
    /// 设置完成且所有异步句柄已释放
    Obsoleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    state: ManagementState,
    candle: Option<CandleId>,
}

/// 托管对象
pub struct ManagedObject {
    key: Uuid,
    flow_key: String,
    seq: u64,
    estimated_size: u64,
    adapter: Arc<SerializerAdapter>,
    payload: RwLock<Option<Payload>>,
    start_time: Mutex<DateTime<Utc>>,
    hot_time_millis: AtomicI64,
    access_count: AtomicU32,
    async_count: AtomicUsize,
    done_setup: AtomicBool,
    obsolete_rank: AtomicBool,
    candle_index: AtomicIsize,
    placement: Mutex<Placement>,
    lock: AccessLock,
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject")
            .field("key", &self.key)
            .field("flow_key", &self.flow_key)
            .field("estimated_size", &self.estimated_size)
            .field("state", &self.state())
            .field("candle", &self.candle_id())
            .field("candle_index", &self.candle_index())
            .field("async_count", &self.async_count())
            .field("lock", &self.lock)
            .finish()
    }
}

impl ManagedObject {
    /// 创建处于 `None` 状态的托管对象
    ///
    /// # 参数
    ///
    /// * `flow_key` - 流键
    /// * `payload` - 负载
    /// * `estimated_size` - 估算大小，创建后不再改变
    /// * `adapter` - 负载的序列化适配器
    /// * `seq` - 管理器内的创建序号，淘汰优先级相同时先创建的先淘汰
    pub fn new(
        flow_key: impl Into<String>,
        payload: Payload,
        estimated_size: u64,
        adapter: Arc<SerializerAdapter>,
        seq: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: Uuid::new_v4(),
            flow_key: flow_key.into(),
            seq,
            estimated_size,
            adapter,
            payload: RwLock::new(Some(payload)),
            start_time: Mutex::new(now),
            hot_time_millis: AtomicI64::new(now.timestamp_millis()),
            access_count: AtomicU32::new(0),
            async_count: AtomicUsize::new(0),
            done_setup: AtomicBool::new(false),
            obsolete_rank: AtomicBool::new(false),
            candle_index: AtomicIsize::new(NOT_IN_CANDLE),
            placement: Mutex::new(Placement {
                state: ManagementState::None,
                candle: None,
            }),
            lock: AccessLock::new(),
        }
    }

    /// 唯一键，同时是持久化后端中的键
    pub fn key(&self) -> Uuid {
        self.key
    }

    /// 流键
    pub fn flow_key(&self) -> &str {
        &self.flow_key
    }

    /// 估算大小
    pub fn estimated_size(&self) -> u64 {
        self.estimated_size
    }

    /// 序列化适配器
    pub fn adapter(&self) -> &Arc<SerializerAdapter> {
        &self.adapter
    }

    /// 读/管理锁
    pub fn lock(&self) -> &AccessLock {
        &self.lock
    }

    /// 预测的下一次访问时间
    pub fn hot_time(&self) -> DateTime<Utc> {
        let millis = self.hot_time_millis.load(AtomicOrdering::Acquire);
        Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
    }

    /// 更新预测的下一次访问时间
    ///
    /// 只能在对象不在蜡烛中时调用，否则会破坏堆性质
    pub fn set_hot_time(&self, hot_time: DateTime<Utc>) {
        self.hot_time_millis
            .store(hot_time.timestamp_millis(), AtomicOrdering::Release);
    }

    /// 已访问次数
    pub fn access_count(&self) -> u32 {
        self.access_count.load(AtomicOrdering::Acquire)
    }

    /// 记录一次访问，返回访问前的次数以及距离上一次访问的时长
    pub fn touch(&self) -> (u32, Duration) {
        let now = Utc::now();
        let mut start = self.start_time.lock().unwrap_or_else(PoisonError::into_inner);
        let waited = (now - *start).to_std().unwrap_or_default();
        *start = now;
        drop(start);
        let count = self.access_count.fetch_add(1, AtomicOrdering::AcqRel);
        (count, waited)
    }

    /// 异步句柄引用计数
    pub fn async_count(&self) -> usize {
        self.async_count.load(AtomicOrdering::Acquire)
    }

    /// 增加异步引用计数
    pub fn acquire_async(&self) {
        self.async_count.fetch_add(1, AtomicOrdering::AcqRel);
    }

    /// 减少异步引用计数
    ///
    /// 返回 `true` 表示这次释放使对象变为废弃
    pub fn release_async(&self) -> bool {
        let previous = self
            .async_count
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |count| {
                count.checked_sub(1)
            })
            .unwrap_or(0);
        previous == 1 && self.is_done_setup()
    }

    /// 标记设置完成，只会从 false 变为 true
    pub fn mark_done_setup(&self) {
        self.done_setup.store(true, AtomicOrdering::Release);
    }

    /// 设置是否已完成
    pub fn is_done_setup(&self) -> bool {
        self.done_setup.load(AtomicOrdering::Acquire)
    }

    /// 是否已废弃：设置完成且没有异步句柄
    pub fn is_obsoleted(&self) -> bool {
        self.is_done_setup() && self.async_count() == 0
    }

    /// 把当前的废弃条件写入淘汰排序键
    ///
    /// 排序键只在对象不在蜡烛中、或持有其所在蜡烛的租约时写入。
    /// 常驻期间废弃条件的变化不影响堆中的位置，废弃的常驻对象由退休摘除。
    pub fn sync_eviction_rank(&self) {
        self.obsolete_rank
            .store(self.is_obsoleted(), AtomicOrdering::Release);
    }

    fn placement(&self) -> MutexGuard<'_, Placement> {
        self.placement.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 对外可见的生命周期状态
    ///
    /// 满足废弃条件时总是返回 `Obsoleted`，否则返回记录的落位状态
    pub fn state(&self) -> ManagementState {
        if self.is_obsoleted() {
            ManagementState::Obsoleted
        } else {
            self.placement().state
        }
    }

    /// 记录的落位状态，不考虑废弃条件
    pub fn placement_state(&self) -> ManagementState {
        self.placement().state
    }

    /// 所在蜡烛编号
    pub fn candle_id(&self) -> Option<CandleId> {
        self.placement().candle
    }

    /// 认领对象以执行管理动作
    ///
    /// 当前落位状态属于 `expected` 时将其置为 `Queued` 并返回之前的状态与蜡烛编号，
    /// 否则说明已有其他动作在进行，返回 `None`
    pub fn claim(
        &self,
        expected: &[ManagementState],
    ) -> Option<(ManagementState, Option<CandleId>)> {
        let mut placement = self.placement();
        if !expected.contains(&placement.state) {
            return None;
        }
        let previous = *placement;
        placement.state = ManagementState::Queued;
        Some((previous.state, previous.candle))
    }

    /// 结束管理动作，写入新的落位状态
    pub fn settle(&self, state: ManagementState, candle: Option<CandleId>) {
        *self.placement() = Placement { state, candle };
    }

    /// 淘汰扫描是否可以选择该对象：未被锁定、常驻、并且有有效下标
    pub fn is_peekable(&self) -> bool {
        self.lock.is_free()
            && self.placement_state() == ManagementState::Managing
            && self.candle_index().is_some()
    }

    /// 负载是否在内存中
    pub fn has_payload(&self) -> bool {
        self.payload
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// 以只读方式访问负载
    pub fn with_payload<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let guard = self.payload.read().unwrap_or_else(PoisonError::into_inner);
        let payload = guard.as_ref().ok_or_else(|| self.not_loaded())?;
        let typed = payload
            .downcast_ref::<T>()
            .ok_or_else(|| self.wrong_type::<T>())?;
        Ok(f(typed))
    }

    /// 以可变方式访问负载
    pub fn with_payload_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = self.payload.write().unwrap_or_else(PoisonError::into_inner);
        let payload = guard.as_mut().ok_or_else(|| self.not_loaded())?;
        let typed = payload
            .downcast_mut::<T>()
            .ok_or_else(|| self.wrong_type::<T>())?;
        Ok(f(typed))
    }

    /// 通过适配器序列化当前负载
    pub fn serialize_payload(&self) -> Result<Vec<u8>> {
        let guard = self.payload.read().unwrap_or_else(PoisonError::into_inner);
        let payload = guard.as_ref().ok_or_else(|| self.not_loaded())?;
        self.adapter.serialize(&**payload)
    }

    /// 放入负载（重新加载后）
    pub fn put_payload(&self, payload: Payload) {
        *self.payload.write().unwrap_or_else(PoisonError::into_inner) = Some(payload);
    }

    /// 移出负载（淘汰或废弃后）
    pub fn take_payload(&self) -> Option<Payload> {
        self.payload
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn not_loaded(&self) -> CacheError {
        CacheError::InvariantViolation(format!("payload of {} is not loaded", self.key))
    }

    fn wrong_type<T>(&self) -> CacheError {
        CacheError::TypeMismatch(format!(
            "object {} holds {}, not {}",
            self.key,
            self.adapter.payload_type(),
            type_name::<T>()
        ))
    }
}

impl CandleEntry for ManagedObject {
    fn eviction_cmp(&self, other: &Self) -> Ordering {
        let mine = self.obsolete_rank.load(AtomicOrdering::Acquire);
        let theirs = other.obsolete_rank.load(AtomicOrdering::Acquire);
        match (mine, theirs) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => {
                // 下一次访问越晚越先淘汰
                let mine = self.hot_time_millis.load(AtomicOrdering::Acquire);
                let theirs = other.hot_time_millis.load(AtomicOrdering::Acquire);
                theirs.cmp(&mine).then(self.seq.cmp(&other.seq))
            }
        }
    }

    fn set_candle_index(&self, index: Option<usize>) {
        let value = index.map_or(NOT_IN_CANDLE, |i| i as isize);
        self.candle_index.store(value, AtomicOrdering::Release);
    }

    fn candle_index(&self) -> Option<usize> {
        usize::try_from(self.candle_index.load(AtomicOrdering::Acquire)).ok()
    }
}
