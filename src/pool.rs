//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了蜡烛池：固定数量的蜡烛以借出/归还的方式被独占使用。
//!
//! 借出的蜡烛包装在 [`CandleLease`] 中，租约被丢弃时蜡烛自动归还，
//! 因此任何退出路径都不会把蜡烛遗留在借出状态。

use crate::candle::{Candle, CandleEntry, CandleId};
use crate::error::{CacheError, Result};
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::error;

/// 蜡烛池
///
/// 同一时刻最多有 `size` 个参与者在修改蜡烛，不需要每个蜡烛单独加锁
pub struct CandlePool<E> {
    slots: Mutex<Vec<Option<Candle<E>>>>,
    returned: Notify,
    size: usize,
}

impl<E: CandleEntry> CandlePool<E> {
    /// 创建蜡烛池
    ///
    /// # 参数
    ///
    /// * `size` - 蜡烛数量，最少为 1
    /// * `per_candle_capacity` - 每个蜡烛的预分配容量
    pub fn new(size: usize, per_candle_capacity: usize) -> Self {
        let size = size.max(1);
        let slots = (0..size)
            .map(|id| Some(Candle::new(id, per_candle_capacity)))
            .collect();
        Self {
            slots: Mutex::new(slots),
            returned: Notify::new(),
            size,
        }
    }

    /// 蜡烛总数
    pub fn size(&self) -> usize {
        self.size
    }

    /// 当前未被借出的蜡烛数量
    pub fn available(&self) -> usize {
        self.slots().iter().filter(|slot| slot.is_some()).count()
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Candle<E>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 尝试借出元素最少的空闲蜡烛
    pub fn try_checkout(&self) -> Option<CandleLease<'_, E>> {
        let mut slots = self.slots();
        let id = slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|candle| (id, candle.len())))
            .min_by_key(|(_, len)| *len)
            .map(|(id, _)| id)?;
        slots[id].take().map(|candle| CandleLease::new(self, candle))
    }

    /// 借出元素最少的空闲蜡烛，全部被借出时等待归还
    pub async fn checkout(&self) -> CandleLease<'_, E> {
        loop {
            let notified = self.returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_checkout() {
                return lease;
            }
            notified.await;
        }
    }

    /// 尝试借出指定编号的蜡烛
    ///
    /// 编号越界属于不变量破坏，返回 `InvariantViolation`
    pub fn try_checkout_id(&self, id: CandleId) -> Result<Option<CandleLease<'_, E>>> {
        let mut slots = self.slots();
        let slot = slots.get_mut(id).ok_or_else(|| {
            error!("candle {} does not exist in a pool of {}", id, self.size);
            CacheError::InvariantViolation(format!(
                "candle {} requested from a pool of {} candles",
                id, self.size
            ))
        })?;
        Ok(slot.take().map(|candle| CandleLease::new(self, candle)))
    }

    /// 借出指定编号的蜡烛，被他人借出时等待归还
    pub async fn checkout_id(&self, id: CandleId) -> Result<CandleLease<'_, E>> {
        loop {
            let notified = self.returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_checkout_id(id)? {
                return Ok(lease);
            }
            notified.await;
        }
    }

    /// 借出全部蜡烛
    ///
    /// 返回后池中不再有进行中的修改，用于关闭
    pub async fn drain(&self) -> Result<Vec<CandleLease<'_, E>>> {
        let mut leases = Vec::with_capacity(self.size);
        for id in 0..self.size {
            leases.push(self.checkout_id(id).await?);
        }
        Ok(leases)
    }

    fn checkin(&self, candle: Candle<E>) {
        let id = candle.id();
        let mut slots = self.slots();
        if let Some(slot) = slots.get_mut(id) {
            *slot = Some(candle);
        }
        drop(slots);
        self.returned.notify_waiters();
    }
}

/// 蜡烛租约
///
/// 持有期间独占蜡烛，丢弃时自动归还到池中
pub struct CandleLease<'a, E: CandleEntry> {
    pool: &'a CandlePool<E>,
    candle: Candle<E>,
}

impl<'a, E: CandleEntry> CandleLease<'a, E> {
    fn new(pool: &'a CandlePool<E>, candle: Candle<E>) -> Self {
        Self { pool, candle }
    }
}

impl<E: CandleEntry> Deref for CandleLease<'_, E> {
    type Target = Candle<E>;

    fn deref(&self) -> &Self::Target {
        &self.candle
    }
}

impl<E: CandleEntry> DerefMut for CandleLease<'_, E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candle
    }
}

impl<E: CandleEntry> Drop for CandleLease<'_, E> {
    fn drop(&mut self) {
        let id = self.candle.id();
        let candle = std::mem::replace(&mut self.candle, Candle::new(id, 0));
        self.pool.checkin(candle);
    }
}
