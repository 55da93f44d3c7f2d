//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了托管对象的读/管理锁。
//!
//! 锁内部是一个有符号计数器：正数表示活跃读者数量，`MANAGE_HELD` 表示被管理侧独占。
//! 所有获取都返回守卫，守卫在任何退出路径（包括 `?` 提前返回与 panic 展开）上释放。

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// 独占持有的哨兵值
const MANAGE_HELD: i64 = -1;

/// 对象读/管理锁
///
/// 读者之间互不阻塞；管理锁（淘汰、重新加载）需要等待所有读者释放。
#[derive(Default)]
pub struct AccessLock {
    counter: Mutex<i64>,
    released: Notify,
}

impl fmt::Debug for AccessLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLock")
            .field("readers", &self.readers())
            .field("managed", &self.is_managed())
            .finish()
    }
}

impl AccessLock {
    /// 创建空闲的锁
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self) -> MutexGuard<'_, i64> {
        self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 获取读锁，仅在管理锁被持有时等待
    pub async fn read(&self) -> ReadGuard<'_> {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(guard) = self.try_read() {
                return guard;
            }
            notified.await;
        }
    }

    /// 尝试获取读锁，不等待
    pub fn try_read(&self) -> Option<ReadGuard<'_>> {
        let mut counter = self.counter();
        if *counter >= 0 {
            *counter += 1;
            Some(ReadGuard { lock: self })
        } else {
            None
        }
    }

    /// 获取管理锁，等待所有读者与其他管理者释放
    pub async fn manage(&self) -> ManageGuard<'_> {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(guard) = self.try_manage() {
                return guard;
            }
            notified.await;
        }
    }

    /// 尝试获取管理锁，不等待
    ///
    /// 淘汰扫描在持有蜡烛时只能使用此方法，避免与等待蜡烛的读者互相等待
    pub fn try_manage(&self) -> Option<ManageGuard<'_>> {
        let mut counter = self.counter();
        if *counter == 0 {
            *counter = MANAGE_HELD;
            Some(ManageGuard { lock: self })
        } else {
            None
        }
    }

    /// 没有读者也没有管理者
    pub fn is_free(&self) -> bool {
        *self.counter() == 0
    }

    /// 当前读者数量
    pub fn readers(&self) -> usize {
        (*self.counter()).max(0) as usize
    }

    /// 管理锁是否被持有
    pub fn is_managed(&self) -> bool {
        *self.counter() == MANAGE_HELD
    }

    fn release_read(&self) {
        let mut counter = self.counter();
        *counter -= 1;
        let free = *counter == 0;
        drop(counter);
        if free {
            self.released.notify_waiters();
        }
    }

    fn release_manage(&self) {
        *self.counter() = 0;
        self.released.notify_waiters();
    }
}

/// 读锁守卫
#[must_use = "dropping the guard releases the read slot immediately"]
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a AccessLock,
}

impl<'a> ReadGuard<'a> {
    /// 将读锁升级为管理锁
    ///
    /// 升级不是原子的：先释放读锁再等待管理锁，调用方在升级后必须重新检查对象状态
    pub async fn upgrade(self) -> ManageGuard<'a> {
        let lock = self.lock;
        drop(self);
        lock.manage().await
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// 管理锁守卫
#[must_use = "dropping the guard releases the manage lock immediately"]
#[derive(Debug)]
pub struct ManageGuard<'a> {
    lock: &'a AccessLock,
}

impl<'a> ManageGuard<'a> {
    /// 原子地将管理锁降级为读锁，期间没有其他管理者可以插入
    pub fn downgrade(self) -> ReadGuard<'a> {
        let lock = self.lock;
        std::mem::forget(self);
        *lock.counter() = 1;
        lock.released.notify_waiters();
        ReadGuard { lock }
    }
}

impl Drop for ManageGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_manage();
    }
}
