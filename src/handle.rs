//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了调用方持有的设置句柄与异步句柄。

use crate::error::Result;
use crate::lock::ReadGuard;
use crate::manager::AsyncMemManager;
use crate::object::{ManagedObject, ManagementState};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// 设置句柄
///
/// 设置阶段内直接访问负载。调用 [`SetupHandle::finish`] 后对象才会进入蜡烛；
/// 不调用就丢弃时对象永远停留在 `None` 状态，既不会被放置也不会被淘汰。
pub struct SetupHandle<T> {
    manager: AsyncMemManager,
    object: Arc<ManagedObject>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> SetupHandle<T> {
    pub(crate) fn new(manager: AsyncMemManager, object: Arc<ManagedObject>) -> Self {
        Self {
            manager,
            object,
            _payload: PhantomData,
        }
    }

    /// 对象键
    pub fn key(&self) -> Uuid {
        self.object.key()
    }

    /// 估算大小
    pub fn estimated_size(&self) -> u64 {
        self.object.estimated_size()
    }

    /// 当前生命周期状态
    pub fn state(&self) -> ManagementState {
        self.object.state()
    }

    /// 直接读取负载，不获取对象锁
    ///
    /// 只应在没有并发异步访问时使用
    pub fn value<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.object.with_payload(f)
    }

    /// 直接修改负载，不获取对象锁
    pub fn value_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.object.with_payload_mut(f)
    }

    /// 签发异步句柄
    pub fn as_async(&self) -> AsyncHandle<T> {
        AsyncHandle::issue(self.manager.clone(), self.object.clone())
    }

    /// 结束设置阶段，把对象放入蜡烛
    ///
    /// 放置后超出容量时会顺带扫描，扫描失败不影响返回值
    pub async fn finish(self) -> Result<()> {
        self.manager.inner().finish(&self.object).await?;
        self.manager.relieve_pressure().await;
        Ok(())
    }

    /// 放弃设置句柄而不完成设置
    pub fn dispose(self) {
        debug!(
            "Setup handle disposed without finishing: key={}",
            self.object.key()
        );
    }
}

/// 异步句柄
///
/// 每次操作只在调用期间持有对象的读锁，两次操作之间对象可能被淘汰，
/// 下一次操作会先从持久化后端重新加载。必须通过 [`AsyncHandle::dispose`] 释放。
pub struct AsyncHandle<T> {
    manager: AsyncMemManager,
    object: Arc<ManagedObject>,
    disposed: bool,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> AsyncHandle<T> {
    fn issue(manager: AsyncMemManager, object: Arc<ManagedObject>) -> Self {
        object.acquire_async();
        Self {
            manager,
            object,
            disposed: false,
            _payload: PhantomData,
        }
    }

    /// 对象键
    pub fn key(&self) -> Uuid {
        self.object.key()
    }

    /// 当前生命周期状态
    pub fn state(&self) -> ManagementState {
        self.object.state()
    }

    /// 负载当前是否在内存中
    pub fn is_loaded(&self) -> bool {
        self.object.has_payload()
    }

    /// 为同一对象再签发一个异步句柄
    pub fn share(&self) -> AsyncHandle<T> {
        Self::issue(self.manager.clone(), self.object.clone())
    }

    /// 读取负载并返回投影结果
    pub async fn supply<R>(&self, projection: impl FnOnce(&T) -> R) -> Result<R> {
        let result = {
            let _guard = self.access().await?;
            self.object.with_payload(projection)
        };
        self.manager.relieve_pressure().await;
        result
    }

    /// 修改负载
    ///
    /// 修改不改变对象的估算大小
    pub async fn apply(&self, action: impl FnOnce(&mut T)) -> Result<()> {
        let result = {
            let _guard = self.access().await?;
            self.object.with_payload_mut(action)
        };
        self.manager.relieve_pressure().await;
        result
    }

    /// 释放句柄
    ///
    /// 最后一个异步句柄在设置完成后释放时，对象被废弃并立即退休
    pub async fn dispose(mut self) -> Result<()> {
        self.disposed = true;
        if self.object.release_async() {
            self.manager.inner().retire(&self.object).await?;
        }
        self.manager.relieve_pressure().await;
        Ok(())
    }

    /// 获取读锁，负载被淘汰时先重新加载
    async fn access(&self) -> Result<ReadGuard<'_>> {
        let guard = self.object.lock().read().await;
        let guard = if self.object.has_payload() {
            guard
        } else {
            let manage = guard.upgrade().await;
            self.manager.inner().rematerialize(&self.object).await?;
            manage.downgrade()
        };
        self.manager.inner().record_access(&self.object);
        Ok(guard)
    }
}

impl<T> Drop for AsyncHandle<T> {
    fn drop(&mut self) {
        if !self.disposed {
            warn!(
                "Async handle for {} dropped without dispose, object will never be obsoleted",
                self.object.key()
            );
        }
    }
}
