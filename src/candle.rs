//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了蜡烛：一个可按位置删除的二叉堆优先队列。
//!
//! 每个元素都记录自己在堆数组中的下标，堆内部每次交换都会同步更新，
//! 因此淘汰时可以在 O(log n) 内删除任意位置的元素，而不是线性查找。
//! 蜡烛本身没有同步机制，线程安全完全由蜡烛池的独占借用保证。

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// 蜡烛编号，即蜡烛在池中的位置
pub type CandleId = usize;

/// 可以放入蜡烛的元素
pub trait CandleEntry {
    /// 比较淘汰优先级，`self` 应比 `other` 先被淘汰时返回 `Ordering::Less`
    fn eviction_cmp(&self, other: &Self) -> Ordering;

    /// 记录元素在堆数组中的下标，`None` 表示不在任何蜡烛中
    fn set_candle_index(&self, index: Option<usize>);

    /// 元素记录的下标
    fn candle_index(&self) -> Option<usize>;
}

/// 蜡烛（可索引的优先队列）
///
/// 堆顶始终是最应被淘汰的元素
pub struct Candle<E> {
    id: CandleId,
    items: Vec<Arc<E>>,
}

impl<E> fmt::Debug for Candle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candle")
            .field("id", &self.id)
            .field("len", &self.items.len())
            .finish()
    }
}

impl<E: CandleEntry> Candle<E> {
    /// 创建空蜡烛
    ///
    /// # 参数
    ///
    /// * `id` - 蜡烛编号
    /// * `capacity` - 预分配的元素数量
    pub fn new(id: CandleId, capacity: usize) -> Self {
        Self {
            id,
            items: Vec::with_capacity(capacity),
        }
    }

    /// 蜡烛编号
    pub fn id(&self) -> CandleId {
        self.id
    }

    /// 元素数量
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 插入元素并返回其最终下标
    pub fn insert(&mut self, entry: Arc<E>) -> usize {
        let index = self.items.len();
        entry.set_candle_index(Some(index));
        self.items.push(entry);
        self.sift_up(index)
    }

    /// 查看最应被淘汰的元素
    pub fn peek_min(&self) -> Option<&Arc<E>> {
        self.items.first()
    }

    /// 按下标查看元素
    pub fn get(&self, index: usize) -> Option<&Arc<E>> {
        self.items.get(index)
    }

    /// 删除指定下标的元素
    ///
    /// 越界时返回 `None`。被删除元素的下标被重置为 `None`。
    pub fn remove_at(&mut self, index: usize) -> Option<Arc<E>> {
        if index >= self.items.len() {
            return None;
        }

        let last = self.items.len() - 1;
        if index != last {
            self.swap(index, last);
        }
        let removed = self.items.pop()?;
        removed.set_candle_index(None);

        if index < self.items.len() && self.sift_up(index) == index {
            self.sift_down(index);
        }
        Some(removed)
    }

    /// 删除数组末尾的元素，堆性质保持不变
    pub fn pop_back(&mut self) -> Option<Arc<E>> {
        let removed = self.items.pop()?;
        removed.set_candle_index(None);
        Some(removed)
    }

    /// 检查堆性质以及每个元素记录的下标是否与实际位置一致
    pub fn is_consistent(&self) -> bool {
        self.items.iter().enumerate().all(|(index, entry)| {
            let parent_ok =
                index == 0 || entry.eviction_cmp(&self.items[(index - 1) / 2]) != Ordering::Less;
            parent_ok && entry.candle_index() == Some(index)
        })
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.items.swap(a, b);
        self.items[a].set_candle_index(Some(a));
        self.items[b].set_candle_index(Some(b));
    }

    fn sift_up(&mut self, mut index: usize) -> usize {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.items[index].eviction_cmp(&self.items[parent]) == Ordering::Less {
                self.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
        index
    }

    fn sift_down(&mut self, mut index: usize) -> usize {
        let len = self.items.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len
                && self.items[right].eviction_cmp(&self.items[left]) == Ordering::Less
            {
                right
            } else {
                left
            };

            if self.items[child].eviction_cmp(&self.items[index]) == Ordering::Less {
                self.swap(index, child);
                index = child;
            } else {
                break;
            }
        }
        index
    }
}
