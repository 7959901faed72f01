//! 延迟释放队列
//!
//! 应用程序释放了最后一个引用的资源，GPU 可能仍在使用。这类原生对象分两步回收：
//!
//! 1. 进入"陈旧"列表，标记为下一次提交的编号
//! 2. 该编号的提交完成入队后，移入释放列表，标记为该次提交对应的队列 Fence 值
//!
//! 队列 Fence 的完成值越过标记值后，对象才真正交给后端销毁。
//! 两个列表各有一把锁，`discard_stale` 按固定顺序同时持有两把锁。

use std::collections::VecDeque;

use parking_lot::Mutex;

/// 两阶段的延迟释放队列
#[derive(Debug)]
pub struct ReleaseQueue<T> {
    /// (下一次提交编号, 对象)
    stale: Mutex<VecDeque<(u64, T)>>,
    /// (队列 Fence 值, 对象)
    release: Mutex<VecDeque<(u64, T)>>,
}

impl<T> ReleaseQueue<T> {
    pub fn new() -> Self {
        Self {
            stale: Mutex::new(VecDeque::new()),
            release: Mutex::new(VecDeque::new()),
        }
    }

    /// 对象的最后一个引用已释放，但尚未提交的命令可能仍引用它
    pub fn safe_release(&self, object: T, next_submission: u64) {
        self.stale.lock().push_back((next_submission, object));
    }

    /// 编号不超过 `submitted` 的陈旧对象转入释放列表
    pub fn discard_stale(&self, submitted: u64, fence_value: u64) -> usize {
        let mut stale = self.stale.lock();
        let mut release = self.release.lock();
        let mut moved = 0;
        while stale.front().is_some_and(|(number, _)| *number <= submitted) {
            if let Some((_, object)) = stale.pop_front() {
                release.push_back((fence_value, object));
                moved += 1;
            }
        }
        moved
    }

    /// 取出 Fence 值不超过 `completed` 的对象，由调用方在锁外销毁
    pub fn purge(&self, completed: u64) -> Vec<T> {
        let mut release = self.release.lock();
        let mut purged = Vec::new();
        while release.front().is_some_and(|(value, _)| *value <= completed) {
            if let Some((_, object)) = release.pop_front() {
                purged.push(object);
            }
        }
        purged
    }

    /// 取出全部对象（调用方保证 GPU 已空闲）
    pub fn drain_all(&self) -> Vec<T> {
        let mut stale = self.stale.lock();
        let mut release = self.release.lock();
        release
            .drain(..)
            .chain(stale.drain(..))
            .map(|(_, object)| object)
            .collect()
    }

    pub fn stale_count(&self) -> usize {
        self.stale.lock().len()
    }

    pub fn pending_release_count(&self) -> usize {
        self.release.lock().len()
    }
}

impl<T> Default for ReleaseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_objects_wait_for_submission() {
        let queue = ReleaseQueue::new();
        queue.safe_release("a", 1);
        queue.safe_release("b", 2);
        assert_eq!(queue.stale_count(), 2);

        // 提交 1 完成入队，对应 Fence 值 10
        assert_eq!(queue.discard_stale(1, 10), 1);
        assert_eq!(queue.stale_count(), 1);
        assert_eq!(queue.pending_release_count(), 1);

        assert!(queue.purge(9).is_empty());
        assert_eq!(queue.purge(10), vec!["a"]);
        assert_eq!(queue.pending_release_count(), 0);
    }

    #[test]
    fn test_purge_preserves_order() {
        let queue = ReleaseQueue::new();
        queue.safe_release(1, 1);
        queue.safe_release(2, 1);
        queue.safe_release(3, 2);
        queue.discard_stale(1, 6);
        queue.discard_stale(2, 7);
        assert_eq!(queue.purge(6), vec![1, 2]);
        assert_eq!(queue.purge(100), vec![3]);
    }

    #[test]
    fn test_drain_all() {
        let queue = ReleaseQueue::new();
        queue.safe_release(2, 3);
        queue.safe_release(1, 4);
        assert_eq!(queue.discard_stale(3, 3), 1);
        let mut drained = queue.drain_all();
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(queue.stale_count(), 0);
        assert_eq!(queue.pending_release_count(), 0);
    }
}
