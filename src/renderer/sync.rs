//! GPU 同步机制模块
//!
//! Fence 是一个单调递增的 64 位计数器：
//!
//! - CPU 通过上下文把 `signal(value)` 写入命令流，GPU 执行到该点时计数器才会到达 `value`
//! - `completed_value()` 非阻塞，返回值永不减小
//! - `wait(value, timeout)` 阻塞调用线程，直到计数器到达 `value` 或超时
//!
//! `pending.fence_value <= fence.completed_value()` 即可证明该 signal 之前提交的
//! 所有 GPU 工作已经完成。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::error::{GraphicsError, Result};
use crate::renderer::object::{impl_device_object, InterfaceId, ObjectId};

/// GPU 写入、CPU 读取的计数器
///
/// 设备内部的队列计数器和用户可见的 `Fence` 共用这一实现。
#[derive(Debug)]
pub struct FenceCounter {
    /// 已完成的值（GPU 侧）
    completed: AtomicU64,
    lock: Mutex<()>,
    cond: Condvar,
}

impl FenceCounter {
    pub fn new(initial: u64) -> Self {
        Self {
            completed: AtomicU64::new(initial),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// 已完成的值
    pub fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// 由 GPU（后端）在执行到 signal 点时调用
    ///
    /// 较小的值不会让计数器回退。
    pub fn signal(&self, value: u64) {
        let _guard = self.lock.lock();
        self.completed.fetch_max(value, Ordering::AcqRel);
        self.cond.notify_all();
    }

    /// 检查特定值是否已完成
    pub fn is_completed(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// 阻塞等待，`timeout` 为 `None` 时无限等待
    ///
    /// 返回是否在期限内到达目标值。
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock.lock();
        while !self.is_completed(value) {
            match deadline {
                None => self.cond.wait(&mut guard),
                Some(deadline) => {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        return self.is_completed(value);
                    }
                }
            }
        }
        true
    }
}

impl Default for FenceCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Fence 描述
#[derive(Debug, Clone, Default)]
pub struct FenceDesc {
    pub name: String,
}

impl FenceDesc {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// 用户可见的 Fence 对象
#[derive(Debug)]
pub struct Fence {
    id: ObjectId,
    name: String,
    counter: Arc<FenceCounter>,
    /// 最近一次写入命令流的值，用于拒绝不递增的 signal
    last_enqueued: AtomicU64,
}

impl_device_object!(Fence, InterfaceId::Fence, [], |_f| None);

impl Fence {
    pub(crate) fn new(desc: &FenceDesc) -> Self {
        Self {
            id: ObjectId::next(),
            name: desc.name.clone(),
            counter: Arc::new(FenceCounter::new(0)),
            last_enqueued: AtomicU64::new(0),
        }
    }

    /// GPU 已完成的值
    pub fn completed_value(&self) -> u64 {
        self.counter.completed_value()
    }

    /// 最近一次写入命令流的值
    pub fn last_enqueued_value(&self) -> u64 {
        self.last_enqueued.load(Ordering::Acquire)
    }

    /// 阻塞等待 Fence 到达 `value`
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> Result<()> {
        if self.counter.wait(value, timeout) {
            Ok(())
        } else {
            Err(GraphicsError::Timeout(format!(
                "fence '{}' did not reach {} (completed {})",
                self.name,
                value,
                self.completed_value()
            ))
            .into())
        }
    }

    pub(crate) fn counter(&self) -> Arc<FenceCounter> {
        Arc::clone(&self.counter)
    }

    /// 记录一次入队的 signal，值必须严格递增
    pub(crate) fn enqueue_signal(&self, value: u64) -> bool {
        self.last_enqueued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| (value > last).then_some(value))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_monotonic() {
        let counter = FenceCounter::new(0);
        let mut observed = Vec::new();
        for value in [1, 3, 2, 5, 4, 5] {
            counter.signal(value);
            observed.push(counter.completed_value());
        }
        assert_eq!(observed, vec![1, 3, 3, 5, 5, 5]);
        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_wait_timeout() {
        let counter = FenceCounter::new(0);
        assert!(!counter.wait(1, Some(Duration::from_millis(10))));
        counter.signal(1);
        assert!(counter.wait(1, Some(Duration::from_millis(10))));
        assert!(counter.wait(0, None));
    }

    #[test]
    fn test_wait_is_woken_by_other_thread() {
        let counter = Arc::new(FenceCounter::new(0));
        let signaler = Arc::clone(&counter);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            signaler.signal(7);
        });
        assert!(counter.wait(7, Some(Duration::from_secs(5))));
        handle.join().unwrap();
    }

    #[test]
    fn test_fence_enqueue_must_increase() {
        let fence = Fence::new(&FenceDesc::default().with_name("frame fence"));
        assert!(fence.enqueue_signal(1));
        assert!(fence.enqueue_signal(2));
        assert!(!fence.enqueue_signal(2));
        assert!(!fence.enqueue_signal(1));
        assert_eq!(fence.last_enqueued_value(), 2);
    }

    #[test]
    fn test_fence_wait_reports_timeout() {
        let fence = Fence::new(&FenceDesc::default());
        let err = fence.wait(3, Some(Duration::from_millis(5))).unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::Timeout(_))));
        fence.counter().signal(3);
        assert!(fence.wait(3, None).is_ok());
    }
}
