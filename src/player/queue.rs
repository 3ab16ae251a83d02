//! 线程安全的有界队列
//!
//! packet 队列和帧队列都用它：容量有上限，push/pop 阻塞，
//! 支持 abort（退出信号）以及队列内的 End 哨兵（正常结束）。

use crate::core::Abortable;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 队列中的元素：数据或者结束哨兵
#[derive(Debug, PartialEq, Eq)]
pub enum QueueItem<T> {
    Data(T),
    /// 生产者正常结束，后面不会再有数据
    End,
}

/// 背压闸门
///
/// 解封装线程在 packet 队列满时在这里等待，
/// 队列被消费到恢复水位线以下或者被中止时唤醒它
pub struct FlowGate {
    lock: Mutex<()>,
    cond: Condvar,
}

impl FlowGate {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// blocked() 为 true 时一直等待
    ///
    /// blocked() 读取的是别的锁保护的状态，每次最多等 slice，
    /// 错过的唤醒最多延迟一个 slice
    pub fn wait_while<F: FnMut() -> bool>(&self, mut blocked: F, slice: Duration) {
        let mut guard = self.lock.lock();
        while blocked() {
            self.cond.wait_for(&mut guard, slice);
        }
    }
}

impl Default for FlowGate {
    fn default() -> Self {
        Self::new()
    }
}

impl Abortable for FlowGate {
    fn abort(&self) {
        self.notify();
    }
}

struct QueueInner<T> {
    items: VecDeque<QueueItem<T>>,
    aborted: bool,
}

/// 有界阻塞队列
pub struct BoundedQueue<T> {
    name: String,
    capacity: usize,
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    gate: Option<(Arc<FlowGate>, usize)>, // (闸门, 恢复水位线)
}

impl<T> BoundedQueue<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                aborted: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            gate: None,
        }
    }

    /// 绑定背压闸门：pop 后长度低于 resume_mark 时唤醒闸门
    pub fn with_flow_gate(mut self, gate: Arc<FlowGate>, resume_mark: usize) -> Self {
        self.gate = Some((gate, resume_mark.clamp(1, self.capacity)));
        self
    }

    /// 放入一个数据；队列已中止时丢弃并返回 false
    pub fn push(&self, item: T) -> bool {
        self.push_item(QueueItem::Data(item))
    }

    /// 放入结束哨兵
    pub fn finish(&self) -> bool {
        self.push_item(QueueItem::End)
    }

    fn push_item(&self, item: QueueItem<T>) -> bool {
        let mut inner = self.inner.lock();
        while inner.items.len() >= self.capacity && !inner.aborted {
            self.not_full.wait(&mut inner);
        }
        if inner.aborted {
            drop(inner);
            debug!("队列 {} 已中止，丢弃新元素", self.name);
            drop(item);
            return false;
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        true
    }

    /// 取出队首；队列已中止且为空时返回 None
    pub fn pop(&self) -> Option<QueueItem<T>> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                let len = inner.items.len();
                drop(inner);
                self.after_pop(len);
                return Some(item);
            }
            if inner.aborted {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// 和 pop 一样，但最多等待 timeout；超时或已中止且为空时返回 None
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueueItem<T>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                let len = inner.items.len();
                drop(inner);
                self.after_pop(len);
                return Some(item);
            }
            if inner.aborted {
                return None;
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() && inner.items.is_empty() {
                return None;
            }
        }
    }

    fn after_pop(&self, len: usize) {
        self.not_full.notify_one();
        // 此时已经释放了队列锁，避免和闸门锁形成反向加锁顺序
        if let Some((gate, resume_mark)) = &self.gate {
            if len < *resume_mark {
                gate.notify();
            }
        }
    }

    /// 中止：唤醒所有等待者，不释放已入队的元素
    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.aborted = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        if let Some((gate, _)) = &self.gate {
            gate.notify();
        }
    }

    /// 释放所有剩余元素，只在所有生产者/消费者都已停止后调用
    pub fn drain_and_free(&self) -> usize {
        let drained: Vec<QueueItem<T>> = self.inner.lock().items.drain(..).collect();
        let count = drained.len();
        drop(drained);
        if count > 0 {
            debug!("🗑️  清空队列 {}: {} 个元素", self.name, count);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// 长度是否仍不低于恢复水位线（未绑定闸门时等价于 is_full）
    pub fn above_resume_mark(&self) -> bool {
        match &self.gate {
            Some((_, resume_mark)) => self.len() >= *resume_mark,
            None => self.is_full(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Send> Abortable for BoundedQueue<T> {
    fn abort(&self) {
        BoundedQueue::abort(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// drop 时计数，用来检查元素是否被释放
    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn preserves_fifo_and_bound_under_load() {
        let queue = Arc::new(BoundedQueue::new("test", 4));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    assert!(queue.push(i));
                }
                queue.finish();
            })
        };

        let mut expected = 0u32;
        loop {
            assert!(queue.len() <= queue.capacity());
            match queue.pop() {
                Some(QueueItem::Data(value)) => {
                    assert_eq!(value, expected);
                    expected += 1;
                }
                Some(QueueItem::End) => break,
                None => panic!("queue closed unexpectedly"),
            }
        }
        producer.join().unwrap();
        assert_eq!(expected, 2_000);
    }

    #[test]
    fn sentinel_arrives_after_items_exactly_once() {
        let queue = BoundedQueue::new("test", 8);
        for i in 0..3 {
            queue.push(i);
        }
        queue.finish();

        assert_eq!(queue.pop(), Some(QueueItem::Data(0)));
        assert_eq!(queue.pop(), Some(QueueItem::Data(1)));
        assert_eq!(queue.pop(), Some(QueueItem::Data(2)));
        assert_eq!(queue.pop(), Some(QueueItem::End));
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn abort_drains_remaining_then_closes() {
        let queue = BoundedQueue::new("test", 8);
        queue.push(1);
        queue.push(2);
        queue.abort();
        queue.abort();

        assert_eq!(queue.pop(), Some(QueueItem::Data(1)));
        assert_eq!(queue.pop(), Some(QueueItem::Data(2)));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn abort_wakes_blocked_consumer() {
        let queue: Arc<BoundedQueue<u8>> = Arc::new(BoundedQueue::new("test", 2));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(30));
        queue.abort();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn abort_wakes_blocked_producer_and_discards_item() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(BoundedQueue::new("test", 1));
        assert!(queue.push(Tracked(dropped.clone())));

        let producer = {
            let queue = queue.clone();
            let dropped = dropped.clone();
            thread::spawn(move || queue.push(Tracked(dropped)))
        };
        thread::sleep(Duration::from_millis(30));
        queue.abort();

        assert!(!producer.join().unwrap());
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 1);
        assert!(!queue.push(Tracked(dropped.clone())));
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drain_and_free_releases_everything() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let queue = BoundedQueue::new("test", 8);
        for _ in 0..5 {
            queue.push(Tracked(dropped.clone()));
        }
        queue.finish();
        queue.abort();

        assert_eq!(queue.drain_and_free(), 6);
        assert_eq!(queue.len(), 0);
        assert_eq!(dropped.load(Ordering::SeqCst), 5);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn pop_timeout_gives_up_on_empty_queue() {
        let queue: BoundedQueue<u8> = BoundedQueue::new("test", 2);
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(!queue.is_aborted());
    }

    #[test]
    fn pop_below_resume_mark_wakes_gate() {
        let gate = Arc::new(FlowGate::new());
        let queue = Arc::new(BoundedQueue::new("packets", 4).with_flow_gate(gate.clone(), 2));
        for i in 0..4 {
            queue.push(i);
        }
        assert!(queue.is_full());
        assert!(queue.above_resume_mark());

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for _ in 0..3 {
                    thread::sleep(Duration::from_millis(10));
                    queue.pop();
                }
            })
        };

        // 等待时间片很长，只能靠 pop 唤醒
        let start = Instant::now();
        gate.wait_while(|| queue.above_resume_mark(), Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(queue.len() < 2);
        consumer.join().unwrap();
    }
}
