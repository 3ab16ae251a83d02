use log::info;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 全局退出标志
///
/// 除了原子标志外还带一个条件变量，让呈现线程的睡眠可以被提前唤醒
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    quit: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                quit: AtomicBool::new(false),
                lock: Mutex::new(()),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn request(&self) {
        let _guard = self.inner.lock.lock();
        self.inner.quit.store(true, Ordering::SeqCst);
        self.inner.cond.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.quit.load(Ordering::SeqCst)
    }

    /// 最多等待 timeout；返回 true 表示已请求退出
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_requested() {
            if self.inner.cond.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_requested()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// 可以被中止的阻塞资源（队列、背压闸门）
pub trait Abortable: Send + Sync {
    fn abort(&self);
}

/// 统一的退出协调器：置位退出标志，然后中止所有登记的队列
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    targets: Mutex<Vec<Arc<dyn Abortable>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            signal: ShutdownSignal::new(),
            targets: Mutex::new(Vec::new()),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn register(&self, target: Arc<dyn Abortable>) {
        self.targets.lock().push(target);
    }

    /// 幂等：重复调用只会重复 abort（abort 本身也是幂等的）
    pub fn shutdown(&self) {
        if !self.signal.is_requested() {
            info!("🛑 请求退出，通知所有队列");
        }
        self.signal.request();
        for target in self.targets.lock().iter() {
            target.abort();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.signal.is_requested()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct CountingTarget(AtomicUsize);

    impl Abortable for CountingTarget {
        fn abort(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn coordinator_fans_out_to_every_target() {
        let coordinator = ShutdownCoordinator::new();
        let a = Arc::new(CountingTarget(AtomicUsize::new(0)));
        let b = Arc::new(CountingTarget(AtomicUsize::new(0)));
        coordinator.register(a.clone());
        coordinator.register(b.clone());

        coordinator.shutdown();

        assert!(coordinator.is_shutting_down());
        assert!(coordinator.signal().is_requested());
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_timeout_wakes_on_request() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.request();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_timeout_expires_without_request() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }
}
