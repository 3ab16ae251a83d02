use crate::core::{PlayerError, Result};
use crate::player::log_ctx;
use log::{error, info, warn};
use std::thread::{self, JoinHandle};

/// 流水线中一个阶段的线程句柄
///
/// 线程返回自己的统计信息；join 必须在请求退出（或阶段自然结束）之后调用
pub struct StageThread<T> {
    name: String,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> StageThread<T> {
    /// 启动一个具名线程
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|e| PlayerError::ThreadError(format!("无法启动 {} 线程: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
        })
    }
}

impl<T> StageThread<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 等待线程结束，线程 panic 时返回 None
    pub fn join(&mut self) -> Option<T> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(value) => {
                info!("{} ✅ {} 线程已结束", log_ctx(), self.name);
                Some(value)
            }
            Err(_) => {
                error!("{} ❌ {} 线程 panic", log_ctx(), self.name);
                None
            }
        }
    }

    pub fn is_joined(&self) -> bool {
        self.handle.is_none()
    }
}

impl<T> Drop for StageThread<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("{} ⚠ {} 线程句柄被 drop，但未调用 join()，正在等待线程退出", log_ctx(), self.name);
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_returns_thread_result_once() {
        let mut stage = StageThread::spawn("worker", || thread::current().name().map(str::to_string)).unwrap();
        assert_eq!(stage.name(), "worker");
        assert_eq!(stage.join(), Some(Some("worker".to_string())));
        assert!(stage.is_joined());
        assert_eq!(stage.join(), None);
    }

    #[test]
    fn panicking_stage_reports_none() {
        let mut stage = StageThread::spawn("broken", || -> u32 { panic!("boom") }).unwrap();
        assert_eq!(stage.join(), None);
    }
}
