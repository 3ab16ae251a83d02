//! 播放会话的生命周期
//!
//! Opened → Started → Running → Stopping → Closed。
//! 启动阶段所有可能失败的步骤都在 Opened 状态下完成，失败时回收资源后直接进入 Closed。
//! 收尾顺序固定：退出信号 → join 线程 → 暂停输出 → 清空队列 → 释放资源

use crate::core::{PlayerError, Result, SessionState, ShutdownCoordinator};
use crate::player::log_ctx;
use crate::player::stage::StageThread;
use log::{error, info};
use std::fmt::Debug;
use std::sync::Arc;

/// 会话收尾时按顺序处理的外部资源
pub trait SessionResources {
    /// 暂停输出设备，之后不会再有回调读取队列
    fn pause_output(&mut self);

    /// 释放队列里残留的包和帧，返回数量
    fn drain(&mut self) -> usize;

    /// 释放输出设备和未使用的资源
    fn release(&mut self);
}

/// 会话统一回收的线程
pub trait StageHandle {
    fn stage_name(&self) -> &str;

    /// 等待线程结束并记录统计
    fn finish(&mut self);
}

impl<T: Debug + Send + 'static> StageHandle for StageThread<T> {
    fn stage_name(&self) -> &str {
        self.name()
    }

    fn finish(&mut self) {
        if let Some(stats) = self.join() {
            info!("{} {} 统计: {:?}", log_ctx(), self.name(), stats);
        }
    }
}

/// 启动阶段创建的线程，按启动顺序回收
#[derive(Default)]
pub struct StageSet {
    stages: Vec<Box<dyn StageHandle>>,
}

impl StageSet {
    pub fn add<T: Debug + Send + 'static>(&mut self, stage: StageThread<T>) {
        self.stages.push(Box::new(stage));
    }

    fn len(&self) -> usize {
        self.stages.len()
    }

    fn finish_all(&mut self) {
        for stage in self.stages.iter_mut() {
            info!("{} 等待 {} 线程结束", log_ctx(), stage.stage_name());
            stage.finish();
        }
        self.stages.clear();
    }
}

/// 会话状态机
pub struct Session {
    state: SessionState,
    history: Vec<SessionState>,
    coordinator: Arc<ShutdownCoordinator>,
    stages: StageSet,
}

impl Session {
    pub fn new(coordinator: Arc<ShutdownCoordinator>) -> Self {
        Self {
            state: SessionState::Opened,
            history: vec![SessionState::Opened],
            coordinator,
            stages: StageSet::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 到目前为止经历过的所有状态
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    /// 启动会话
    ///
    /// setup 负责创建线程、连接并启动输出设备；它返回错误时
    /// 已经启动的线程会被回收，会话从 Opened 直接进入 Closed
    pub fn start<R, F>(&mut self, resources: &mut R, setup: F) -> Result<()>
    where
        R: SessionResources,
        F: FnOnce(&mut R, &mut StageSet) -> Result<()>,
    {
        if self.state != SessionState::Opened {
            return Err(PlayerError::ThreadError(format!(
                "会话状态 {:?} 下不能启动播放",
                self.state
            )));
        }

        let result = setup(resources, &mut self.stages);
        if let Err(e) = result {
            error!("{} ❌ 启动播放失败: {}", log_ctx(), e);
            self.teardown(resources);
            self.set_state(SessionState::Closed);
            return Err(e);
        }

        self.set_state(SessionState::Started);
        info!("{} 已启动 {} 个线程", log_ctx(), self.stages.len());
        self.set_state(SessionState::Running);
        Ok(())
    }

    /// 结束会话（幂等）；未启动的会话直接进入 Closed
    pub fn stop<R: SessionResources>(&mut self, resources: &mut R) {
        match self.state {
            SessionState::Closed => return,
            SessionState::Opened => {}
            _ => self.set_state(SessionState::Stopping),
        }
        self.teardown(resources);
        self.set_state(SessionState::Closed);
    }

    fn teardown<R: SessionResources>(&mut self, resources: &mut R) {
        // 1. 置退出标志并中止所有队列
        self.coordinator.shutdown();

        // 2. 等待线程结束
        self.stages.finish_all();

        // 3. 暂停输出，之后才能安全清空队列
        resources.pause_output();

        // 4. 清空队列
        let drained = resources.drain();
        if drained > 0 {
            info!("{} 🗑️  清空队列: {} 个元素", log_ctx(), drained);
        }

        // 5. 释放设备
        resources.release();
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!("{} 会话状态: {:?} → {:?}", log_ctx(), self.state, state);
        self.state = state;
        self.history.push(state);
        if state == SessionState::Closed {
            info!("{} 会话经历: {:?}", log_ctx(), self.history);
        }
    }
}
