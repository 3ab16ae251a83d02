//! 音视频同步
//!
//! `FrameScheduler` 是纯计算：给定一帧的时间戳、主时钟和当前时间，
//! 决定丢帧还是等多久再显示。`PresentLoop` 在呈现线程里驱动它。

use crate::core::{DecodedFrame, MasterClock, PlayerConfig, Result, ShutdownCoordinator, StreamTiming, Timeline};
use crate::player::decode_thread::FrameQueue;
use crate::player::log_ctx;
use crate::player::queue::QueueItem;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use std::sync::Arc;

/// 相邻两帧时间戳差超过它就认为时间戳不可信
const MAX_FRAME_DELAY: f64 = 1.0;

/// 同步策略阈值（秒）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncPolicy {
    pub sync_threshold: f64,
    pub nosync_threshold: f64,
    pub min_present_delay: f64,
    pub fallback_frame_delay: f64,
}

impl SyncPolicy {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            sync_threshold: config.sync_threshold,
            nosync_threshold: config.nosync_threshold,
            min_present_delay: config.min_present_delay,
            fallback_frame_delay: config.fallback_frame_delay,
        }
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::from_config(&PlayerConfig::default())
    }
}

/// 对一帧视频的处理决定
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameDecision {
    /// 视频落后音频太多，直接丢弃
    Drop { video_pts: f64, diff: f64 },
    /// 等待 delay 秒后显示
    Present { video_pts: f64, sync_delay: f64, delay: f64 },
}

/// 视频帧调度器（呈现线程独占）
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    policy: SyncPolicy,
    timing: StreamTiming,
    frame_timer: f64,
    frame_last_pts: f64,
    frame_last_delay: f64,
}

impl FrameScheduler {
    pub fn new(policy: SyncPolicy, timing: StreamTiming, now: f64) -> Self {
        Self {
            policy,
            timing,
            frame_timer: now,
            frame_last_pts: 0.0,
            frame_last_delay: policy.fallback_frame_delay,
        }
    }

    /// 时间戳未知时，按上一帧加上一帧间隔推算
    pub fn video_pts(&self, pts: Option<i64>) -> f64 {
        match pts {
            Some(ts) => self.timing.to_seconds(ts),
            None => self.frame_last_pts + self.frame_last_delay,
        }
    }

    fn nominal_frame_delay(&self) -> f64 {
        if self.timing.avg_frame_rate > 0.0 {
            1.0 / self.timing.avg_frame_rate
        } else {
            self.policy.fallback_frame_delay
        }
    }

    pub fn schedule(&mut self, pts: Option<i64>, master_clock: f64, now: f64) -> FrameDecision {
        let video_pts = self.video_pts(pts);

        let mut frame_delay = video_pts - self.frame_last_pts;
        if frame_delay <= 0.0 || frame_delay > MAX_FRAME_DELAY {
            frame_delay = self.nominal_frame_delay();
        }
        self.frame_last_delay = frame_delay;
        self.frame_last_pts = video_pts;

        let diff = video_pts - master_clock;
        if diff < -self.policy.nosync_threshold {
            return FrameDecision::Drop { video_pts, diff };
        }

        let sync_delay = (frame_delay + diff).max(self.policy.sync_threshold);
        self.frame_timer += sync_delay;
        let delay = (self.frame_timer - now).max(self.policy.min_present_delay);

        FrameDecision::Present {
            video_pts,
            sync_delay,
            delay,
        }
    }

    pub fn frame_timer(&self) -> f64 {
        self.frame_timer
    }

    pub fn frame_last_pts(&self) -> f64 {
        self.frame_last_pts
    }

    pub fn frame_last_delay(&self) -> f64 {
        self.frame_last_delay
    }
}

/// 视频呈现器（把解码后的帧交给显示层）
pub trait VideoPresenter<F>: Send {
    fn present(&mut self, frame: DecodedFrame<F>) -> Result<()>;
}

/// 会话事件（呈现线程 → UI 线程）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// 视频帧队列正常结束，播放完毕
    EndOfStream,
}

/// 呈现统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PresentStats {
    pub presented: usize,
    pub dropped: usize,
    pub errors: usize,
    pub reached_end: bool,
}

/// 呈现循环：取帧、同步、睡眠、显示
pub struct PresentLoop<F, P, T> {
    frames: Arc<FrameQueue<F>>,
    presenter: P,
    timeline: T,
    clock: MasterClock,
    coordinator: Arc<ShutdownCoordinator>,
    policy: SyncPolicy,
    timing: StreamTiming,
    events: Option<Sender<SessionEvent>>,
}

impl<F, P, T> PresentLoop<F, P, T>
where
    F: Send + 'static,
    P: VideoPresenter<F>,
    T: Timeline,
{
    pub fn new(
        frames: Arc<FrameQueue<F>>,
        presenter: P,
        timeline: T,
        clock: MasterClock,
        coordinator: Arc<ShutdownCoordinator>,
        policy: SyncPolicy,
        timing: StreamTiming,
    ) -> Self {
        Self {
            frames,
            presenter,
            timeline,
            clock,
            coordinator,
            policy,
            timing,
            events: None,
        }
    }

    /// 播放结束时通过这个通道通知 UI
    pub fn with_events(mut self, events: Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn run(mut self) -> PresentStats {
        info!(
            "{} 🖼️  呈现线程启动（主时钟: {}）",
            log_ctx(),
            if self.clock.has_audio() { "音频" } else { "系统时钟" }
        );

        let shutdown = self.coordinator.signal();
        let mut scheduler = FrameScheduler::new(self.policy, self.timing, self.timeline.now());
        let mut stats = PresentStats::default();

        loop {
            if shutdown.is_requested() {
                break;
            }

            let frame = match self.frames.pop() {
                Some(QueueItem::Data(frame)) => frame,
                Some(QueueItem::End) => {
                    info!("{} 🏁 视频播放完毕", log_ctx());
                    stats.reached_end = true;
                    self.coordinator.shutdown();
                    if let Some(events) = &self.events {
                        let _ = events.send(SessionEvent::EndOfStream);
                    }
                    break;
                }
                None => break,
            };

            let master = self.clock.get_audio_clock();
            match scheduler.schedule(frame.pts, master, self.timeline.now()) {
                FrameDecision::Drop { video_pts, diff } => {
                    stats.dropped += 1;
                    info!(
                        "{} ⏭️  丢帧: video_pts={:.3}s 落后主时钟 {:.3}s",
                        log_ctx(),
                        video_pts,
                        -diff
                    );
                }
                FrameDecision::Present { video_pts, delay, .. } => {
                    self.timeline.sleep(delay, &shutdown);
                    if shutdown.is_requested() {
                        break;
                    }
                    debug!("{} 🖼️  显示帧 pts={:.3}s，等待 {:.3}s", log_ctx(), video_pts, delay);
                    match self.presenter.present(frame) {
                        Ok(()) => stats.presented += 1,
                        Err(e) => {
                            warn!("{} ⚠ 显示失败: {}", log_ctx(), e);
                            stats.errors += 1;
                        }
                    }
                }
            }
        }

        info!(
            "{} 🛑 呈现线程结束（显示 {}，丢弃 {}，错误 {}）",
            log_ctx(),
            stats.presented,
            stats.dropped,
            stats.errors
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AudioClock, PlayerError, ShutdownSignal, StreamKind};
    use crate::player::queue::BoundedQueue;
    use parking_lot::Mutex;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// 毫秒时间基，帧率未知
    fn ms_timing(fps: f64) -> StreamTiming {
        StreamTiming::new(0.001, fps)
    }

    #[test]
    fn initial_state_matches_startup_values() {
        let scheduler = FrameScheduler::new(SyncPolicy::default(), ms_timing(0.0), 3.0);
        assert_eq!(scheduler.frame_timer(), 3.0);
        assert_eq!(scheduler.frame_last_pts(), 0.0);
        assert!(approx(scheduler.frame_last_delay(), 0.040));
    }

    #[test]
    fn frame_delay_follows_timestamps() {
        let mut scheduler = FrameScheduler::new(SyncPolicy::default(), ms_timing(0.0), 0.0);
        scheduler.schedule(Some(10_000), 10.0, 0.0);
        scheduler.schedule(Some(10_500), 10.5, 0.0);
        assert!(approx(scheduler.frame_last_delay(), 0.5));
        assert!(approx(scheduler.frame_last_pts(), 10.5));
    }

    #[test]
    fn backwards_timestamp_uses_frame_rate() {
        let mut scheduler = FrameScheduler::new(SyncPolicy::default(), ms_timing(25.0), 0.0);
        scheduler.schedule(Some(10_000), 10.0, 0.0);
        scheduler.schedule(Some(9_000), 9.0, 0.0);
        assert!(approx(scheduler.frame_last_delay(), 0.04));
    }

    #[test]
    fn huge_jump_without_frame_rate_uses_fallback() {
        let mut scheduler = FrameScheduler::new(SyncPolicy::default(), ms_timing(0.0), 0.0);
        scheduler.schedule(Some(5_000), 5.0, 0.0);
        assert!(approx(scheduler.frame_last_delay(), 0.040));
    }

    #[test]
    fn unknown_timestamp_is_extrapolated() {
        let mut scheduler = FrameScheduler::new(SyncPolicy::default(), ms_timing(0.0), 0.0);
        scheduler.schedule(Some(1_000), 1.0, 0.0);
        scheduler.schedule(Some(1_050), 1.05, 0.0);
        match scheduler.schedule(None, 1.1, 0.0) {
            FrameDecision::Present { video_pts, .. } => assert!(approx(video_pts, 1.1)),
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn far_behind_frame_is_dropped_without_moving_timer() {
        let mut scheduler = FrameScheduler::new(SyncPolicy::default(), ms_timing(25.0), 2.0);
        scheduler.schedule(Some(4_960), 4.96, 2.0);
        let timer = scheduler.frame_timer();

        match scheduler.schedule(Some(5_000), 6.5, 2.1) {
            FrameDecision::Drop { video_pts, diff } => {
                assert!(approx(video_pts, 5.0));
                assert!(approx(diff, -1.5));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
        assert_eq!(scheduler.frame_timer(), timer);
        // 丢帧也要更新 last_pts
        assert!(approx(scheduler.frame_last_pts(), 5.0));
    }

    #[test]
    fn sync_delay_has_a_floor() {
        let mut scheduler = FrameScheduler::new(SyncPolicy::default(), ms_timing(0.0), 0.0);
        scheduler.schedule(Some(1_000), 1.0, 0.0);
        let timer = scheduler.frame_timer();

        // frame_delay = 0.02, diff = -0.03
        match scheduler.schedule(Some(1_020), 1.05, 0.0) {
            FrameDecision::Present { sync_delay, .. } => assert!(approx(sync_delay, 0.01)),
            other => panic!("unexpected decision: {:?}", other),
        }
        assert!(approx(scheduler.frame_timer(), timer + 0.01));
    }

    #[test]
    fn late_timer_still_waits_minimum() {
        let mut scheduler = FrameScheduler::new(SyncPolicy::default(), ms_timing(25.0), 0.0);
        match scheduler.schedule(Some(40), 0.04, 100.0) {
            FrameDecision::Present { delay, .. } => assert!(approx(delay, 0.010)),
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn in_sync_stream_advances_one_frame_per_frame() {
        let mut scheduler = FrameScheduler::new(SyncPolicy::default(), ms_timing(25.0), 0.0);
        scheduler.schedule(Some(0), 0.0, 0.0);
        match scheduler.schedule(Some(40), 0.04, 0.0) {
            FrameDecision::Present { sync_delay, .. } => assert!(approx(sync_delay, 0.04)),
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    /// 手动推进的时间线：sleep 直接把时间往前拨
    #[derive(Clone)]
    struct ManualTimeline {
        now: Arc<Mutex<f64>>,
        sleeps: Arc<Mutex<Vec<f64>>>,
    }

    impl ManualTimeline {
        fn new() -> Self {
            Self {
                now: Arc::new(Mutex::new(0.0)),
                sleeps: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Timeline for ManualTimeline {
        fn now(&self) -> f64 {
            *self.now.lock()
        }

        fn sleep(&self, seconds: f64, _shutdown: &ShutdownSignal) {
            *self.now.lock() += seconds;
            self.sleeps.lock().push(seconds);
        }
    }

    /// 记录显示过的帧，载荷为 0 时返回错误
    #[derive(Clone, Default)]
    struct RecordingPresenter {
        shown: Arc<Mutex<Vec<u32>>>,
    }

    impl VideoPresenter<u32> for RecordingPresenter {
        fn present(&mut self, frame: DecodedFrame<u32>) -> Result<()> {
            if frame.payload == 0 {
                return Err(PlayerError::RenderError("lost surface".to_string()));
            }
            self.shown.lock().push(frame.payload);
            Ok(())
        }
    }

    fn frame(payload: u32, pts_ms: i64) -> DecodedFrame<u32> {
        DecodedFrame::new(payload, Some(pts_ms), StreamKind::Video)
    }

    fn present_loop(
        frames: &Arc<FrameQueue<u32>>,
        presenter: &RecordingPresenter,
        timeline: &ManualTimeline,
        clock: MasterClock,
        coordinator: &Arc<ShutdownCoordinator>,
    ) -> PresentLoop<u32, RecordingPresenter, ManualTimeline> {
        PresentLoop::new(
            frames.clone(),
            presenter.clone(),
            timeline.clone(),
            clock,
            coordinator.clone(),
            SyncPolicy::default(),
            ms_timing(25.0),
        )
    }

    #[test]
    fn presents_in_order_and_quits_at_end() {
        let frames = Arc::new(BoundedQueue::new("video_frames", 8));
        for i in 1..=3u32 {
            frames.push(frame(i, i as i64 * 40));
        }
        frames.finish();

        let audio = Arc::new(AudioClock::new(176_400));
        audio.update(0.04, 0);
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let presenter = RecordingPresenter::default();
        let timeline = ManualTimeline::new();
        let (tx, rx) = crossbeam_channel::unbounded();

        let stats = present_loop(&frames, &presenter, &timeline, MasterClock::Audio(audio), &coordinator)
            .with_events(tx)
            .run();

        assert_eq!(*presenter.shown.lock(), vec![1, 2, 3]);
        assert_eq!(stats.presented, 3);
        assert!(stats.reached_end);
        assert!(coordinator.is_shutting_down());
        assert_eq!(rx.try_recv(), Ok(SessionEvent::EndOfStream));
        assert_eq!(timeline.sleeps.lock().len(), 3);
    }

    #[test]
    fn frames_far_behind_audio_are_dropped() {
        let frames = Arc::new(BoundedQueue::new("video_frames", 8));
        frames.push(frame(1, 1_000));
        frames.push(frame(2, 1_040));
        frames.push(frame(3, 10_000));
        frames.finish();

        let audio = Arc::new(AudioClock::new(176_400));
        audio.update(9.96, 0);
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let presenter = RecordingPresenter::default();
        let timeline = ManualTimeline::new();

        let stats = present_loop(&frames, &presenter, &timeline, MasterClock::Audio(audio), &coordinator).run();

        assert_eq!(stats.dropped, 2);
        assert_eq!(*presenter.shown.lock(), vec![3]);
    }

    #[test]
    fn presenter_errors_do_not_stop_playback() {
        let frames = Arc::new(BoundedQueue::new("video_frames", 8));
        frames.push(frame(0, 0));
        frames.push(frame(5, 40));
        frames.finish();

        let audio = Arc::new(AudioClock::new(176_400));
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let presenter = RecordingPresenter::default();
        let timeline = ManualTimeline::new();

        let stats = present_loop(&frames, &presenter, &timeline, MasterClock::Audio(audio), &coordinator).run();

        assert_eq!(stats.errors, 1);
        assert_eq!(stats.presented, 1);
        assert_eq!(*presenter.shown.lock(), vec![5]);
    }

    #[test]
    fn abort_stops_without_presenting_leftovers() {
        let frames = Arc::new(BoundedQueue::new("video_frames", 8));
        frames.push(frame(1, 0));
        frames.push(frame(2, 40));

        let coordinator = Arc::new(ShutdownCoordinator::new());
        coordinator.register(frames.clone());
        coordinator.shutdown();

        let presenter = RecordingPresenter::default();
        let timeline = ManualTimeline::new();
        let clock = MasterClock::Audio(Arc::new(AudioClock::new(176_400)));

        let stats = present_loop(&frames, &presenter, &timeline, clock, &coordinator).run();

        assert!(!stats.reached_end);
        assert!(presenter.shown.lock().is_empty());
        assert_eq!(frames.drain_and_free(), 2);
    }
}
