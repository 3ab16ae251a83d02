use crate::core::ShutdownSignal;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 呈现循环使用的时间线（秒）
///
/// now() 和 frame_timer 在同一个时间原点上计算
pub trait Timeline: Send {
    fn now(&self) -> f64;

    /// 睡眠指定秒数，收到退出信号时提前返回
    fn sleep(&self, seconds: f64, shutdown: &ShutdownSignal);
}

/// 以播放开始时刻为原点的单调时钟
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeline {
    epoch: Instant,
}

impl SystemTimeline {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// 从原点到现在经过的秒数
    pub fn elapsed(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Timeline for SystemTimeline {
    fn now(&self) -> f64 {
        self.elapsed()
    }

    fn sleep(&self, seconds: f64, shutdown: &ShutdownSignal) {
        if seconds > 0.0 {
            shutdown.wait_timeout(Duration::from_secs_f64(seconds));
        }
    }
}

/// 音频时钟 - 音视频同步的唯一参考时间
///
/// 只有音频回调写入；视频呈现线程读取
pub struct AudioClock {
    inner: Mutex<AudioClockInner>,
    bytes_per_second: usize,
}

struct AudioClockInner {
    pts: f64,              // 最近一帧音频的时间戳（秒）
    unplayed_bytes: usize, // 已重采样但尚未送入设备的字节数
}

impl AudioClock {
    pub fn new(bytes_per_second: usize) -> Self {
        Self {
            inner: Mutex::new(AudioClockInner {
                pts: 0.0,
                unplayed_bytes: 0,
            }),
            bytes_per_second,
        }
    }

    /// 新的一帧音频进入缓冲区
    pub fn update(&self, pts: f64, unplayed_bytes: usize) {
        let mut inner = self.inner.lock();
        inner.pts = pts;
        inner.unplayed_bytes = unplayed_bytes;
    }

    /// 回调消耗了缓冲区中的数据
    pub fn set_unplayed(&self, unplayed_bytes: usize) {
        self.inner.lock().unplayed_bytes = unplayed_bytes;
    }

    /// 当前可听到的位置 = 最近一帧时间戳 - 缓冲中尚未播放的时长
    pub fn get(&self) -> f64 {
        let inner = self.inner.lock();
        let mut pts = inner.pts;
        if self.bytes_per_second > 0 {
            pts -= inner.unplayed_bytes as f64 / self.bytes_per_second as f64;
        }
        pts
    }
}

/// 主时钟：有音频流时跟随音频，否则跟随墙上时钟
#[derive(Clone)]
pub enum MasterClock {
    Audio(Arc<AudioClock>),
    Wall(SystemTimeline),
}

impl MasterClock {
    pub fn get_audio_clock(&self) -> f64 {
        match self {
            MasterClock::Audio(clock) => clock.get(),
            MasterClock::Wall(timeline) => timeline.elapsed(),
        }
    }

    pub fn has_audio(&self) -> bool {
        matches!(self, MasterClock::Audio(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn audio_clock_subtracts_unplayed_audio() {
        // 44100 Hz * 2 声道 * 2 字节
        let clock = AudioClock::new(176_400);
        clock.update(2.0, 17_640);
        assert!((clock.get() - 1.9).abs() < 1e-9);

        clock.set_unplayed(0);
        assert!((clock.get() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn zero_rate_clock_reports_raw_pts() {
        let clock = AudioClock::new(0);
        clock.update(3.5, 4096);
        assert_eq!(clock.get(), 3.5);
    }

    #[test]
    fn wall_clock_tracks_elapsed_time() {
        let clock = MasterClock::Wall(SystemTimeline::start());
        assert!(!clock.has_audio());

        let first = clock.get_audio_clock();
        thread::sleep(Duration::from_millis(20));
        let second = clock.get_audio_clock();
        thread::sleep(Duration::from_millis(20));
        let third = clock.get_audio_clock();

        assert!(first >= 0.0);
        assert!(second - first >= 0.015);
        assert!(third > second);
    }

    #[test]
    fn shared_clock_is_visible_across_threads() {
        let clock = Arc::new(AudioClock::new(176_400));
        let master = MasterClock::Audio(clock.clone());

        let writer = thread::spawn(move || clock.update(7.25, 0));
        writer.join().unwrap();

        assert!(master.has_audio());
        assert_eq!(master.get_audio_clock(), 7.25);
    }

    #[test]
    fn timeline_sleep_returns_early_on_shutdown() {
        let timeline = SystemTimeline::start();
        let shutdown = ShutdownSignal::new();
        shutdown.request();

        let before = Instant::now();
        timeline.sleep(5.0, &shutdown);
        assert!(before.elapsed() < Duration::from_secs(1));
    }
}
