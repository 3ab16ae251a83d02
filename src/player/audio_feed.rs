use crate::core::{AudioClock, PlayerError, Result, ShutdownSignal};
use crate::player::decode_thread::FrameQueue;
use crate::player::log_ctx;
use crate::player::queue::QueueItem;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{software, util};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 输出格式：交错 S16 立体声，每个采样帧 4 字节
pub const OUTPUT_CHANNELS: u16 = 2;
pub const BYTES_PER_SAMPLE_FRAME: usize = 2 * OUTPUT_CHANNELS as usize;

/// 音频重采样：把一帧解码后的音频转换成 S16 立体声字节
pub trait Resampler<F>: Send {
    /// 结果写入 out（先清空）；重采样器内部缓冲时 out 可以为空
    fn resample(&mut self, frame: &F, out: &mut Vec<u8>) -> Result<()>;
}

/// FFmpeg 重采样器（swresample）
pub struct FfmpegResampler {
    context: Option<software::resampling::Context>,
    source: Option<(util::format::Sample, util::channel_layout::ChannelLayout, u32)>,
    target_rate: u32,
}

// SwrContext 本身不是 Send，但它只在音频回调线程中使用
unsafe impl Send for FfmpegResampler {}

impl FfmpegResampler {
    pub fn new(target_rate: u32) -> Self {
        Self {
            context: None,
            source: None,
            target_rate,
        }
    }
}

impl Resampler<util::frame::Audio> for FfmpegResampler {
    fn resample(&mut self, frame: &util::frame::Audio, out: &mut Vec<u8>) -> Result<()> {
        out.clear();

        let layout = if frame.channel_layout().is_empty() {
            util::channel_layout::ChannelLayout::default(frame.channels() as i32)
        } else {
            frame.channel_layout()
        };
        let source = (frame.format(), layout, frame.rate());

        // 输入格式变化时重建重采样器
        if self.source != Some(source) {
            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/S16/立体声",
                frame.rate(),
                frame.channels(),
                self.target_rate
            );
            let context = software::resampling::Context::get(
                frame.format(),
                layout,
                frame.rate(),
                util::format::Sample::I16(util::format::sample::Type::Packed),
                util::channel_layout::ChannelLayout::STEREO,
                self.target_rate,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建重采样器失败: {}", e)))?;
            self.context = Some(context);
            self.source = Some(source);
        }

        let context = match self.context.as_mut() {
            Some(context) => context,
            None => return Err(PlayerError::AudioError("重采样器未初始化".to_string())),
        };

        let mut resampled = util::frame::Audio::empty();
        context
            .run(frame, &mut resampled)
            .map_err(|e: ffmpeg::Error| PlayerError::AudioError(format!("重采样失败: {}", e)))?;

        let data = resampled.data(0);
        let bytes = (resampled.samples() * BYTES_PER_SAMPLE_FRAME).min(data.len());
        out.extend_from_slice(&data[..bytes]);
        Ok(())
    }
}

/// 音频供数回调的状态（被音频设备回调独占）
///
/// 每次回调请求一段 S16 字节：从音频帧队列取帧、重采样、拷贝，
/// 同时更新音频时钟。没有数据时用静音填充，永远不会长时间阻塞
pub struct AudioFeed<F, R> {
    frames: Arc<FrameQueue<F>>,
    resampler: R,
    clock: Arc<AudioClock>,
    shutdown: ShutdownSignal,
    time_base: f64,
    buf: Vec<u8>,
    pos: usize,
    silence_chunk: usize,
    pop_timeout: Duration,
    exhausted: bool,
    frames_played: usize,
    silence_chunks: usize,
}

impl<F, R> AudioFeed<F, R>
where
    F: Send + 'static,
    R: Resampler<F>,
{
    pub fn new(
        frames: Arc<FrameQueue<F>>,
        resampler: R,
        clock: Arc<AudioClock>,
        shutdown: ShutdownSignal,
        time_base: f64,
    ) -> Self {
        Self {
            frames,
            resampler,
            clock,
            shutdown,
            time_base,
            buf: Vec::new(),
            pos: 0,
            silence_chunk: 1024,
            pop_timeout: Duration::from_millis(5),
            exhausted: false,
            frames_played: 0,
            silence_chunks: 0,
        }
    }

    pub fn with_silence_chunk(mut self, bytes: usize) -> Self {
        self.silence_chunk = bytes.max(BYTES_PER_SAMPLE_FRAME);
        self
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// 填满一次设备请求
    ///
    /// 整个请求共用一个等待期限，队列饥饿时最多阻塞一个 pop_timeout
    pub fn fill(&mut self, out: &mut [u8]) {
        // 中途退出时剩下的部分保持静音
        out.fill(0);

        let deadline = Instant::now() + self.pop_timeout;
        let mut written = 0;
        while written < out.len() {
            if self.shutdown.is_requested() {
                break;
            }
            if self.pos >= self.buf.len() {
                self.refill(deadline);
            }

            let n = (self.buf.len() - self.pos).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            written += n;
            self.pos += n;
            self.clock.set_unplayed(self.buf.len() - self.pos);
        }
    }

    /// 重新装填缓冲区；取不到可播放的数据就装一段静音
    fn refill(&mut self, deadline: Instant) {
        self.pos = 0;

        while !self.exhausted {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.frames.pop_timeout(timeout) {
                Some(QueueItem::Data(frame)) => match self.resampler.resample(&frame.payload, &mut self.buf) {
                    Ok(()) if !self.buf.is_empty() => {
                        self.frames_played += 1;
                        match frame.pts {
                            Some(pts) => self.clock.update(pts as f64 * self.time_base, self.buf.len()),
                            None => self.clock.set_unplayed(self.buf.len()),
                        }
                        return;
                    }
                    // 重采样器还在攒数据，直接取下一帧
                    Ok(()) => debug!("{} 重采样器暂无输出", log_ctx()),
                    Err(e) => {
                        warn!("{} ⚠ {}，用静音代替", log_ctx(), e);
                        break;
                    }
                },
                Some(QueueItem::End) => {
                    info!("{} 🔇 音频播放完毕", log_ctx());
                    self.exhausted = true;
                }
                None if self.frames.is_aborted() => {
                    debug!("{} 音频帧队列已关闭", log_ctx());
                    self.exhausted = true;
                }
                None => {
                    debug!("{} 音频帧队列为空，填充静音", log_ctx());
                    break;
                }
            }
        }

        self.silence_chunks += 1;
        self.buf.clear();
        self.buf.resize(self.silence_chunk, 0);
    }

    pub fn frames_played(&self) -> usize {
        self.frames_played
    }

    pub fn silence_chunks(&self) -> usize {
        self.silence_chunks
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
