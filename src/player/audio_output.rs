use crate::core::{PlayerError, Result};
use crate::player::audio_feed::{AudioFeed, Resampler, OUTPUT_CHANNELS};
use crate::player::log_ctx;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// 设备不支持请求的采样率时依次尝试的采样率
const FALLBACK_RATES: [u32; 2] = [48_000, 44_100];

/// 音频输出 - 使用 cpal 播放 S16 立体声数据
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    volume: Arc<Mutex<f32>>,
}

impl AudioOutput {
    /// 打开默认输出设备，协商 (采样率, 立体声) 配置
    pub fn new(sample_rate: u32) -> Result<Self> {
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, OUTPUT_CHANNELS);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let supported: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
            .collect();

        let rate = negotiate_rate(sample_rate, &supported).ok_or_else(|| {
            PlayerError::AudioError(format!(
                "音频设备不支持任何立体声配置 (原请求: {} Hz)",
                sample_rate
            ))
        })?;
        if rate != sample_rate {
            warn!("⚠️  音频设备不支持 {} Hz 立体声，回退到 {} Hz", sample_rate, rate);
        }

        Ok(Self {
            device,
            config: StreamConfig {
                channels: OUTPUT_CHANNELS,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            },
            stream: None,
            volume: Arc::new(Mutex::new(1.0)),
        })
    }

    /// 实际使用的采样率（重采样目标）
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// 每秒字节数（S16 立体声）
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate() as usize * 2 * OUTPUT_CHANNELS as usize
    }

    /// 创建输出流，回调从 feed 拉取数据；流创建后处于暂停状态
    pub fn attach<F, R>(&mut self, mut feed: AudioFeed<F, R>) -> Result<()>
    where
        F: Send + 'static,
        R: Resampler<F> + 'static,
    {
        if self.stream.is_some() {
            return Err(PlayerError::AudioError("音频流已经创建".to_string()));
        }

        let volume = self.volume.clone();
        let mut scratch: Vec<u8> = Vec::new();

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len() * 2, 0);
                    feed.fill(&mut scratch);
                    let vol = *volume.lock();
                    s16_to_f32(&scratch, data, vol);
                },
                move |err| {
                    error!("{} 音频流错误: {}", log_ctx(), err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        // 有些后端创建后会自动播放，统一先暂停，等 play()
        if let Err(e) = stream.pause() {
            debug!("暂停新建音频流失败（忽略）: {}", e);
        }

        self.stream = Some(stream);
        Ok(())
    }

    /// 开始播放
    pub fn play(&self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| PlayerError::AudioError("音频流尚未创建".to_string()))?;
        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;
        info!("🔊 音频输出已启动");
        Ok(())
    }

    /// 暂停回调（退出流程中 join 之后调用）
    pub fn pause(&self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("暂停音频流失败: {}", e);
            }
        }
    }

    /// 停止并释放输出流
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已停止");
        }
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 检查配置是否兼容
fn is_config_compatible(rate: u32, channels: u16, supported: &SupportedStreamConfigRange) -> bool {
    let rate_in_range = rate >= supported.min_sample_rate().0 && rate <= supported.max_sample_rate().0;
    rate_in_range && channels == supported.channels()
}

/// 先试请求的采样率，再试标准采样率
fn negotiate_rate(requested: u32, supported: &[SupportedStreamConfigRange]) -> Option<u32> {
    std::iter::once(requested)
        .chain(FALLBACK_RATES)
        .find(|&rate| supported.iter().any(|s| is_config_compatible(rate, OUTPUT_CHANNELS, s)))
}

/// S16 小端字节 → f32 采样，同时乘以音量
fn s16_to_f32(bytes: &[u8], out: &mut [f32], volume: f32) {
    for (sample, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        let value = i16::from_le_bytes([chunk[0], chunk[1]]);
        *sample = value as f32 / 32768.0 * volume;
    }
}
