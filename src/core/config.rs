use crate::core::{PlayerError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放器配置
///
/// 默认值就是播放器内置的同步策略常量，JSON 文件里只需写要覆盖的字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 每个 packet 队列的容量
    pub packet_queue_capacity: usize,
    /// 每个帧队列的容量
    pub frame_queue_capacity: usize,
    /// packet 队列降到容量的百分之多少以下时唤醒暂停的解封装线程
    pub resume_watermark_percent: u8,

    /// 软同步下限（秒）：sync_delay 不会小于它
    pub sync_threshold: f64,
    /// 硬同步阈值（秒）：视频落后音频超过它就丢帧
    pub nosync_threshold: f64,
    /// 实际等待时间下限（秒）
    pub min_present_delay: f64,
    /// 帧率未知时的帧间隔（秒）
    pub fallback_frame_delay: f64,

    /// 音频饥饿时填充的静音字节数
    pub silence_chunk_bytes: usize,
    /// 音频回调等待一帧的最长时间（毫秒）
    pub audio_pop_timeout_ms: u64,
    /// 音量 0.0 - 1.0
    pub volume: f32,

    /// 解封装线程背压等待的单次时长（毫秒）
    pub flow_wait_slice_ms: u64,

    pub window_title: String,
    pub window_size: [f32; 2],
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            packet_queue_capacity: 300,
            frame_queue_capacity: 30,
            resume_watermark_percent: 75,
            sync_threshold: 0.01,
            nosync_threshold: 1.0,
            min_present_delay: 0.010,
            fallback_frame_delay: 0.040,
            silence_chunk_bytes: 1024,
            audio_pop_timeout_ms: 5,
            volume: 1.0,
            flow_wait_slice_ms: 10,
            window_title: "流畅播放器".to_string(),
            window_size: [1280.0, 720.0],
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件加载配置并校验
    pub fn load(path: &Path) -> Result<Self> {
        info!("读取配置文件: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let config: PlayerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.packet_queue_capacity == 0 || self.frame_queue_capacity == 0 {
            return Err(PlayerError::ConfigError("队列容量必须大于 0".to_string()));
        }
        if self.resume_watermark_percent == 0 || self.resume_watermark_percent > 100 {
            return Err(PlayerError::ConfigError(format!(
                "resume_watermark_percent 必须在 1-100 之间: {}",
                self.resume_watermark_percent
            )));
        }
        let thresholds = [
            ("sync_threshold", self.sync_threshold),
            ("nosync_threshold", self.nosync_threshold),
            ("min_present_delay", self.min_present_delay),
            ("fallback_frame_delay", self.fallback_frame_delay),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || value <= 0.0 {
                return Err(PlayerError::ConfigError(format!("{} 必须为正数: {}", name, value)));
            }
        }
        if self.silence_chunk_bytes == 0 || self.silence_chunk_bytes % 4 != 0 {
            // S16 立体声一个采样帧 4 字节
            return Err(PlayerError::ConfigError(format!(
                "silence_chunk_bytes 必须是 4 的正整数倍: {}",
                self.silence_chunk_bytes
            )));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(PlayerError::ConfigError(format!("音量超出范围: {}", self.volume)));
        }
        Ok(())
    }

    /// packet 队列的恢复水位线（至少为 1）
    pub fn packet_resume_mark(&self) -> usize {
        let mark = self.packet_queue_capacity * self.resume_watermark_percent as usize / 100;
        mark.max(1)
    }

    pub fn audio_pop_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_pop_timeout_ms)
    }

    pub fn flow_wait_slice(&self) -> Duration {
        Duration::from_millis(self.flow_wait_slice_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_builtin_policy() {
        let config = PlayerConfig::default();
        assert_eq!(config.packet_queue_capacity, 300);
        assert_eq!(config.frame_queue_capacity, 30);
        assert_eq!(config.sync_threshold, 0.01);
        assert_eq!(config.nosync_threshold, 1.0);
        assert_eq!(config.silence_chunk_bytes, 1024);
        assert!(config.validate().is_ok());
        assert_eq!(config.packet_resume_mark(), 225);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{ "frame_queue_capacity": 8, "volume": 0.5 }}"#).unwrap();

        let config = PlayerConfig::load(&path).unwrap();
        assert_eq!(config.frame_queue_capacity, 8);
        assert_eq!(config.volume, 0.5);
        assert_eq!(config.packet_queue_capacity, 300);
    }

    #[test]
    fn rejects_invalid_values() {
        let config = PlayerConfig {
            frame_queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PlayerError::ConfigError(_))));

        let config = PlayerConfig {
            nosync_threshold: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PlayerConfig {
            silence_chunk_bytes: 1023,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(PlayerConfig::load(&path), Err(PlayerError::JsonError(_))));
    }

    #[test]
    fn small_capacity_still_has_a_resume_mark() {
        let config = PlayerConfig {
            packet_queue_capacity: 1,
            ..Default::default()
        };
        assert_eq!(config.packet_resume_mark(), 1);
    }
}
