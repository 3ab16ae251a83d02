use serde::{Deserialize, Serialize};

/// 基本流类型（只有视频和音频参与播放）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "视频",
            StreamKind::Audio => "音频",
        }
    }
}

/// 压缩数据单元（一个未解码的 packet）
///
/// 所有权随队列 push/pop 转移，任何时刻只有一个持有者
#[derive(Debug)]
pub struct CompressedUnit<P> {
    pub payload: P,
    pub stream_index: usize, // 容器内的流索引
    pub dts: Option<i64>,    // 解码时间戳（流时间基单位）
}

impl<P> CompressedUnit<P> {
    pub fn new(payload: P, stream_index: usize, dts: Option<i64>) -> Self {
        Self {
            payload,
            stream_index,
            dts,
        }
    }
}

/// 解码后的帧
#[derive(Debug)]
pub struct DecodedFrame<F> {
    pub payload: F,
    pub pts: Option<i64>, // None 表示时间戳未知
    pub kind: StreamKind,
}

impl<F> DecodedFrame<F> {
    pub fn new(payload: F, pts: Option<i64>, kind: StreamKind) -> Self {
        Self { payload, pts, kind }
    }
}

/// 流的时间参数（用于把 PTS 换算成秒）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamTiming {
    pub time_base: f64,      // 每个时间戳刻度对应的秒数
    pub avg_frame_rate: f64, // 平均帧率，未知时为 0
}

impl StreamTiming {
    pub fn new(time_base: f64, avg_frame_rate: f64) -> Self {
        Self {
            time_base,
            avg_frame_rate,
        }
    }

    /// 把流时间戳换算为秒
    pub fn to_seconds(&self, ts: i64) -> f64 {
        ts as f64 * self.time_base
    }
}

/// 播放会话状态
///
/// Opened → Started → Running → Stopping → Closed，
/// 启动失败时直接 Opened → Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opened,
    Started,
    Running,
    Stopping,
    Closed,
}

/// 媒体信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: i64, // 总时长（毫秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            duration: 0,
            width: 0,
            height: 0,
            fps: 0.0,
            video_codec: String::new(),
            audio_codec: "none".to_string(),
            sample_rate: 0,
            channels: 0,
        }
    }
}
