use crate::core::{CompressedUnit, Result, StreamKind};

/// Demuxer 数据源抽象接口
///
/// 解封装线程只依赖这个 trait：FFmpeg 解封装器是一个实现，
/// 测试里用内存中的假数据源替代
pub trait DemuxerSource: Send {
    /// 压缩数据的具体类型（FFmpeg 下是 ffmpeg::Packet）
    type Packet: Send + 'static;

    /// 读取下一个压缩单元
    ///
    /// 返回：
    /// - Ok(Some(unit)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<Option<CompressedUnit<Self::Packet>>>;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 参与播放的流（视频必选，音频可选）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSelection {
    pub video: usize,
    pub audio: Option<usize>,
}

impl StreamSelection {
    pub fn new(video: usize, audio: Option<usize>) -> Self {
        Self { video, audio }
    }

    /// 按容器流索引判断包属于哪条流；其它流返回 None
    pub fn classify(&self, stream_index: usize) -> Option<StreamKind> {
        if stream_index == self.video {
            Some(StreamKind::Video)
        } else if Some(stream_index) == self.audio {
            Some(StreamKind::Audio)
        } else {
            None
        }
    }
}
