use crate::core::{DecodedFrame, PlayerError, Result, StreamKind};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, util};
use log::{debug, info};

/// 一次 receive_frame 的结果
#[derive(Debug)]
pub enum DecodeStatus<F> {
    Frame(DecodedFrame<F>),
    /// 解码器需要更多输入（EAGAIN）
    NeedInput,
    /// 解码器已完全排空
    EndOfStream,
}

/// 解码器抽象（send/receive 模型）
///
/// 解码线程只依赖这个 trait，测试里用假解码器替代 FFmpeg
pub trait FrameDecoder: Send {
    type Packet: Send + 'static;
    type Frame: Send + 'static;

    fn kind(&self) -> StreamKind;

    /// 提交一个压缩包
    fn send_packet(&mut self, packet: &Self::Packet) -> Result<()>;

    /// 提交 flush 信号，之后 receive_frame 会吐出缓冲的帧
    fn send_eof(&mut self) -> Result<()>;

    fn receive_frame(&mut self) -> Result<DecodeStatus<Self::Frame>>;
}

/// 打开解码器上下文，开启帧级多线程（线程数交给 FFmpeg 自动决定）
fn open_context(stream: &format::stream::Stream, kind: StreamKind) -> Result<codec::context::Context> {
    let params = stream.parameters();
    let codec_id = params.id();
    if codec::decoder::find(codec_id).is_none() {
        return Err(PlayerError::UnsupportedCodec(format!("{} ({})", kind.as_str(), codec_id.name())));
    }

    let mut context = codec::context::Context::from_parameters(params)?;
    context.set_threading(ffmpeg::threading::Config {
        kind: ffmpeg::threading::Type::Frame,
        count: 0,
    });
    Ok(context)
}

/// 把 FFmpeg 的 receive_frame 结果映射为 DecodeStatus
fn map_receive<F>(
    result: std::result::Result<(), ffmpeg::Error>,
    frame: F,
    pts: impl FnOnce(&F) -> Option<i64>,
    kind: StreamKind,
) -> Result<DecodeStatus<F>> {
    match result {
        Ok(()) => {
            let pts = pts(&frame);
            Ok(DecodeStatus::Frame(DecodedFrame::new(frame, pts, kind)))
        }
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(DecodeStatus::NeedInput),
        Err(ffmpeg::Error::Eof) => Ok(DecodeStatus::EndOfStream),
        Err(e) => Err(PlayerError::DecodeError(format!("{}解码失败: {}", kind.as_str(), e))),
    }
}

/// 视频解码器
pub struct VideoDecoder {
    decoder: codec::decoder::Video,
}

impl VideoDecoder {
    /// 从视频流创建解码器
    pub fn from_stream(stream: &format::stream::Stream) -> Result<Self> {
        info!("创建视频解码器...");
        let decoder = open_context(stream, StreamKind::Video)?
            .decoder()
            .video()
            .map_err(|e| PlayerError::UnsupportedCodec(format!("视频: {}", e)))?;

        debug!(
            "视频解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self { decoder })
    }
}

impl FrameDecoder for VideoDecoder {
    type Packet = ffmpeg::Packet;
    type Frame = util::frame::Video;

    fn kind(&self) -> StreamKind {
        StreamKind::Video
    }

    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        self.decoder
            .send_packet(packet)
            .map_err(|e| PlayerError::DecodeError(format!("提交视频包失败: {}", e)))
    }

    fn send_eof(&mut self) -> Result<()> {
        self.decoder.send_eof()?;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus<util::frame::Video>> {
        let mut decoded = util::frame::Video::empty();
        let result = self.decoder.receive_frame(&mut decoded);
        map_receive(result, decoded, |f| f.timestamp(), StreamKind::Video)
    }
}

/// 音频解码器
pub struct AudioDecoder {
    decoder: codec::decoder::Audio,
}

impl AudioDecoder {
    /// 从音频流创建解码器
    pub fn from_stream(stream: &format::stream::Stream) -> Result<Self> {
        info!("创建音频解码器...");
        let decoder = open_context(stream, StreamKind::Audio)?
            .decoder()
            .audio()
            .map_err(|e| PlayerError::UnsupportedCodec(format!("音频: {}", e)))?;

        debug!(
            "音频解码器: {} Hz, {} 声道, 格式: {:?}",
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );

        Ok(Self { decoder })
    }

    pub fn rate(&self) -> u32 {
        self.decoder.rate()
    }
}

impl FrameDecoder for AudioDecoder {
    type Packet = ffmpeg::Packet;
    type Frame = util::frame::Audio;

    fn kind(&self) -> StreamKind {
        StreamKind::Audio
    }

    fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        self.decoder
            .send_packet(packet)
            .map_err(|e| PlayerError::DecodeError(format!("提交音频包失败: {}", e)))
    }

    fn send_eof(&mut self) -> Result<()> {
        self.decoder.send_eof()?;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodeStatus<util::frame::Audio>> {
        let mut decoded = util::frame::Audio::empty();
        let result = self.decoder.receive_frame(&mut decoded);
        map_receive(result, decoded, |f| f.timestamp(), StreamKind::Audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_results_map_to_status() {
        let status = map_receive(Ok(()), 7u8, |_| Some(42), StreamKind::Video).unwrap();
        match status {
            DecodeStatus::Frame(frame) => {
                assert_eq!(frame.payload, 7);
                assert_eq!(frame.pts, Some(42));
                assert_eq!(frame.kind, StreamKind::Video);
            }
            other => panic!("unexpected status: {:?}", other),
        }

        let again = ffmpeg::Error::Other {
            errno: ffmpeg::error::EAGAIN,
        };
        assert!(matches!(
            map_receive(Err(again), 0u8, |_| None, StreamKind::Audio).unwrap(),
            DecodeStatus::NeedInput
        ));
        assert!(matches!(
            map_receive(Err(ffmpeg::Error::Eof), 0u8, |_| None, StreamKind::Audio).unwrap(),
            DecodeStatus::EndOfStream
        ));
        assert!(matches!(
            map_receive(Err(ffmpeg::Error::InvalidData), 0u8, |_| None, StreamKind::Audio),
            Err(PlayerError::DecodeError(_))
        ));
    }
}
