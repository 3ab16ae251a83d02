use crate::core::{CompressedUnit, MediaInfo, PlayerError, Result, StreamTiming};
use crate::player::demuxer_source::{DemuxerSource, StreamSelection};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::{debug, info};

/// 解封装器 - 负责读取媒体文件并分离音视频流
pub struct Demuxer {
    input_ctx: format::context::Input,
    selection: StreamSelection,
    media_info: MediaInfo, // 缓存媒体信息
    source_path: String,   // 媒体源路径（用于描述）
}

impl Demuxer {
    /// 打开媒体文件（本地路径或 FFmpeg 支持的 URL）
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开文件: {}", path);

        let input_ctx = format::input(&path)
            .map_err(|e| PlayerError::OpenError(format!("{}: {}", path, e)))?;

        if input_ctx.nb_streams() == 0 {
            return Err(PlayerError::NoStreamInfo(path.to_string()));
        }

        // 查找视频流和音频流
        let video_stream_index = input_ctx
            .streams()
            .best(media::Type::Video)
            .map(|s| s.index())
            .ok_or(PlayerError::NoVideoStream)?;

        let audio_stream_index = input_ctx
            .streams()
            .best(media::Type::Audio)
            .map(|s| s.index());

        debug!("视频流索引: {}", video_stream_index);
        debug!("音频流索引: {:?}", audio_stream_index);

        let mut demuxer = Self {
            input_ctx,
            selection: StreamSelection::new(video_stream_index, audio_stream_index),
            media_info: MediaInfo::default(),
            source_path: path.to_string(),
        };

        demuxer.media_info = demuxer.extract_media_info()?;
        info!(
            "✅ 媒体信息: {}x{} @ {:.2}fps, 视频 {}, 音频 {}",
            demuxer.media_info.width,
            demuxer.media_info.height,
            demuxer.media_info.fps,
            demuxer.media_info.video_codec,
            demuxer.media_info.audio_codec
        );

        Ok(demuxer)
    }

    /// 提取媒体信息（内部使用）
    fn extract_media_info(&self) -> Result<MediaInfo> {
        let video_stream = self.video_stream()?;
        let video_params = video_stream.parameters();

        // 先获取编解码器名称（在参数被移动前）
        let video_codec_name = video_params.id().name().to_string();

        let video_decoder = ffmpeg::codec::context::Context::from_parameters(video_params)?
            .decoder()
            .video()
            .map_err(|_| PlayerError::UnsupportedCodec(format!("视频 ({})", video_codec_name)))?;

        let width = video_decoder.width();
        let height = video_decoder.height();
        let fps = rational_to_f64(video_stream.avg_frame_rate());

        let duration = self.input_ctx.duration().max(0) / 1000; // 微秒转毫秒

        let (audio_codec_name, sample_rate, channels) = match self.audio_stream()? {
            Some(audio_stream) => {
                let audio_params = audio_stream.parameters();
                let codec_name = audio_params.id().name().to_string();

                let audio_decoder = ffmpeg::codec::context::Context::from_parameters(audio_params)?
                    .decoder()
                    .audio()
                    .map_err(|_| PlayerError::UnsupportedCodec(format!("音频 ({})", codec_name)))?;

                (codec_name, audio_decoder.rate(), audio_decoder.channels())
            }
            None => ("none".to_string(), 0, 0),
        };

        Ok(MediaInfo {
            duration,
            width,
            height,
            fps,
            video_codec: video_codec_name,
            audio_codec: audio_codec_name,
            sample_rate,
            channels,
        })
    }

    pub fn selection(&self) -> StreamSelection {
        self.selection
    }

    /// 获取视频流
    pub fn video_stream(&self) -> Result<format::stream::Stream<'_>> {
        self.input_ctx
            .stream(self.selection.video)
            .ok_or(PlayerError::NoVideoStream)
    }

    /// 获取音频流（文件没有音频时为 None）
    pub fn audio_stream(&self) -> Result<Option<format::stream::Stream<'_>>> {
        match self.selection.audio {
            Some(idx) => self
                .input_ctx
                .stream(idx)
                .map(Some)
                .ok_or_else(|| PlayerError::NoStreamInfo(format!("音频流 {} 不存在", idx))),
            None => Ok(None),
        }
    }

    /// 视频流的时间基和平均帧率
    pub fn video_timing(&self) -> Result<StreamTiming> {
        let stream = self.video_stream()?;
        Ok(StreamTiming::new(
            rational_to_f64(stream.time_base()),
            rational_to_f64(stream.avg_frame_rate()),
        ))
    }

    /// 音频流的时间基
    pub fn audio_time_base(&self) -> Result<Option<f64>> {
        Ok(self.audio_stream()?.map(|s| rational_to_f64(s.time_base())))
    }

    /// 获取媒体信息
    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }
}

/// 分母为 0 的有理数（未知帧率等）按 0 处理
pub(crate) fn rational_to_f64(value: ffmpeg::Rational) -> f64 {
    if value.denominator() == 0 {
        0.0
    } else {
        value.numerator() as f64 / value.denominator() as f64
    }
}

// 实现 DemuxerSource trait
impl DemuxerSource for Demuxer {
    type Packet = ffmpeg::Packet;

    fn read_packet(&mut self) -> Result<Option<CompressedUnit<ffmpeg::Packet>>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => {
                let stream_index = packet.stream();
                let dts = packet.dts();
                Ok(Some(CompressedUnit::new(packet, stream_index, dts)))
            }
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
