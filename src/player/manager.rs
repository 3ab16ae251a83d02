use crate::core::{
    AudioClock, MasterClock, MediaInfo, PlayerConfig, PlayerError, Result, SessionState, ShutdownCoordinator,
    StreamTiming, SystemTimeline,
};
use crate::player::audio_feed::{AudioFeed, FfmpegResampler};
use crate::player::decode_thread::{spawn_decode, FrameQueue};
use crate::player::demuxer_source::StreamSelection;
use crate::player::demuxer_thread::{spawn_demux, DemuxOutputs, PacketQueue};
use crate::player::queue::{BoundedQueue, FlowGate};
use crate::player::session::{Session, SessionResources, StageSet};
use crate::player::stage::StageThread;
use crate::player::sync::{PresentLoop, SessionEvent, SyncPolicy, VideoPresenter};
use crate::player::{log_ctx, AudioDecoder, AudioOutput, Demuxer, VideoDecoder};
use crossbeam_channel::Sender;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::frame;
use log::{info, warn};
use std::sync::Arc;

/// open 阶段准备好、start 时移入各线程的资源
struct PendingPipeline {
    demuxer: Demuxer,
    selection: StreamSelection,
    video_decoder: VideoDecoder,
    audio: Option<PendingAudio>,
    timing: StreamTiming,
}

struct PendingAudio {
    decoder: AudioDecoder,
    time_base: f64,
}

/// 播放会话的所有队列
struct PipelineQueues {
    gate: Arc<FlowGate>,
    video_packets: Arc<PacketQueue<ffmpeg::Packet>>,
    audio_packets: Option<Arc<PacketQueue<ffmpeg::Packet>>>,
    video_frames: Arc<FrameQueue<frame::Video>>,
    audio_frames: Option<Arc<FrameQueue<frame::Audio>>>,
}

impl PipelineQueues {
    fn new(config: &PlayerConfig, with_audio: bool) -> Self {
        let gate = Arc::new(FlowGate::new());
        let mark = config.packet_resume_mark();
        let packet_queue = |name: &str| {
            Arc::new(BoundedQueue::new(name, config.packet_queue_capacity).with_flow_gate(gate.clone(), mark))
        };

        Self {
            video_packets: packet_queue("video_packets"),
            audio_packets: with_audio.then(|| packet_queue("audio_packets")),
            video_frames: Arc::new(BoundedQueue::new("video_frames", config.frame_queue_capacity)),
            audio_frames: with_audio.then(|| Arc::new(BoundedQueue::new("audio_frames", config.frame_queue_capacity))),
            gate,
        }
    }

    /// 所有队列和闸门都登记到退出协调器
    fn register(&self, coordinator: &ShutdownCoordinator) {
        coordinator.register(self.gate.clone());
        coordinator.register(self.video_packets.clone());
        coordinator.register(self.video_frames.clone());
        if let Some(queue) = &self.audio_packets {
            coordinator.register(queue.clone());
        }
        if let Some(queue) = &self.audio_frames {
            coordinator.register(queue.clone());
        }
    }

    fn demux_outputs(&self) -> DemuxOutputs<ffmpeg::Packet> {
        DemuxOutputs {
            video: self.video_packets.clone(),
            audio: self.audio_packets.clone(),
            gate: self.gate.clone(),
        }
    }

    /// 释放残留的包和帧，只能在所有线程都已结束后调用
    fn drain_all(&self) -> usize {
        let mut total = self.video_packets.drain_and_free() + self.video_frames.drain_and_free();
        if let Some(queue) = &self.audio_packets {
            total += queue.drain_and_free();
        }
        if let Some(queue) = &self.audio_frames {
            total += queue.drain_and_free();
        }
        total
    }
}

/// 会话持有的资源：队列、音频设备、尚未启动的解封装器和解码器
struct PipelineResources {
    queues: PipelineQueues,
    audio_output: Option<AudioOutput>,
    pending: Option<PendingPipeline>,
}

impl PipelineResources {
    /// 创建并启动所有线程，连接并启动音频设备
    fn launch<P>(
        &mut self,
        config: &PlayerConfig,
        coordinator: &Arc<ShutdownCoordinator>,
        presenter: P,
        events: Option<Sender<SessionEvent>>,
        stages: &mut StageSet,
    ) -> Result<()>
    where
        P: VideoPresenter<frame::Video> + 'static,
    {
        let PendingPipeline {
            demuxer,
            selection,
            video_decoder,
            audio,
            timing,
        } = self
            .pending
            .take()
            .ok_or_else(|| PlayerError::ThreadError("播放资源已被使用".to_string()))?;

        // frame_timer 和无音频时的主时钟共用同一个时间原点
        let timeline = SystemTimeline::start();
        let shutdown = coordinator.signal();

        let clock = match (audio, self.audio_output.as_mut(), self.queues.audio_packets.clone(), self.queues.audio_frames.clone()) {
            (Some(audio), Some(output), Some(packets), Some(frames)) => {
                let clock = Arc::new(AudioClock::new(output.bytes_per_second()));
                let feed = AudioFeed::new(
                    frames.clone(),
                    FfmpegResampler::new(output.sample_rate()),
                    clock.clone(),
                    shutdown.clone(),
                    audio.time_base,
                )
                .with_silence_chunk(config.silence_chunk_bytes)
                .with_pop_timeout(config.audio_pop_timeout());
                output.attach(feed)?;

                stages.add(spawn_decode("audio_decode", audio.decoder, packets, frames)?);
                MasterClock::Audio(clock)
            }
            _ => MasterClock::Wall(timeline),
        };

        stages.add(spawn_decode(
            "video_decode",
            video_decoder,
            self.queues.video_packets.clone(),
            self.queues.video_frames.clone(),
        )?);

        stages.add(spawn_demux(
            demuxer,
            selection,
            self.queues.demux_outputs(),
            shutdown,
            config.flow_wait_slice(),
        )?);

        let mut present_loop = PresentLoop::new(
            self.queues.video_frames.clone(),
            presenter,
            timeline,
            clock,
            coordinator.clone(),
            SyncPolicy::from_config(config),
            timing,
        );
        if let Some(events) = events {
            present_loop = present_loop.with_events(events);
        }
        stages.add(StageThread::spawn("present", move || present_loop.run())?);

        if let Some(output) = &self.audio_output {
            output.play()?;
        }
        Ok(())
    }
}

impl SessionResources for PipelineResources {
    fn pause_output(&mut self) {
        if let Some(output) = &self.audio_output {
            output.pause();
        }
    }

    fn drain(&mut self) -> usize {
        self.queues.drain_all()
    }

    fn release(&mut self) {
        if let Some(mut output) = self.audio_output.take() {
            info!("{} 🔊 停止音频输出", log_ctx());
            output.stop();
        }
        if self.pending.take().is_some() {
            warn!("{} ⚠ 会话未启动就被关闭", log_ctx());
        }
    }
}

/// 播放管理器 - 整体控制播放流程
///
/// open() 打开文件、创建解码器和音频设备；start() 启动解封装、解码、呈现线程；
/// stop() 按 请求退出 → join → 暂停音频 → 清空队列 → 释放设备 的顺序收尾
pub struct PlaybackManager {
    session: Session,
    config: PlayerConfig,
    media_info: MediaInfo,
    resources: PipelineResources,
}

impl PlaybackManager {
    /// 打开媒体文件
    ///
    /// 任何失败（文件无法打开、没有视频流、解码器不支持、音频设备不可用）都直接返回错误
    pub fn open(path: &str, config: PlayerConfig) -> Result<Self> {
        info!("{} 🎮 创建播放会话: {}", log_ctx(), path);
        config.validate()?;

        let demuxer = Demuxer::open(path)?;
        let selection = demuxer.selection();
        let media_info = demuxer.media_info().clone();
        let timing = demuxer.video_timing()?;

        let video_decoder = VideoDecoder::from_stream(&demuxer.video_stream()?)?;

        let (audio, audio_output) = match (demuxer.audio_stream()?, demuxer.audio_time_base()?) {
            (Some(stream), Some(time_base)) => {
                let decoder = AudioDecoder::from_stream(&stream)?;
                let output = AudioOutput::new(decoder.rate())?;
                output.set_volume(config.volume);
                (Some(PendingAudio { decoder, time_base }), Some(output))
            }
            _ => {
                info!("{} 🔇 文件没有音频流，使用系统时钟作为主时钟", log_ctx());
                (None, None)
            }
        };

        let queues = PipelineQueues::new(&config, audio.is_some());
        let coordinator = Arc::new(ShutdownCoordinator::new());
        queues.register(&coordinator);

        info!("{} ✅ 播放会话已打开", log_ctx());
        Ok(Self {
            session: Session::new(coordinator),
            config,
            media_info,
            resources: PipelineResources {
                queues,
                audio_output,
                pending: Some(PendingPipeline {
                    demuxer,
                    selection,
                    video_decoder,
                    audio,
                    timing,
                }),
            },
        })
    }

    /// 启动所有播放线程
    ///
    /// 启动失败时会先回收已经启动的线程，会话直接进入 Closed
    pub fn start<P>(&mut self, presenter: P, events: Option<Sender<SessionEvent>>) -> Result<()>
    where
        P: VideoPresenter<frame::Video> + 'static,
    {
        let coordinator = self.session.coordinator().clone();
        let config = &self.config;
        self.session.start(&mut self.resources, |resources, stages| {
            resources.launch(config, &coordinator, presenter, events, stages)
        })?;
        info!("{} ▶️  开始播放", log_ctx());
        Ok(())
    }

    /// 停止播放并释放所有资源（幂等）
    pub fn stop(&mut self) {
        if self.session.state() == SessionState::Closed {
            return;
        }
        info!("{} ⏹️  停止播放", log_ctx());
        self.session.stop(&mut self.resources);
        info!("{} ✅ 停止播放完成，所有线程已清理", log_ctx());
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    /// 是否已经请求退出（用户关闭或播放完毕）
    pub fn is_shutting_down(&self) -> bool {
        self.session.coordinator().is_shutting_down()
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.stop();
    }
}
