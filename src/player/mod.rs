// 播放器核心模块

pub mod audio_feed;
pub mod audio_output;
pub mod decode_thread;
pub mod decoder;
pub mod demuxer;
pub mod demuxer_source; // Demuxer 抽象接口
pub mod demuxer_thread; // 解封装线程
pub mod manager;
pub mod queue;
pub mod session;
pub mod stage;
pub mod sync;

pub use audio_feed::{AudioFeed, FfmpegResampler, Resampler};
pub use audio_output::AudioOutput;
pub use decode_thread::{run_decode, spawn_decode, DecodeStats, FrameQueue};
pub use decoder::{AudioDecoder, DecodeStatus, FrameDecoder, VideoDecoder};
pub use demuxer::Demuxer;
pub use demuxer_source::{DemuxerSource, StreamSelection};
pub use demuxer_thread::{run_demux, spawn_demux, DemuxOutputs, DemuxStats, PacketQueue};
pub use manager::PlaybackManager;
pub use queue::{BoundedQueue, FlowGate, QueueItem};
pub use session::{Session, SessionResources, StageHandle, StageSet};
pub use stage::StageThread;
pub use sync::{FrameDecision, FrameScheduler, PresentLoop, PresentStats, SessionEvent, SyncPolicy, VideoPresenter};

use std::process;
use std::thread;

/// 日志前缀：[pid:.. tid:..]
pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
