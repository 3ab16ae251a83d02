use crate::core::{CompressedUnit, Result, ShutdownSignal, StreamKind};
use crate::player::demuxer_source::{DemuxerSource, StreamSelection};
use crate::player::log_ctx;
use crate::player::queue::{BoundedQueue, FlowGate};
use crate::player::stage::StageThread;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// packet 队列类型
pub type PacketQueue<P> = BoundedQueue<CompressedUnit<P>>;

// 每条流前几个包和之后每 100 个包打一次日志
const LOG_FIRST_N: usize = 5;
const LOG_EVERY_N: usize = 100;

/// 解封装线程的输出端：每条流一个 packet 队列，外加背压闸门
pub struct DemuxOutputs<P> {
    pub video: Arc<PacketQueue<P>>,
    pub audio: Option<Arc<PacketQueue<P>>>,
    pub gate: Arc<FlowGate>,
}

impl<P> Clone for DemuxOutputs<P> {
    fn clone(&self) -> Self {
        Self {
            video: self.video.clone(),
            audio: self.audio.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl<P> DemuxOutputs<P> {
    fn queues(&self) -> impl Iterator<Item = &Arc<PacketQueue<P>>> {
        std::iter::once(&self.video).chain(self.audio.iter())
    }

    fn queue_for(&self, kind: StreamKind) -> Option<&Arc<PacketQueue<P>>> {
        match kind {
            StreamKind::Video => Some(&self.video),
            StreamKind::Audio => self.audio.as_ref(),
        }
    }

    fn any_full(&self) -> bool {
        self.queues().any(|q| q.is_full())
    }

    fn full_queues(&self) -> Vec<&Arc<PacketQueue<P>>> {
        self.queues().filter(|q| q.is_full()).collect()
    }

    fn any_aborted(&self) -> bool {
        self.queues().any(|q| q.is_aborted())
    }

    /// 在所有 packet 队列尾部放入结束哨兵
    fn finish_all(&self) {
        for queue in self.queues() {
            if !queue.finish() {
                debug!("{} 队列 {} 已中止，结束哨兵被丢弃", log_ctx(), queue.name());
            }
        }
    }
}

/// 解封装统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemuxStats {
    pub units_read: usize,
    pub video_units: usize,
    pub audio_units: usize,
    pub discarded: usize,
    pub read_error: bool,
}

/// 解封装循环（在独立线程中运行）
///
/// 数据源读完、读取出错或请求退出时结束，退出前一定给每个 packet 队列放入 End
pub fn run_demux<S: DemuxerSource>(
    source: &mut S,
    selection: StreamSelection,
    outputs: &DemuxOutputs<S::Packet>,
    shutdown: &ShutdownSignal,
    wait_slice: Duration,
) -> DemuxStats {
    info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), source.description());

    let mut stats = DemuxStats::default();

    loop {
        if shutdown.is_requested() {
            info!("{} ⏹ Demuxer 线程收到退出信号", log_ctx());
            break;
        }

        // 背压：有队列满了就暂停，直到满的队列之一降到水位线以下
        if outputs.any_full() {
            let full = outputs.full_queues();
            debug!("{} ⏸ packet 队列已满，暂停读取", log_ctx());
            outputs.gate.wait_while(
                || !shutdown.is_requested() && !outputs.any_aborted() && full.iter().all(|q| q.above_resume_mark()),
                wait_slice,
            );
            continue;
        }

        let unit = match source.read_packet() {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                info!("{} 📄 Demuxer 到达文件末尾", log_ctx());
                break;
            }
            Err(e) => {
                error!("{} ❌ 读取包失败: {}", log_ctx(), e);
                stats.read_error = true;
                break;
            }
        };
        stats.units_read += 1;

        let kind = match selection.classify(unit.stream_index) {
            Some(kind) => kind,
            None => {
                // 未选中的流直接释放
                stats.discarded += 1;
                continue;
            }
        };

        let queue = match outputs.queue_for(kind) {
            Some(queue) => queue,
            None => {
                stats.discarded += 1;
                continue;
            }
        };

        let count = match kind {
            StreamKind::Video => {
                stats.video_units += 1;
                stats.video_units
            }
            StreamKind::Audio => {
                stats.audio_units += 1;
                stats.audio_units
            }
        };
        if count <= LOG_FIRST_N || count % LOG_EVERY_N == 0 {
            info!(
                "{} 📦 Demuxer 读取{}包 #{}（total packets {}）",
                log_ctx(),
                kind.as_str(),
                count,
                stats.units_read
            );
        }

        if !queue.push(unit) {
            warn!("{} ⚠ {} 队列已中止，停止解封装", log_ctx(), queue.name());
            break;
        }
    }

    outputs.finish_all();

    info!(
        "{} 🛑 Demuxer 线程退出（共读取 {} 个包：{} 视频，{} 音频，{} 丢弃）",
        log_ctx(),
        stats.units_read,
        stats.video_units,
        stats.audio_units,
        stats.discarded
    );
    stats
}

/// 启动 Demuxer 线程，数据源的所有权转移到线程中
pub fn spawn_demux<S>(
    mut source: S,
    selection: StreamSelection,
    outputs: DemuxOutputs<S::Packet>,
    shutdown: ShutdownSignal,
    wait_slice: Duration,
) -> Result<StageThread<DemuxStats>>
where
    S: DemuxerSource + 'static,
{
    StageThread::spawn("demux", move || {
        run_demux(&mut source, selection, &outputs, &shutdown, wait_slice)
    })
}
