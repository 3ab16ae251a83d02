use crate::core::{DecodedFrame, Result};
use crate::player::decoder::{DecodeStatus, FrameDecoder};
use crate::player::demuxer_thread::PacketQueue;
use crate::player::log_ctx;
use crate::player::queue::{BoundedQueue, QueueItem};
use crate::player::stage::StageThread;
use log::{debug, info, warn};
use std::sync::Arc;

/// 帧队列类型
pub type FrameQueue<F> = BoundedQueue<DecodedFrame<F>>;

/// 解码统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodeStats {
    pub units: usize,
    pub frames: usize,
    pub errors: usize,
    /// 是否收到了 End（正常结束并 flush 过解码器）
    pub flushed: bool,
}

/// 把解码器里能取出的帧全部推入帧队列
///
/// 返回 false 表示帧队列已中止，调用方应当立即退出
fn drain_decoder<D: FrameDecoder>(
    decoder: &mut D,
    frames: &FrameQueue<D::Frame>,
    stats: &mut DecodeStats,
) -> bool {
    loop {
        match decoder.receive_frame() {
            Ok(DecodeStatus::Frame(frame)) => {
                debug!("{} 解码{}帧: pts={:?}", log_ctx(), decoder.kind().as_str(), frame.pts);
                if !frames.push(frame) {
                    return false;
                }
                stats.frames += 1;
            }
            Ok(DecodeStatus::NeedInput) | Ok(DecodeStatus::EndOfStream) => return true,
            Err(e) => {
                warn!("{} ⚠ {}", log_ctx(), e);
                stats.errors += 1;
                return true;
            }
        }
    }
}

/// 解码循环（在独立线程中运行）
///
/// 收到 End 时 flush 解码器并取出剩余帧；队列被中止时直接退出，不 flush。
/// 无论哪种情况，最后都给帧队列放入 End
pub fn run_decode<D: FrameDecoder>(
    decoder: &mut D,
    packets: &PacketQueue<D::Packet>,
    frames: &FrameQueue<D::Frame>,
) -> DecodeStats {
    let kind = decoder.kind().as_str();
    info!("{} 🎬 {}解码线程启动", log_ctx(), kind);

    let mut stats = DecodeStats::default();

    loop {
        match packets.pop() {
            Some(QueueItem::Data(unit)) => {
                stats.units += 1;
                if let Err(e) = decoder.send_packet(&unit.payload) {
                    // 坏包跳过，继续解码后面的
                    warn!("{} ⚠ {}（dts={:?}，已跳过）", log_ctx(), e, unit.dts);
                    stats.errors += 1;
                    continue;
                }
                drop(unit);
                if !drain_decoder(decoder, frames, &mut stats) {
                    break;
                }
            }
            Some(QueueItem::End) => {
                debug!("{} {}包队列结束，flush 解码器", log_ctx(), kind);
                stats.flushed = true;
                match decoder.send_eof() {
                    Ok(()) => {
                        drain_decoder(decoder, frames, &mut stats);
                    }
                    Err(e) => {
                        warn!("{} ⚠ {}解码器 flush 失败: {}", log_ctx(), kind, e);
                        stats.errors += 1;
                    }
                }
                break;
            }
            None => {
                debug!("{} {}包队列已中止", log_ctx(), kind);
                break;
            }
        }
    }

    frames.finish();

    info!(
        "{} 🛑 {}解码线程结束（{} 包，{} 帧，{} 错误）",
        log_ctx(),
        kind,
        stats.units,
        stats.frames,
        stats.errors
    );
    stats
}

/// 启动解码线程，解码器的所有权转移到线程中
pub fn spawn_decode<D>(
    name: &str,
    mut decoder: D,
    packets: Arc<PacketQueue<D::Packet>>,
    frames: Arc<FrameQueue<D::Frame>>,
) -> Result<StageThread<DecodeStats>>
where
    D: FrameDecoder + 'static,
{
    StageThread::spawn(name, move || run_decode(&mut decoder, &packets, &frames))
}
