//! 音视频同步播放器
//!
//! 解封装 → 解码 → 呈现 的多线程流水线，音频时钟作为主时钟。
//! FFmpeg 负责解封装和解码，cpal 负责音频输出，egui/eframe 负责画面。

pub mod app;
pub mod core;
pub mod player;
pub mod renderer;
