use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use myy_sync_player::app::{StartError, VideoPlayerApp};
use myy_sync_player::core::PlayerConfig;
use myy_sync_player::player::{Demuxer, PlaybackManager};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "myy_sync_player", version, about = "音视频同步播放器")]
struct Cli {
    /// 要播放的媒体文件（或 FFmpeg 支持的 URL）
    #[arg(value_name = "FILE")]
    file: String,

    /// JSON 配置文件，只需写要覆盖的字段
    #[arg(long, value_name = "JSON")]
    config: Option<PathBuf>,

    /// 只打印媒体信息（JSON），不播放
    #[arg(long)]
    info: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        // 过滤掉 wgpu_hal 和 wgpu_core 的警告日志，减少日志噪音
        .filter_module("wgpu_hal", log::LevelFilter::Error)
        .filter_module("wgpu_core", log::LevelFilter::Error)
        .parse_default_env()
        .init();

    info!("🎬 MYY Sync Player 启动");

    let config = match &cli.config {
        Some(path) => PlayerConfig::load(path).with_context(|| format!("无法加载配置 {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    // 初始化 FFmpeg
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;
    ffmpeg_next::format::network::init();
    info!("✅ FFmpeg 初始化成功");

    if cli.info {
        let demuxer = Demuxer::open(&cli.file).with_context(|| format!("无法打开 {}", cli.file))?;
        println!("{}", serde_json::to_string_pretty(demuxer.media_info())?);
        return Ok(());
    }

    let manager = PlaybackManager::open(&cli.file, config.clone()).with_context(|| format!("无法播放 {}", cli.file))?;

    let [width, height] = config.window_size;
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([width, height])
            .with_title(format!("{} - {}", config.window_title, cli.file)),
        renderer: eframe::Renderer::Wgpu,
        ..Default::default()
    };

    let start_error: StartError = Default::default();
    let app_error = start_error.clone();

    eframe::run_native(
        &config.window_title,
        options,
        Box::new(move |cc| Box::new(VideoPlayerApp::new(cc, manager, app_error))),
    )
    .map_err(|e| anyhow::anyhow!("应用启动失败: {}", e))?;

    if let Some(message) = start_error.lock().take() {
        anyhow::bail!("播放失败: {}", message);
    }

    info!("👋 播放器退出");
    Ok(())
}
