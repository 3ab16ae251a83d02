use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("无法打开文件: {0}")]
    OpenError(String),

    #[error("无法读取流信息: {0}")]
    NoStreamInfo(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    #[error("不支持的{0}编解码器")]
    UnsupportedCodec(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("渲染错误: {0}")]
    RenderError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("配置无效: {0}")]
    ConfigError(String),

    #[error("线程错误: {0}")]
    ThreadError(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
