// 视频呈现：呈现线程转换画面，UI 线程上传纹理并绘制

pub mod egui_video_renderer;

pub use egui_video_renderer::{fit_rect, EguiPresenter, EguiVideoRenderer, FrameSlot, VideoImage};
