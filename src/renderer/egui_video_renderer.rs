use crate::core::{DecodedFrame, PlayerError, Result};
use crate::player::VideoPresenter;
use egui::{ColorImage, Rect, TextureHandle, TextureOptions, Ui};
use ffmpeg_next::{software, util};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

/// 一帧已经转换成 RGBA 的画面
pub struct VideoImage {
    pub image: ColorImage,
    pub pts: Option<i64>,
}

/// 呈现线程和 UI 线程之间交接画面的槽位（只保留最新一帧）
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<VideoImage>>>,
}

impl FrameSlot {
    pub fn put(&self, image: VideoImage) {
        *self.inner.lock() = Some(image);
    }

    pub fn take(&self) -> Option<VideoImage> {
        self.inner.lock().take()
    }
}

/// 视频呈现器：在呈现线程把解码帧转换为 RGBA，放进槽位并通知 UI 重绘
pub struct EguiPresenter {
    ctx: egui::Context,
    slot: FrameSlot,
    scaler: Option<software::scaling::Context>,
    scaler_key: Option<(util::format::Pixel, u32, u32)>,
}

// SwsContext 本身不是 Send，但我们确保只在呈现线程中使用它
unsafe impl Send for EguiPresenter {}

impl EguiPresenter {
    pub fn new(ctx: egui::Context, slot: FrameSlot) -> Self {
        Self {
            ctx,
            slot,
            scaler: None,
            scaler_key: None,
        }
    }

    /// 转换帧格式为 RGBA
    fn convert_frame(&mut self, frame: &util::frame::Video) -> Result<ColorImage> {
        let width = frame.width();
        let height = frame.height();
        let key = (frame.format(), width, height);

        // 初始化 scaler（YUV -> RGBA），尺寸或格式变化时重建
        if self.scaler_key != Some(key) {
            info!("🆕 创建图像转换器: {:?} {}x{} → RGBA", frame.format(), width, height);
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
            self.scaler_key = Some(key);
        }

        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| PlayerError::RenderError("图像转换器未初始化".to_string()))?;

        let mut rgba_frame = util::frame::Video::empty();
        scaler.run(frame, &mut rgba_frame)?;

        let data = pack_rows(rgba_frame.data(0), rgba_frame.stride(0), width as usize, height as usize)?;
        Ok(ColorImage::from_rgba_unmultiplied([width as usize, height as usize], &data))
    }
}

impl VideoPresenter<util::frame::Video> for EguiPresenter {
    fn present(&mut self, frame: DecodedFrame<util::frame::Video>) -> Result<()> {
        let image = self.convert_frame(&frame.payload)?;
        self.slot.put(VideoImage { image, pts: frame.pts });
        self.ctx.request_repaint();
        Ok(())
    }
}

/// 去掉每行末尾的对齐填充，复制到连续内存
fn pack_rows(data: &[u8], stride: usize, width: usize, height: usize) -> Result<Vec<u8>> {
    let row_size = width * 4;
    if stride < row_size || data.len() < stride * height.saturating_sub(1) + row_size {
        return Err(PlayerError::RenderError(format!(
            "RGBA 数据不完整: stride={}, len={}, {}x{}",
            stride,
            data.len(),
            width,
            height
        )));
    }

    let mut packed = vec![0u8; row_size * height];
    for y in 0..height {
        let src_offset = y * stride;
        let dst_offset = y * row_size;
        packed[dst_offset..dst_offset + row_size].copy_from_slice(&data[src_offset..src_offset + row_size]);
    }
    Ok(packed)
}

/// 计算视频的显示区域，保持宽高比并居中
pub fn fit_rect(video_width: usize, video_height: usize, rect: Rect) -> Rect {
    if video_width == 0 || video_height == 0 || rect.height() <= 0.0 {
        return rect;
    }
    let video_aspect = video_width as f32 / video_height as f32;
    let rect_aspect = rect.width() / rect.height();

    let display_size = if video_aspect > rect_aspect {
        // 视频更宽，以宽度为准
        egui::Vec2::new(rect.width(), rect.width() / video_aspect)
    } else {
        // 视频更高，以高度为准
        egui::Vec2::new(rect.height() * video_aspect, rect.height())
    };

    Rect::from_center_size(rect.center(), display_size)
}

/// egui 视频渲染器（UI 线程）
#[derive(Default)]
pub struct EguiVideoRenderer {
    texture: Option<TextureHandle>,
}

impl EguiVideoRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 上传槽位里的新画面（如果有），然后绘制当前纹理
    pub fn update_and_render(&mut self, ui: &mut Ui, slot: &FrameSlot, rect: Rect) {
        if let Some(frame) = slot.take() {
            debug!("📺 更新视频纹理: {:?}, PTS: {:?}", frame.image.size, frame.pts);
            match &mut self.texture {
                Some(handle) => handle.set(frame.image, TextureOptions::LINEAR),
                None => {
                    self.texture = Some(ui.ctx().load_texture("video_frame", frame.image, TextureOptions::LINEAR));
                }
            }
        }

        if let Some(texture) = &self.texture {
            let [width, height] = texture.size();
            let display_rect = fit_rect(width, height, rect);
            ui.allocate_ui_at_rect(display_rect, |ui| {
                ui.add(egui::Image::from_texture(texture).fit_to_exact_size(display_rect.size()));
            });
        }
    }
}
