use crate::player::{PlaybackManager, SessionEvent};
use crate::renderer::{EguiPresenter, EguiVideoRenderer, FrameSlot};
use crossbeam_channel::Receiver;
use egui::{Context, Key};
use log::{error, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// 启动失败的信息，窗口关闭后由 main 读取并以非零状态退出
pub type StartError = Arc<Mutex<Option<String>>>;

/// 视频播放窗口
///
/// 窗口创建时启动播放；播放完毕、按 Esc/Q 或关闭窗口都会结束会话
pub struct VideoPlayerApp {
    manager: PlaybackManager,
    renderer: EguiVideoRenderer,
    slot: FrameSlot,
    events: Receiver<SessionEvent>,
    closing: bool,
}

impl VideoPlayerApp {
    pub fn new(cc: &eframe::CreationContext<'_>, mut manager: PlaybackManager, start_error: StartError) -> Self {
        let slot = FrameSlot::default();
        let presenter = EguiPresenter::new(cc.egui_ctx.clone(), slot.clone());
        let (tx, rx) = crossbeam_channel::unbounded();

        let closing = match manager.start(presenter, Some(tx)) {
            Ok(()) => false,
            Err(e) => {
                error!("❌ 无法开始播放: {}", e);
                *start_error.lock() = Some(e.to_string());
                true
            }
        };

        Self {
            manager,
            renderer: EguiVideoRenderer::new(),
            slot,
            events: rx,
            closing,
        }
    }

    fn poll_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::EndOfStream => {
                    info!("🏁 播放结束，关闭窗口");
                    self.closing = true;
                }
            }
        }
        // 呈现线程因队列中止而退出时不会发事件
        if !self.closing && self.manager.is_shutting_down() {
            self.closing = true;
        }
    }

    fn handle_keyboard_input(&mut self, ctx: &Context) {
        if ctx.input(|i| i.key_pressed(Key::Escape) || i.key_pressed(Key::Q)) {
            info!("⌨️  用户请求退出");
            self.closing = true;
        }
    }
}

impl eframe::App for VideoPlayerApp {
    fn update(&mut self, ctx: &Context, _frame: &mut eframe::Frame) {
        self.poll_events();
        self.handle_keyboard_input(ctx);

        if self.closing {
            // 先在 UI 线程发出退出信号，呈现线程会在当前等待结束前醒来
            self.manager.stop();
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }

        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(egui::Color32::BLACK))
            .show(ctx, |ui| {
                let rect = ui.available_rect_before_wrap();
                self.renderer.update_and_render(ui, &self.slot, rect);
            });

        // 新画面由呈现线程触发重绘；这里只保证能及时收到结束事件
        ctx.request_repaint_after(Duration::from_millis(100));
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        info!("🔚 VideoPlayerApp 退出");
        self.manager.stop();
    }
}
