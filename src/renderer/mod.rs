// 渲染边界：解码帧的消费者与叠加层纹理缓存

pub mod texture;

pub use texture::{MemoryUploader, PixelBuffer, TextureCache, TextureHandle, TextureUploader, UploadQueue};

use crate::codec::OutputFrame;
use crate::core::{RenderTarget, Result, VideoFormat};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

/// 帧渲染器抽象接口
///
/// 在播放工作线程上调用；只有渲染目标有效时才会收到 `render`。
pub trait FrameRenderer: Send {
    fn name(&self) -> &str;

    fn render(&mut self, frame: &OutputFrame, target: &RenderTarget) -> Result<()>;

    fn resize(&mut self, width: u32, height: u32);

    fn format_changed(&mut self, format: &VideoFormat);
}

/// 渲染统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_rendered: u64,
    pub bytes_rendered: u64,
    pub resizes: u64,
    pub format_changes: u64,
    pub last_timestamp_us: Option<i64>,
    pub last_size: Option<(u32, u32)>,
}

/// 只打日志的渲染器（演示和测试用）
#[derive(Clone, Default)]
pub struct LogRenderer {
    stats: Arc<Mutex<RenderStats>>,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RenderStats {
        self.stats.lock().clone()
    }
}

impl FrameRenderer for LogRenderer {
    fn name(&self) -> &str {
        "log"
    }

    fn render(&mut self, frame: &OutputFrame, target: &RenderTarget) -> Result<()> {
        let mut stats = self.stats.lock();
        stats.frames_rendered += 1;
        stats.bytes_rendered += frame.payload.len() as u64;
        stats.last_timestamp_us = Some(frame.timestamp_us());

        let count = stats.frames_rendered;
        if count <= 3 || count % 100 == 0 {
            info!(
                "📺 渲染第 {} 帧: pts={}us, {} 字节 -> {:?} {}x{}",
                count,
                frame.timestamp_us(),
                frame.payload.len(),
                target.surface,
                target.width,
                target.height
            );
        } else {
            debug!("渲染帧 pts={}us", frame.timestamp_us());
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        let mut stats = self.stats.lock();
        stats.resizes += 1;
        stats.last_size = Some((width, height));
        info!("📐 渲染尺寸: {}x{}", width, height);
    }

    fn format_changed(&mut self, format: &VideoFormat) {
        self.stats.lock().format_changes += 1;
        info!("🔄 渲染器收到新格式: {}", format);
    }
}
