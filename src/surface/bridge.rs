use crate::core::{log_ctx, RenderTarget, SurfaceEvent};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

/// 表面事件监听器
pub type SurfaceListener = Box<dyn FnMut(SurfaceEvent) + Send>;

#[derive(Default)]
struct BridgeInner {
    snapshot: Option<RenderTarget>,
    listener: Option<SurfaceListener>,
    dropped_events: u64,
}

impl BridgeInner {
    fn forward(&mut self, event: SurfaceEvent) {
        match self.listener.as_mut() {
            Some(listener) => listener(event),
            None => {
                self.dropped_events += 1;
                debug!("{} 没有监听器，丢弃表面事件 {:?}", log_ctx(), event);
            }
        }
    }
}

/// 渲染表面生命周期桥
///
/// 窗口系统在自己的线程上调用 `notify_*`，桥更新快照并同步转发给当前监听器。
/// 转发在锁内完成，所以补发的 `Created` 一定先于之后的真实事件到达。
/// 监听器不能回调桥本身。
#[derive(Clone, Default)]
pub struct RenderTargetBridge {
    inner: Arc<Mutex<BridgeInner>>,
}

impl RenderTargetBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_created(&self, target: RenderTarget) {
        let target = RenderTarget { valid: true, ..target };
        info!(
            "{} 🖼️ 表面创建: {:?} {}x{}",
            log_ctx(),
            target.surface,
            target.width,
            target.height
        );
        let mut inner = self.inner.lock();
        inner.snapshot = Some(target);
        inner.forward(SurfaceEvent::Created(target));
    }

    pub fn notify_resized(&self, width: u32, height: u32) {
        debug!("{} 表面尺寸变化: {}x{}", log_ctx(), width, height);
        let mut inner = self.inner.lock();
        if let Some(snapshot) = inner.snapshot.as_mut() {
            snapshot.width = width;
            snapshot.height = height;
        }
        inner.forward(SurfaceEvent::Resized { width, height });
    }

    pub fn notify_destroyed(&self) {
        info!("{} 🗑️ 表面销毁", log_ctx());
        let mut inner = self.inner.lock();
        if let Some(snapshot) = inner.snapshot.as_mut() {
            snapshot.valid = false;
        }
        inner.forward(SurfaceEvent::Destroyed);
    }

    /// 替换监听器；表面当前有效时在返回前补发一次 `Created`
    pub fn attach_listener(&self, mut listener: SurfaceListener) {
        let mut inner = self.inner.lock();
        if let Some(target) = inner.snapshot.filter(|t| t.valid) {
            debug!("{} 向新监听器补发表面创建事件", log_ctx());
            listener(SurfaceEvent::Created(target));
        }
        inner.listener = Some(listener);
    }

    /// 移除监听器；之后的事件直接丢弃，不缓存
    pub fn detach_listener(&self) {
        let mut inner = self.inner.lock();
        if inner.listener.take().is_some() {
            debug!("{} 监听器已移除", log_ctx());
        }
    }

    pub fn has_listener(&self) -> bool {
        self.inner.lock().listener.is_some()
    }

    pub fn snapshot(&self) -> Option<RenderTarget> {
        self.inner.lock().snapshot
    }

    pub fn is_valid(&self) -> bool {
        self.snapshot().map_or(false, |t| t.valid)
    }

    /// 没有监听器时被丢弃的事件数
    pub fn dropped_events(&self) -> u64 {
        self.inner.lock().dropped_events
    }
}
