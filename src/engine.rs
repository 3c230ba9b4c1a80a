use crate::codec::{DecoderFactory, DecoderRegistry, PassthroughFactory};
use crate::core::{PlayerConfig, PlayerError, Result};
use crate::player::PlayerController;
use crate::renderer::FrameRenderer;
use crate::source::{DefaultSourceOpener, SourceOpener};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static ENGINE_LIVE: AtomicBool = AtomicBool::new(false);

/// 进程级引擎：注册内置解码器，创建播放器
///
/// 同一时刻只能存在一个引擎；`shutdown()` 或 drop 之后才能再次 `initialize`。
pub struct Engine {
    config: PlayerConfig,
    registry: DecoderRegistry,
    opener: Arc<dyn SourceOpener>,
    live: bool,
}

impl Engine {
    pub fn initialize(config: PlayerConfig) -> Result<Self> {
        if ENGINE_LIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("⚠️ 引擎已初始化，忽略重复调用");
            return Err(PlayerError::ProtocolViolation("引擎已初始化".to_string()));
        }

        let mut registry = DecoderRegistry::new();
        // 平台硬件后端通过 register_factory 排在软件直通之前
        registry.register(Arc::new(PassthroughFactory::default()));
        info!("✅ 引擎初始化完成");

        Ok(Self {
            config,
            registry,
            opener: Arc::new(DefaultSourceOpener),
            live: true,
        })
    }

    pub fn is_initialized() -> bool {
        ENGINE_LIVE.load(Ordering::SeqCst)
    }

    /// 注册解码器工厂，优先于已注册的工厂
    pub fn register_factory(&mut self, factory: Arc<dyn DecoderFactory>) {
        self.registry.register_first(factory);
    }

    pub fn with_source_opener(mut self, opener: Arc<dyn SourceOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    pub fn create_player(&self, renderer: Box<dyn FrameRenderer>) -> Result<PlayerController> {
        if !self.live {
            return Err(PlayerError::ProtocolViolation("引擎已关闭".to_string()));
        }
        Ok(PlayerController::new(
            self.config.clone(),
            Arc::new(self.registry.clone()),
            self.opener.clone(),
            renderer,
        ))
    }

    pub fn shutdown(mut self) {
        self.end();
    }

    fn end(&mut self) {
        if self.live {
            self.live = false;
            ENGINE_LIVE.store(false, Ordering::SeqCst);
            info!("🛑 引擎已关闭");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.end();
    }
}
