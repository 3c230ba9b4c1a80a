use crate::codec::DecoderRegistry;
use crate::core::{
    log_ctx, PlaybackStats, PlayerConfig, PlayerError, PlayerState, Result, STATE_UNAVAILABLE,
};
use crate::player::worker::{PlaybackWorker, PlayerCommand, SharedState};
use crate::renderer::FrameRenderer;
use crate::source::SourceOpener;
use crate::surface::RenderTargetBridge;
use crossbeam_channel::{bounded, unbounded, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 播放控制器：应用层命令入口
///
/// 命令经消息通道交给播放工作线程执行，调用方同步等待结果；
/// 表面事件由桥的监听器投递到同一通道，按到达顺序与命令一起处理。
pub struct PlayerController {
    command_tx: Sender<PlayerCommand>,
    shared: Arc<Mutex<SharedState>>,
    bridge: RenderTargetBridge,
    worker: Option<JoinHandle<()>>,
}

impl PlayerController {
    pub fn new(
        config: PlayerConfig,
        registry: Arc<DecoderRegistry>,
        opener: Arc<dyn SourceOpener>,
        renderer: Box<dyn FrameRenderer>,
    ) -> Self {
        Self::with_bridge(config, registry, opener, renderer, RenderTargetBridge::new())
    }

    /// 使用外部（窗口系统）持有的表面桥
    pub fn with_bridge(
        config: PlayerConfig,
        registry: Arc<DecoderRegistry>,
        opener: Arc<dyn SourceOpener>,
        renderer: Box<dyn FrameRenderer>,
        bridge: RenderTargetBridge,
    ) -> Self {
        info!("{} 🎮 创建播放控制器 (渲染器: {})", log_ctx(), renderer.name());
        let (command_tx, command_rx) = unbounded::<PlayerCommand>();
        let shared = Arc::new(Mutex::new(SharedState::default()));

        let worker = PlaybackWorker::new(config, registry, opener, renderer, shared.clone());
        let worker = thread::spawn(move || worker.run(command_rx));

        let event_tx = command_tx.clone();
        bridge.attach_listener(Box::new(move |event| {
            if event_tx.send(PlayerCommand::Surface(event)).is_err() {
                debug!("{} 播放工作线程已退出，丢弃表面事件", log_ctx());
            }
        }));

        Self {
            command_tx,
            shared,
            bridge,
            worker: Some(worker),
        }
    }

    fn request<F>(&self, command: &str, make: F) -> Result<()>
    where
        F: FnOnce(Sender<Result<()>>) -> PlayerCommand,
    {
        let (reply_tx, reply_rx) = bounded(1);
        if self.command_tx.send(make(reply_tx)).is_err() {
            return Err(self.released(command));
        }
        reply_rx.recv().map_err(|_| self.released(command))?
    }

    fn released(&self, command: &str) -> PlayerError {
        warn!("{} ⚠️ 播放器已释放，忽略 {}", log_ctx(), command);
        PlayerError::ProtocolViolation(format!("播放器已释放，不能 {}", command))
    }

    /// 打开数据源并配置解码会话；配置失败同步返回
    pub fn prepare(&self, source_path: &str) -> Result<()> {
        self.request("prepare", |reply| PlayerCommand::Prepare {
            locator: source_path.to_string(),
            reply,
        })
    }

    pub fn playback(&self) -> Result<()> {
        self.request("playback", PlayerCommand::Playback)
    }

    pub fn pause(&self) -> Result<()> {
        self.request("pause", PlayerCommand::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.request("resume", PlayerCommand::Resume)
    }

    /// 停止送数据并释放解码会话
    pub fn stop(&self) -> Result<()> {
        self.request("stop", PlayerCommand::Stop)
    }

    pub fn seek_to(&self, position_us: i64) -> Result<()> {
        self.request("seek", |reply| PlayerCommand::Seek { position_us, reply })
    }

    /// 等待此前投递的所有表面事件都已被工作线程应用
    pub fn flush_events(&self) {
        let (reply_tx, reply_rx) = bounded(1);
        if self.command_tx.send(PlayerCommand::Barrier(reply_tx)).is_ok() {
            let _ = reply_rx.recv();
        }
    }

    /// 当前播放状态；第一次 prepare 之前（`Init`）为 `None`
    pub fn get_state(&self) -> Option<PlayerState> {
        match self.shared.lock().state {
            PlayerState::Init => None,
            state => Some(state),
        }
    }

    /// 整数形式的状态，`None` 对应 `STATE_UNAVAILABLE`
    pub fn state_code(&self) -> i32 {
        self.get_state().map_or(STATE_UNAVAILABLE, |s| s.code())
    }

    pub fn stats(&self) -> PlaybackStats {
        self.shared.lock().stats.clone()
    }

    pub fn bridge(&self) -> RenderTargetBridge {
        self.bridge.clone()
    }

    pub fn is_released(&self) -> bool {
        self.worker.is_none()
    }

    /// 释放解码会话并断开表面桥；状态保持可查询，可重复调用
    pub fn release(&mut self) {
        let Some(worker) = self.worker.take() else {
            debug!("{} 播放器已释放，忽略", log_ctx());
            return;
        };
        info!("{} 🗑️ 释放播放器", log_ctx());
        self.bridge.detach_listener();
        let _ = self.command_tx.send(PlayerCommand::Shutdown);
        if worker.join().is_err() {
            warn!("{} ⚠️ 播放工作线程异常退出", log_ctx());
        }
    }
}

impl Drop for PlayerController {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PassthroughFactory, PassthroughOptions, PassthroughProbe};
    use crate::core::{RenderTarget, SurfaceHandle};
    use crate::renderer::LogRenderer;
    use crate::source::{DefaultSourceOpener, PacketSource, SyntheticSource};
    use std::time::{Duration, Instant};

    /// 把 *.mp4 映射成合成数据源（容器解析不在本 crate 内）
    struct ClipOpener {
        frames: u64,
    }

    impl SourceOpener for ClipOpener {
        fn open(&self, locator: &str, config: &PlayerConfig) -> Result<Box<dyn PacketSource>> {
            if locator.ends_with(".mp4") {
                Ok(Box::new(SyntheticSource::new(
                    "video/avc",
                    self.frames,
                    64,
                    32,
                    config.frame_interval_us(),
                )))
            } else {
                DefaultSourceOpener.open(locator, config)
            }
        }
    }

    struct Harness {
        player: PlayerController,
        probe: PassthroughProbe,
        renderer: LogRenderer,
    }

    fn harness(config: PlayerConfig, frames: u64, options: PassthroughOptions) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let factory = PassthroughFactory::new(options);
        let probe = factory.probe();
        let registry = Arc::new(DecoderRegistry::new().with_factory(Arc::new(factory)));
        let renderer = LogRenderer::new();
        let player = PlayerController::new(
            config,
            registry,
            Arc::new(ClipOpener { frames }),
            Box::new(renderer.clone()),
        );
        Harness { player, probe, renderer }
    }

    fn fast_config() -> PlayerConfig {
        PlayerConfig {
            pace_frames: false,
            idle_wait_ms: 2,
            ..Default::default()
        }
    }

    /// 500fps 节奏播放，足够慢以便在中途观察
    fn paced_config() -> PlayerConfig {
        PlayerConfig {
            frame_rate: 500.0,
            idle_wait_ms: 2,
            ..Default::default()
        }
    }

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn surface(id: u64) -> RenderTarget {
        RenderTarget::new(SurfaceHandle(id), 640, 360)
    }

    #[test]
    fn test_state_unavailable_before_prepare() {
        let h = harness(fast_config(), 10, PassthroughOptions::default());
        assert_eq!(h.player.get_state(), None);
        assert_eq!(h.player.state_code(), STATE_UNAVAILABLE);

        for result in [h.player.playback(), h.player.pause(), h.player.resume(), h.player.stop()] {
            assert!(matches!(result, Err(PlayerError::ProtocolViolation(_))));
        }
        assert_eq!(h.player.get_state(), None);
    }

    #[test]
    fn test_command_scenario() {
        let mut h = harness(paced_config(), 100_000, PassthroughOptions::default());
        h.player.prepare("clip.mp4").unwrap();
        assert_eq!(h.player.get_state(), Some(PlayerState::Prepared));
        h.player.playback().unwrap();
        assert_eq!(h.player.get_state(), Some(PlayerState::Playing));
        h.player.pause().unwrap();
        assert_eq!(h.player.get_state(), Some(PlayerState::Paused));
        h.player.resume().unwrap();
        assert_eq!(h.player.get_state(), Some(PlayerState::Playing));
        h.player.stop().unwrap();
        assert_eq!(h.player.get_state(), Some(PlayerState::Stopped));
        assert_eq!(h.player.state_code(), PlayerState::Stopped.code());

        h.player.release();
        assert_eq!(h.player.get_state(), Some(PlayerState::Stopped));
        h.player.release();
        assert!(h.player.is_released());
        assert!(matches!(h.player.playback(), Err(PlayerError::ProtocolViolation(_))));
        assert_eq!(h.probe.snapshot().service_releases, 1);
    }

    #[test]
    fn test_invalid_transitions_are_noops() {
        let h = harness(paced_config(), 100_000, PassthroughOptions::default());
        h.player.prepare("clip.mp4").unwrap();
        assert!(h.player.pause().is_err());
        assert!(h.player.resume().is_err());
        assert!(h.player.prepare("clip.mp4").is_err());
        assert_eq!(h.player.get_state(), Some(PlayerState::Prepared));
    }

    #[test]
    fn test_prepare_failure_reports_configuration_error() {
        let h = harness(fast_config(), 10, PassthroughOptions::default());
        let err = h.player.prepare("movie.mkv").unwrap_err();
        assert!(matches!(err, PlayerError::Configuration(_)));
        assert_eq!(h.player.get_state(), Some(PlayerState::Error));

        let err = h.player.prepare("synthetic:theora?frames=3").unwrap_err();
        assert!(matches!(err, PlayerError::Configuration(_)));

        // Error 状态下可以重新 prepare
        h.player.prepare("clip.mp4").unwrap();
        assert_eq!(h.player.get_state(), Some(PlayerState::Prepared));
    }

    #[test]
    fn test_plays_to_completion() {
        let h = harness(fast_config(), 20, PassthroughOptions::default());
        h.player.bridge().notify_created(surface(1));
        h.player.prepare("clip.mp4").unwrap();
        h.player.playback().unwrap();

        assert!(wait_until(|| h.player.get_state() == Some(PlayerState::Completed)));
        let stats = h.player.stats();
        assert_eq!(stats.frames_rendered, 20);
        assert_eq!(stats.frames_dropped, 0);
        assert_eq!(stats.format_changes, 1);
        assert_eq!(h.renderer.stats().frames_rendered, 20);
        assert_eq!(h.renderer.stats().format_changes, 1);
        assert_eq!(h.probe.snapshot().end_of_stream_submitted, 1);

        // 完成后可以重新 prepare
        h.player.prepare("clip.mp4").unwrap();
        assert_eq!(h.player.stats(), PlaybackStats::default());
    }

    #[test]
    fn test_destroyed_surface_keeps_playing() {
        let h = harness(paced_config(), 100_000, PassthroughOptions::default());
        let bridge = h.player.bridge();
        bridge.notify_created(surface(1));
        h.player.prepare("clip.mp4").unwrap();
        h.player.playback().unwrap();
        assert!(wait_until(|| h.renderer.stats().frames_rendered >= 3));

        bridge.notify_destroyed();
        h.player.flush_events();
        let rendered = h.renderer.stats().frames_rendered;
        assert!(wait_until(|| h.player.stats().frames_dropped >= 3));
        assert_eq!(h.player.get_state(), Some(PlayerState::Playing));
        assert_eq!(h.renderer.stats().frames_rendered, rendered);

        bridge.notify_created(surface(2));
        h.player.flush_events();
        assert!(wait_until(|| h.renderer.stats().frames_rendered > rendered));
        assert_eq!(h.player.get_state(), Some(PlayerState::Playing));
    }

    #[test]
    fn test_surface_events_applied_before_flush_returns() {
        let bridge = RenderTargetBridge::new();
        bridge.notify_created(surface(7));

        let renderer = LogRenderer::new();
        let registry = Arc::new(DecoderRegistry::new().with_factory(Arc::new(PassthroughFactory::default())));
        let player = PlayerController::with_bridge(
            fast_config(),
            registry,
            Arc::new(ClipOpener { frames: 1 }),
            Box::new(renderer.clone()),
            bridge.clone(),
        );
        // 晚绑定的监听器收到补发的 Created
        player.flush_events();
        assert_eq!(renderer.stats().last_size, Some((640, 360)));

        bridge.notify_resized(1920, 1080);
        player.flush_events();
        assert_eq!(renderer.stats().last_size, Some((1920, 1080)));
        assert_eq!(renderer.stats().resizes, 2);
    }

    #[test]
    fn test_seek_returns_to_prior_state() {
        let h = harness(paced_config(), 100_000, PassthroughOptions::default());
        h.player.bridge().notify_created(surface(1));
        h.player.prepare("clip.mp4").unwrap();
        h.player.playback().unwrap();

        h.player.seek_to(1_000_000).unwrap();
        assert_eq!(h.player.get_state(), Some(PlayerState::Playing));
        // 2ms 一帧，30 帧一个关键帧：落在第 480 帧
        assert!(wait_until(|| h.player.stats().last_timestamp_us >= 960_000));
        assert!(h.probe.snapshot().flushes >= 1);

        h.player.pause().unwrap();
        h.player.seek_to(0).unwrap();
        assert_eq!(h.player.get_state(), Some(PlayerState::Paused));

        h.player.stop().unwrap();
        assert!(matches!(h.player.seek_to(0), Err(PlayerError::ProtocolViolation(_))));
    }

    #[test]
    fn test_service_failure_moves_to_error() {
        let h = harness(
            fast_config(),
            1_000,
            PassthroughOptions {
                fail_after_outputs: Some(5),
                ..Default::default()
            },
        );
        h.player.bridge().notify_created(surface(1));
        h.player.prepare("clip.mp4").unwrap();
        h.player.playback().unwrap();

        assert!(wait_until(|| h.player.get_state() == Some(PlayerState::Error)));
        assert_eq!(h.player.stats().frames_rendered, 5);
        assert!(h.player.stop().is_err());
        h.player.prepare("clip.mp4").unwrap();
    }

    #[test]
    fn test_surface_mode_renders_through_decoder() {
        let config = PlayerConfig {
            surface_mode: true,
            ..fast_config()
        };
        let h = harness(config, 10, PassthroughOptions::default());
        h.player.bridge().notify_created(surface(9));
        h.player.flush_events();
        h.player.prepare("clip.mp4").unwrap();
        assert_eq!(h.probe.snapshot().surface, Some(SurfaceHandle(9)));

        h.player.playback().unwrap();
        assert!(wait_until(|| h.player.get_state() == Some(PlayerState::Completed)));
        assert_eq!(h.probe.snapshot().frames_rendered, 10);
        assert_eq!(h.renderer.stats().frames_rendered, 0);
    }

    #[test]
    fn test_drop_releases_decoder() {
        let h = harness(fast_config(), 10, PassthroughOptions::default());
        h.player.prepare("clip.mp4").unwrap();
        let probe = h.probe.clone();
        let bridge = h.player.bridge();
        drop(h);
        assert_eq!(probe.snapshot().service_releases, 1);
        assert!(!bridge.has_listener());
    }

    #[test]
    fn test_oversized_packets_skipped_to_completion() {
        let h = harness(fast_config(), 0, PassthroughOptions::default());
        h.player.bridge().notify_created(surface(1));
        // 2x2 的槽位只有 4 字节，合成包是 16 字节
        h.player.prepare("synthetic:avc?frames=3&width=2&height=2").unwrap();
        h.player.playback().unwrap();

        assert!(wait_until(|| h.player.get_state() == Some(PlayerState::Completed)));
        let stats = h.player.stats();
        assert_eq!(stats.packets_oversized, 3);
        assert_eq!(stats.frames_rendered, 0);
        // 只有 EOS 真正提交给了解码器
        let counters = h.probe.snapshot();
        assert_eq!(counters.submitted, 1);
        assert_eq!(counters.end_of_stream_submitted, 1);
    }

    #[test]
    fn test_input_rejections_visible_before_first_frame() {
        // 两个输入槽位都被扣住，凑不够解码延迟，不会出帧
        let h = harness(
            fast_config(),
            100,
            PassthroughOptions {
                input_slots: 2,
                latency: 4,
                emit_format_change: false,
                ..Default::default()
            },
        );
        h.player.prepare("clip.mp4").unwrap();
        h.player.playback().unwrap();

        assert!(wait_until(|| h.player.stats().input_rejections >= 3));
        assert_eq!(h.player.stats().frames_rendered, 0);
        assert_eq!(h.player.get_state(), Some(PlayerState::Playing));
    }
}
