use anyhow::Result;
use hwdec_player::core::{PlayerConfig, PlayerState, RenderTarget, SurfaceHandle};
use hwdec_player::renderer::{LogRenderer, MemoryUploader, PixelBuffer, TextureCache};
use hwdec_player::Engine;
use log::{info, warn};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_SOURCE: &str = "synthetic:avc?frames=90&width=640&height=360";

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("🎬 hwdec_player 演示启动");

    let mut args = std::env::args().skip(1);
    let mut source = DEFAULT_SOURCE.to_string();
    let mut config = PlayerConfig::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config 需要一个文件路径"))?;
                config = PlayerConfig::from_file(&path)?;
            }
            other => source = other.to_string(),
        }
    }

    // 叠加层贴图
    let mut overlays = TextureCache::new(MemoryUploader::new());
    let queue = overlays.queue();
    queue.push("watermark", PixelBuffer::solid(64, 16, [255, 255, 255, 128]));
    overlays.process_pending();
    info!("🖼️ 叠加层纹理: {:?}", overlays.get("watermark"));

    let engine = Engine::initialize(config)?;
    let renderer = LogRenderer::new();
    let mut player = engine.create_player(Box::new(renderer.clone()))?;

    // 模拟窗口系统：在自己的线程上创建、缩放、销毁再重建表面
    let bridge = player.bridge();
    let windowing = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        bridge.notify_created(RenderTarget::new(SurfaceHandle(1), 1280, 720));
        thread::sleep(Duration::from_millis(500));
        bridge.notify_resized(1920, 1080);
        thread::sleep(Duration::from_millis(500));
        bridge.notify_destroyed();
        thread::sleep(Duration::from_millis(300));
        bridge.notify_created(RenderTarget::new(SurfaceHandle(2), 1920, 1080));
    });

    player.prepare(&source)?;
    player.playback()?;

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        match player.get_state() {
            Some(PlayerState::Completed) => break,
            Some(PlayerState::Error) => {
                warn!("⚠️ 播放出错");
                break;
            }
            _ if Instant::now() >= deadline => {
                warn!("⚠️ 等待播放完成超时");
                break;
            }
            _ => thread::sleep(Duration::from_millis(50)),
        }
    }

    let stats = player.stats();
    info!(
        "📊 渲染 {} 帧，丢弃 {} 帧，超长输入包 {} 个，输入背压 {} 次，格式变更 {} 次",
        stats.frames_rendered,
        stats.frames_dropped,
        stats.packets_oversized,
        stats.input_rejections,
        stats.format_changes
    );
    info!("📊 渲染器: {:?}", renderer.stats());

    player.release();
    if windowing.join().is_err() {
        warn!("⚠️ 窗口线程异常退出");
    }
    engine.shutdown();

    Ok(())
}
