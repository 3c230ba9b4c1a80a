use crate::codec::{DecoderRegistry, DecoderSession, InputStatus, OutputFrame, OutputStatus};
use crate::core::{
    log_ctx, EncodedPacket, PlaybackClock, PlaybackStats, PlayerConfig, PlayerError, PlayerState,
    RenderTarget, Result, SurfaceEvent,
};
use crate::renderer::FrameRenderer;
use crate::source::{PacketSource, SourceOpener};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// 没有进展时的退避时长
const BACKOFF: Duration = Duration::from_millis(2);

const LOG_FIRST_N: u64 = 5;

/// 发给播放工作线程的消息
pub(crate) enum PlayerCommand {
    Prepare {
        locator: String,
        reply: Sender<Result<()>>,
    },
    Playback(Sender<Result<()>>),
    Pause(Sender<Result<()>>),
    Resume(Sender<Result<()>>),
    Stop(Sender<Result<()>>),
    Seek {
        position_us: i64,
        reply: Sender<Result<()>>,
    },
    /// 窗口线程转交过来的表面事件（不需要回复）
    Surface(SurfaceEvent),
    /// 之前排队的消息都已处理完时回复
    Barrier(Sender<()>),
    Shutdown,
}

/// 工作线程写、调用方读的状态
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub state: PlayerState,
    pub stats: PlaybackStats,
}

/// 播放工作线程：所有播放状态和解码会话状态只在这里修改
pub(crate) struct PlaybackWorker {
    config: PlayerConfig,
    registry: Arc<DecoderRegistry>,
    opener: Arc<dyn SourceOpener>,
    renderer: Box<dyn FrameRenderer>,
    shared: Arc<Mutex<SharedState>>,
    clock: PlaybackClock,

    state: PlayerState,
    session: Option<DecoderSession>,
    source: Option<Box<dyn PacketSource>>,
    target: Option<RenderTarget>,
    stats: PlaybackStats,

    // 被拒绝、等待重试的输入包
    pending_packet: Option<EncodedPacket>,
    // 等待显示时间到达的输出帧（持有槽位）
    pending_frame: Option<OutputFrame>,
    source_exhausted: bool,
    end_of_stream_signalled: bool,
}

impl PlaybackWorker {
    pub fn new(
        config: PlayerConfig,
        registry: Arc<DecoderRegistry>,
        opener: Arc<dyn SourceOpener>,
        renderer: Box<dyn FrameRenderer>,
        shared: Arc<Mutex<SharedState>>,
    ) -> Self {
        Self {
            config,
            registry,
            opener,
            renderer,
            shared,
            clock: PlaybackClock::new(),
            state: PlayerState::Init,
            session: None,
            source: None,
            target: None,
            stats: PlaybackStats::default(),
            pending_packet: None,
            pending_frame: None,
            source_exhausted: false,
            end_of_stream_signalled: false,
        }
    }

    /// 工作线程主循环
    ///
    /// 每轮先处理完所有排队的消息（非阻塞），再在播放状态下推进一步解码；
    /// 没有进展时阻塞在消息通道上等待，保证命令能及时响应。
    pub fn run(mut self, command_rx: Receiver<PlayerCommand>) {
        info!("{} 🎬 播放工作线程启动 (表面模式: {})", log_ctx(), self.config.surface_mode);

        'outer: loop {
            loop {
                match command_rx.try_recv() {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            break 'outer;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'outer,
                }
            }

            let wait = if self.state == PlayerState::Playing {
                self.pump()
            } else {
                Some(self.config.idle_wait())
            };

            if let Some(wait) = wait {
                match command_rx.recv_timeout(wait) {
                    Ok(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        self.teardown();
        info!(
            "{} 🛑 播放工作线程退出（渲染 {} 帧，丢弃 {} 帧）",
            log_ctx(),
            self.stats.frames_rendered,
            self.stats.frames_dropped
        );
    }

    /// 返回 false 表示线程应退出
    fn handle_command(&mut self, cmd: PlayerCommand) -> bool {
        match cmd {
            PlayerCommand::Prepare { locator, reply } => {
                let result = self.prepare(&locator);
                let _ = reply.send(result);
            }
            PlayerCommand::Playback(reply) => {
                let _ = reply.send(self.playback());
            }
            PlayerCommand::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            PlayerCommand::Resume(reply) => {
                let _ = reply.send(self.resume());
            }
            PlayerCommand::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            PlayerCommand::Seek { position_us, reply } => {
                let _ = reply.send(self.seek(position_us));
            }
            PlayerCommand::Surface(event) => self.apply_surface_event(event),
            PlayerCommand::Barrier(reply) => {
                let _ = reply.send(());
            }
            PlayerCommand::Shutdown => {
                info!("{} ⏹ 播放工作线程收到退出命令", log_ctx());
                return false;
            }
        }
        true
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state != state {
            info!("{} 🔄 播放状态: {:?} -> {:?}", log_ctx(), self.state, state);
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let mut shared = self.shared.lock();
        shared.state = self.state;
        shared.stats = self.stats.clone();
    }

    fn violation(&self, command: &str) -> PlayerError {
        warn!("{} ⚠️ 状态 {:?} 下忽略 {}", log_ctx(), self.state, command);
        PlayerError::ProtocolViolation(format!("{:?} 状态下不能 {}", self.state, command))
    }

    fn prepare(&mut self, locator: &str) -> Result<()> {
        if !self.state.can_prepare() {
            return Err(self.violation("prepare"));
        }
        info!("{} 📂 prepare: {}", log_ctx(), locator);

        self.close_session();
        self.stats = PlaybackStats::default();
        self.clock.reset();
        self.clock.pause();

        let source = match self.opener.open(locator, &self.config) {
            Ok(source) => source,
            Err(e) => {
                error!("{} ❌ 打开数据源失败: {}", log_ctx(), e);
                self.set_state(PlayerState::Error);
                return Err(e);
            }
        };

        let info = source.stream_info().clone();
        let width = info.width.unwrap_or(self.config.fallback_width);
        let height = info.height.unwrap_or(self.config.fallback_height);

        let mut session = DecoderSession::new(self.registry.clone())
            .with_max_wait_us(self.config.max_wait_us)
            .with_max_input_size(self.config.max_input_size);
        // 表面模式下配置时就要用到已有的表面
        session.bind_render_target(self.target)?;

        if let Err(e) = session.initialize(
            &info.codec_id,
            width,
            height,
            &info.config_blobs,
            self.config.surface_mode,
        ) {
            error!("{} ❌ 解码会话初始化失败: {}", log_ctx(), e);
            self.set_state(PlayerState::Error);
            return Err(e);
        }

        self.session = Some(session);
        self.source = Some(source);
        self.set_state(PlayerState::Prepared);
        Ok(())
    }

    fn playback(&mut self) -> Result<()> {
        match self.state {
            PlayerState::Prepared | PlayerState::Paused => {
                self.clock.play();
                self.set_state(PlayerState::Playing);
                Ok(())
            }
            _ => Err(self.violation("playback")),
        }
    }

    fn pause(&mut self) -> Result<()> {
        match self.state {
            PlayerState::Playing => {
                self.clock.pause();
                self.set_state(PlayerState::Paused);
                Ok(())
            }
            _ => Err(self.violation("pause")),
        }
    }

    fn resume(&mut self) -> Result<()> {
        match self.state {
            PlayerState::Paused => {
                self.clock.play();
                self.set_state(PlayerState::Playing);
                Ok(())
            }
            _ => Err(self.violation("resume")),
        }
    }

    fn stop(&mut self) -> Result<()> {
        match self.state {
            state if state.can_stop() => {
                self.close_session();
                self.clock.reset();
                self.clock.pause();
                self.set_state(PlayerState::Stopped);
                Ok(())
            }
            _ => Err(self.violation("stop")),
        }
    }

    fn seek(&mut self, position_us: i64) -> Result<()> {
        let resume_to = match self.state {
            s @ (PlayerState::Prepared | PlayerState::Playing | PlayerState::Paused) => s,
            _ => return Err(self.violation("seek")),
        };
        info!("{} ⏩ seek 到 {}us", log_ctx(), position_us);
        self.set_state(PlayerState::Seeking);

        self.drop_pending_frame();
        self.pending_packet = None;
        self.source_exhausted = false;
        self.end_of_stream_signalled = false;

        let result = self.reposition(position_us);
        if let Err(e) = result {
            error!("{} ❌ seek 失败: {}", log_ctx(), e);
            self.set_state(PlayerState::Error);
            return Err(e);
        }

        self.clock.reset();
        self.clock.set_time(position_us);
        if resume_to == PlayerState::Playing {
            self.clock.play();
        } else {
            self.clock.pause();
        }
        self.set_state(resume_to);
        Ok(())
    }

    fn reposition(&mut self, position_us: i64) -> Result<()> {
        if let Some(session) = self.session.as_mut() {
            session.flush()?;
        }
        match self.source.as_mut() {
            Some(source) if source.is_seekable() => source.seek(position_us),
            Some(source) => Err(PlayerError::Other(format!("{} 不支持 seek", source.description()))),
            None => Ok(()),
        }
    }

    fn apply_surface_event(&mut self, event: SurfaceEvent) {
        debug!("{} 应用表面事件 {:?}", log_ctx(), event);
        match event {
            SurfaceEvent::Created(target) => {
                self.target = Some(target);
                self.renderer.resize(target.width, target.height);
            }
            SurfaceEvent::Resized { width, height } => {
                if let Some(target) = self.target.as_mut() {
                    target.width = width;
                    target.height = height;
                }
                if let Some(session) = self.session.as_mut() {
                    session.resize_render_target(width, height);
                }
                self.renderer.resize(width, height);
                return;
            }
            SurfaceEvent::Destroyed => {
                if let Some(target) = self.target.as_mut() {
                    target.valid = false;
                }
            }
        }

        let bound = self.target.filter(|t| t.valid);
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.bind_render_target(bound) {
                warn!("{} ⚠️ 绑定渲染目标失败: {}", log_ctx(), e);
            }
        }
    }

    /// 推进一步：送一个输入、取一个输出、尝试显示待显示的帧
    ///
    /// 返回下一次等待消息的时长；`None` 表示有进展，立刻继续。
    fn pump(&mut self) -> Option<Duration> {
        let mut progressed = false;

        match self.feed_input() {
            Ok(fed) => progressed |= fed,
            Err(e) => {
                self.fail(e);
                return Some(self.config.idle_wait());
            }
        }

        if self.pending_frame.is_none() {
            match self.drain_output() {
                Ok(drained) => progressed |= drained,
                Err(e) => {
                    self.fail(e);
                    return Some(self.config.idle_wait());
                }
            }
        }

        match self.present_pending() {
            Ok(None) => progressed = true,
            Ok(Some(wait)) if !progressed => return Some(wait.min(self.config.idle_wait())),
            Ok(Some(_)) => {}
            Err(e) => {
                self.fail(e);
                return Some(self.config.idle_wait());
            }
        }

        if progressed {
            None
        } else {
            Some(BACKOFF)
        }
    }

    fn feed_input(&mut self) -> Result<bool> {
        if self.end_of_stream_signalled {
            return Ok(false);
        }
        let (Some(session), Some(source)) = (self.session.as_mut(), self.source.as_mut()) else {
            return Ok(false);
        };

        if self.pending_packet.is_none() && !self.source_exhausted {
            match source.read_packet()? {
                Some(packet) => self.pending_packet = Some(packet),
                None => {
                    info!("{} 📄 数据源读完，准备提交 EOS", log_ctx());
                    self.source_exhausted = true;
                }
            }
        }

        if let Some(packet) = self.pending_packet.as_ref() {
            let status = session.push_input_buffer(
                &packet.data,
                packet.data.len(),
                packet.timestamp_us,
                packet.flags,
                self.config.input_timeout_us,
            )?;
            return Ok(match status {
                InputStatus::Accepted => {
                    self.pending_packet = None;
                    true
                }
                InputStatus::Rejected => {
                    self.stats.input_rejections += 1;
                    self.publish();
                    false
                }
                InputStatus::Oversized => {
                    // 重试也放不下，丢掉这个包继续读下一个
                    warn!(
                        "{} ⚠️ 输入包 {} 字节超过槽位容量，丢弃 (pts={}us)",
                        log_ctx(),
                        packet.data.len(),
                        packet.timestamp_us
                    );
                    self.pending_packet = None;
                    self.stats.packets_oversized += 1;
                    self.publish();
                    true
                }
            });
        }

        if self.source_exhausted {
            match session.signal_end_of_stream() {
                Ok(()) => {
                    self.end_of_stream_signalled = true;
                    return Ok(true);
                }
                Err(e) if e.is_recoverable() => {
                    debug!("EOS 暂时无法提交: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    fn drain_output(&mut self) -> Result<bool> {
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };
        match session.pull_output_frame(self.config.output_timeout_us)? {
            OutputStatus::Frame(frame) => {
                if self.config.pace_frames && !frame.is_end_of_stream() {
                    self.clock.anchor(frame.timestamp_us());
                }
                self.pending_frame = Some(frame);
                Ok(true)
            }
            OutputStatus::FormatChanged => {
                self.stats.format_changes += 1;
                let format = session.output_format()?;
                info!("{} 🔄 输出格式: {}", log_ctx(), format);
                self.renderer.format_changed(&format);
                self.publish();
                Ok(true)
            }
            OutputStatus::TryAgainLater => Ok(false),
        }
    }

    /// 显示时间到了就消费待显示帧；`Ok(Some(wait))` 表示还要等待
    fn present_pending(&mut self) -> Result<Option<Duration>> {
        let Some(frame) = self.pending_frame.as_ref() else {
            return Ok(Some(BACKOFF));
        };

        let has_payload = frame.info.size > 0 || !frame.is_end_of_stream();
        if self.config.pace_frames && has_payload {
            let ahead = frame.timestamp_us() - self.clock.now();
            if ahead > 0 {
                return Ok(Some(Duration::from_micros(ahead as u64)));
            }
        }

        let Some(frame) = self.pending_frame.take() else {
            return Ok(Some(BACKOFF));
        };
        let end_of_stream = frame.is_end_of_stream();
        if has_payload {
            self.present(frame);
        } else if let Some(session) = self.session.as_mut() {
            session.release_output_frame(frame.slot());
        }

        if end_of_stream {
            info!("{} 🏁 播放完成", log_ctx());
            self.clock.pause();
            self.set_state(PlayerState::Completed);
        }
        Ok(None)
    }

    fn present(&mut self, frame: OutputFrame) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let timestamp_us = frame.timestamp_us();
        self.stats.last_timestamp_us = timestamp_us;

        let rendered = match self.target.filter(|t| t.valid) {
            Some(_) if session.is_surface_mode() => session.render_output_frame(frame),
            Some(target) => {
                let rendered = match self.renderer.render(&frame, &target) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("{} ⚠️ 渲染失败: {}", log_ctx(), e);
                        false
                    }
                };
                session.release_output_frame(frame.slot());
                rendered
            }
            None => {
                // 没有有效表面：帧直接归还
                session.release_output_frame(frame.slot());
                false
            }
        };

        if rendered {
            self.stats.frames_rendered += 1;
            let count = self.stats.frames_rendered;
            if count <= LOG_FIRST_N || count % 100 == 0 {
                info!("{} 🎞️ 第 {} 帧已显示 (pts={}us)", log_ctx(), count, timestamp_us);
            }
        } else {
            self.stats.frames_dropped += 1;
            debug!("{} 丢弃帧 pts={}us", log_ctx(), timestamp_us);
        }
        self.publish();
    }

    fn fail(&mut self, e: PlayerError) {
        error!("{} ❌ 播放出错: {}", log_ctx(), e);
        self.drop_pending_frame();
        self.clock.pause();
        self.set_state(PlayerState::Error);
    }

    fn drop_pending_frame(&mut self) {
        if let Some(frame) = self.pending_frame.take() {
            if let Some(session) = self.session.as_mut() {
                session.release_output_frame(frame.slot());
            }
        }
    }

    fn close_session(&mut self) {
        self.drop_pending_frame();
        self.pending_packet = None;
        self.source_exhausted = false;
        self.end_of_stream_signalled = false;
        if let Some(mut session) = self.session.take() {
            session.release();
        }
        self.source = None;
    }

    fn teardown(&mut self) {
        self.close_session();
        self.publish();
    }
}
