use crate::codec::ownership::OutputFrameOwnership;
use crate::codec::registry::DecoderRegistry;
use crate::codec::service::{DecoderService, InputSlotStatus, OutputSlotStatus};
use crate::core::{
    bounded_wait, BufferFlags, BufferInfo, DecoderState, PlayerError, RenderTarget, Result,
    VideoFormat,
};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// 默认的有界等待上限（微秒）
const DEFAULT_MAX_WAIT_US: i64 = 1_000_000;

/// 已出队的输入槽位
///
/// 只能移动不能复制：提交或丢弃时被消耗，同一下标不会出现两个存活的引用。
#[derive(Debug)]
pub struct InputBuffer {
    index: usize,
    capacity: usize,
    generation: u64,
}

impl InputBuffer {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 一帧解码输出；槽位在 `release_output_frame` / `render_output_frame` 之前归调用方所有
#[derive(Debug)]
pub struct OutputFrame {
    slot: usize,
    pub info: BufferInfo,
    /// 表面模式下为空（数据直接进入绑定的表面）
    pub payload: Vec<u8>,
}

impl OutputFrame {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn timestamp_us(&self) -> i64 {
        self.info.timestamp_us
    }

    pub fn flags(&self) -> BufferFlags {
        self.info.flags
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.info.flags.is_end_of_stream()
    }
}

/// 输入提交结果；`Rejected` 是背压信号，调用方重试即可
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    Accepted,
    Rejected,
    /// 数据超过槽位容量，槽位已归还；重试也不会成功
    Oversized,
}

/// 输出轮询结果
#[derive(Debug)]
pub enum OutputStatus {
    Frame(OutputFrame),
    /// 暂无输出
    TryAgainLater,
    /// 输出格式已变更，先调用 `output_format()` 再继续取帧
    FormatChanged,
}

/// 解码会话：独占一个解码服务实例
///
/// 输入/输出槽位按下标交换；借出的输出槽位记录在 `OutputFrameOwnership` 中。
/// 会话只允许一个调用方（`&mut self`），推送和拉取天然串行。
pub struct DecoderSession {
    registry: Arc<DecoderRegistry>,
    service: Option<Box<dyn DecoderService>>,
    state: DecoderState,
    format: Option<VideoFormat>,
    surface_mode: bool,
    last_buffer_info: BufferInfo,
    ownership: OutputFrameOwnership,
    outstanding_inputs: HashSet<usize>,
    // flush 后递增，旧的 InputBuffer 随之失效
    generation: u64,
    end_of_stream_queued: bool,
    render_target: Option<RenderTarget>,
    max_wait_us: i64,
    max_input_size: Option<usize>,
}

impl DecoderSession {
    pub fn new(registry: Arc<DecoderRegistry>) -> Self {
        Self {
            registry,
            service: None,
            state: DecoderState::Uninitialized,
            format: None,
            surface_mode: false,
            last_buffer_info: BufferInfo::default(),
            ownership: OutputFrameOwnership::new(),
            outstanding_inputs: HashSet::new(),
            generation: 0,
            end_of_stream_queued: false,
            render_target: None,
            max_wait_us: DEFAULT_MAX_WAIT_US,
            max_input_size: None,
        }
    }

    pub fn with_max_wait_us(mut self, max_wait_us: i64) -> Self {
        self.max_wait_us = max_wait_us;
        self
    }

    pub fn with_max_input_size(mut self, max_input_size: Option<usize>) -> Self {
        self.max_input_size = max_input_size;
        self
    }

    /// 创建并配置解码器，成功后状态为 `Flushed`
    pub fn initialize(
        &mut self,
        codec_id: &str,
        width: u32,
        height: u32,
        config_blobs: &[Vec<u8>],
        surface_mode: bool,
    ) -> Result<()> {
        if self.state != DecoderState::Uninitialized {
            warn!("⚠️ 会话已初始化（状态 {:?}），忽略重复的 initialize", self.state);
            return Err(PlayerError::ProtocolViolation(format!(
                "状态 {:?} 下不能 initialize",
                self.state
            )));
        }

        let mut format = VideoFormat::new(codec_id, width, height).with_config_blobs(config_blobs);
        if let Some(size) = self.max_input_size {
            format = format.with_max_input_size(size);
        }
        info!("🎬 初始化解码会话: {} (表面模式: {})", format, surface_mode);
        for (key, blob) in format.csd_entries() {
            debug!("  {} = {} 字节", key, blob.len());
        }

        let mut service = match self.registry.create_decoder(codec_id) {
            Ok(service) => service,
            Err(e) => {
                error!("✗ 无法创建解码器: {}", e);
                self.state = DecoderState::Error;
                return Err(e);
            }
        };

        let surface = if surface_mode {
            self.render_target.filter(|t| t.valid).map(|t| t.surface)
        } else {
            None
        };

        if let Err(e) = service.configure(&format, surface) {
            error!("✗ 解码器配置被拒绝: {}", e);
            service.release();
            self.state = DecoderState::Error;
            return Err(PlayerError::Configuration(e.to_string()));
        }
        self.state = DecoderState::Configured;

        if let Err(e) = service.start() {
            error!("✗ 解码器启动失败: {}", e);
            service.release();
            self.state = DecoderState::Error;
            return Err(PlayerError::Configuration(e.to_string()));
        }

        self.service = Some(service);
        self.format = Some(format);
        self.surface_mode = surface_mode;
        self.state = DecoderState::Flushed;
        info!("✓ 解码会话就绪");
        Ok(())
    }

    /// 出队一个空闲输入槽位；等待时限内没有空闲槽位返回 `BufferTimeout`
    pub fn dequeue_input_buffer(&mut self, timeout_us: i64) -> Result<InputBuffer> {
        if !self.state.is_active() {
            return Err(self.violation(format!("状态 {:?} 下不能出队输入槽位", self.state)));
        }
        if self.end_of_stream_queued {
            return Err(self.violation("已提交 EOS，flush 之前不再接收输入".to_string()));
        }

        let timeout = bounded_wait(timeout_us, self.max_wait_us);
        let status = match self.service.as_mut() {
            Some(service) => service.dequeue_input_slot(timeout),
            None => return Err(PlayerError::ProtocolViolation("解码服务不存在".to_string())),
        };

        match status.map_err(|e| self.service_failure(e))? {
            InputSlotStatus::Slot { index, capacity } => {
                if !self.outstanding_inputs.insert(index) {
                    return Err(self.violation(format!("解码服务重复借出输入槽位 {}", index)));
                }
                Ok(InputBuffer {
                    index,
                    capacity,
                    generation: self.generation,
                })
            }
            InputSlotStatus::TryAgainLater => Err(PlayerError::BufferTimeout),
        }
    }

    /// 填充并提交已出队的输入槽位
    pub fn submit_input_buffer(
        &mut self,
        buffer: InputBuffer,
        data: &[u8],
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<InputStatus> {
        if !self.owns_input(&buffer) {
            warn!("⚠️ 输入槽位 {} 已失效，忽略提交", buffer.index);
            return Ok(InputStatus::Rejected);
        }
        if data.len() > buffer.capacity {
            warn!(
                "⚠️ 输入数据 {} 字节超过槽位容量 {}，丢弃",
                data.len(),
                buffer.capacity
            );
            self.discard_input_buffer(buffer)?;
            return Ok(InputStatus::Oversized);
        }

        let index = buffer.index;
        let Some(service) = self.service.as_mut() else {
            return Ok(InputStatus::Rejected);
        };
        let result = match service.input_buffer(index) {
            Ok(slot) if slot.len() >= data.len() => {
                slot[..data.len()].copy_from_slice(data);
                service.submit_input(index, data.len(), timestamp_us, flags)
            }
            Ok(slot) => Err(PlayerError::ProtocolViolation(format!(
                "输入槽位 {} 实际容量 {} 小于 {}",
                index,
                slot.len(),
                data.len()
            ))),
            Err(e) => Err(e),
        };
        self.outstanding_inputs.remove(&index);
        result.map_err(|e| self.service_failure(e))?;

        if flags.is_end_of_stream() {
            self.end_of_stream_queued = true;
        }
        self.state = DecoderState::Running;
        Ok(InputStatus::Accepted)
    }

    /// 放弃已出队的输入槽位（以空提交归还）
    pub fn discard_input_buffer(&mut self, buffer: InputBuffer) -> Result<()> {
        if !self.owns_input(&buffer) {
            debug!("输入槽位 {} 已失效，无需丢弃", buffer.index);
            return Ok(());
        }
        self.outstanding_inputs.remove(&buffer.index);
        let result = match self.service.as_mut() {
            Some(service) => service.submit_input(buffer.index, 0, 0, BufferFlags::NONE),
            None => return Ok(()),
        };
        result.map_err(|e| self.service_failure(e))
    }

    /// 出队、复制并提交一个输入；没有空闲槽位返回 `Rejected`
    pub fn push_input_buffer(
        &mut self,
        data: &[u8],
        size: usize,
        timestamp_us: i64,
        flags: BufferFlags,
        timeout_us: i64,
    ) -> Result<InputStatus> {
        if size > data.len() {
            warn!("⚠️ 声明大小 {} 超过数据长度 {}", size, data.len());
            return Ok(InputStatus::Rejected);
        }
        match self.dequeue_input_buffer(timeout_us) {
            Ok(buffer) => self.submit_input_buffer(buffer, &data[..size], timestamp_us, flags),
            Err(e) if e.is_recoverable() => Ok(InputStatus::Rejected),
            Err(e) => Err(e),
        }
    }

    /// 提交零长度的 EOS 输入；没有空闲槽位返回 `BufferTimeout`，调用方重试
    pub fn signal_end_of_stream(&mut self) -> Result<()> {
        let buffer = self.dequeue_input_buffer(0)?;
        match self.submit_input_buffer(buffer, &[], 0, BufferFlags::END_OF_STREAM)? {
            InputStatus::Accepted => {
                info!("📭 已提交 EOS");
                Ok(())
            }
            InputStatus::Rejected | InputStatus::Oversized => Err(PlayerError::BufferTimeout),
        }
    }

    /// 有界等待一帧解码输出
    pub fn pull_output_frame(&mut self, timeout_us: i64) -> Result<OutputStatus> {
        if !self.state.is_active() {
            warn!("⚠️ 状态 {:?} 下不能拉取输出", self.state);
            return Ok(OutputStatus::TryAgainLater);
        }

        let timeout = bounded_wait(timeout_us, self.max_wait_us);
        let status = match self.service.as_mut() {
            Some(service) => service.dequeue_output_slot(timeout),
            None => return Ok(OutputStatus::TryAgainLater),
        };

        match status.map_err(|e| self.service_failure(e))? {
            OutputSlotStatus::Slot { index, info } => {
                if let Err(e) = self.ownership.acquire(index) {
                    warn!("⚠️ {}", e);
                    return Ok(OutputStatus::TryAgainLater);
                }
                let fetched = match self.service.as_ref() {
                    Some(service) => service.output_buffer(index).map(|data| data.to_vec()),
                    None => Ok(Vec::new()),
                };
                let payload = match fetched {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.ownership.release(index);
                        return Err(self.service_failure(e));
                    }
                };

                self.last_buffer_info = info;
                if info.flags.is_end_of_stream() {
                    info!("🏁 解码器输出 EOS (pts={})", info.timestamp_us);
                    self.state = DecoderState::EndOfStream;
                }
                Ok(OutputStatus::Frame(OutputFrame {
                    slot: index,
                    info,
                    payload,
                }))
            }
            OutputSlotStatus::FormatChanged => {
                info!("🔄 解码器输出格式变更");
                Ok(OutputStatus::FormatChanged)
            }
            OutputSlotStatus::TryAgainLater => Ok(OutputStatus::TryAgainLater),
        }
    }

    /// 归还输出槽位；重复归还只记录警告并返回 false
    pub fn release_output_frame(&mut self, slot: usize) -> bool {
        self.return_slot(slot, false)
    }

    /// 消耗一帧：表面模式且绑定了有效表面时先渲染到表面，否则直接归还
    pub fn render_output_frame(&mut self, frame: OutputFrame) -> bool {
        let render = self.surface_mode && self.render_target().is_some();
        self.return_slot(frame.slot, render)
    }

    fn return_slot(&mut self, slot: usize, render: bool) -> bool {
        if self.service.is_none() {
            warn!("⚠️ 会话已释放，输出槽位 {} 无需归还", slot);
            return false;
        }
        if !self.ownership.release(slot) {
            return false;
        }
        let result = match self.service.as_mut() {
            Some(service) => service.release_output_slot(slot, render),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("✗ 归还输出槽位 {} 失败: {}", slot, e);
                false
            }
        }
    }

    /// 丢弃解码器内所有在途数据，收回借出的输出槽位
    pub fn flush(&mut self) -> Result<()> {
        if !self.state.is_active() {
            warn!("⚠️ 状态 {:?} 下不能 flush", self.state);
            return Ok(());
        }
        let reclaimed = self.ownership.reclaim_all();
        if !reclaimed.is_empty() {
            debug!("flush 收回输出槽位: {:?}", reclaimed);
        }
        self.outstanding_inputs.clear();
        self.generation += 1;
        self.end_of_stream_queued = false;

        let result = match self.service.as_mut() {
            Some(service) => service.flush(),
            None => return Ok(()),
        };
        result.map_err(|e| self.service_failure(e))?;
        self.state = DecoderState::Flushed;
        Ok(())
    }

    /// 绑定/解绑渲染目标；表面模式下同步到解码服务
    pub fn bind_render_target(&mut self, target: Option<RenderTarget>) -> Result<()> {
        self.render_target = target;
        if !self.surface_mode || !self.state.is_active() {
            return Ok(());
        }
        let surface = target.filter(|t| t.valid).map(|t| t.surface);
        if let Some(service) = self.service.as_mut() {
            if let Err(e) = service.set_output_surface(surface) {
                warn!("⚠️ 切换输出表面失败: {}", e);
            }
        }
        Ok(())
    }

    pub fn resize_render_target(&mut self, width: u32, height: u32) {
        if let Some(target) = self.render_target.as_mut() {
            target.width = width;
            target.height = height;
        }
    }

    /// 当前有效的渲染目标
    pub fn render_target(&self) -> Option<RenderTarget> {
        self.render_target.filter(|t| t.valid)
    }

    /// 重新查询解码服务的输出格式
    pub fn output_format(&mut self) -> Result<VideoFormat> {
        match self.service.as_ref() {
            Some(service) => service.output_format(),
            None => Err(PlayerError::ProtocolViolation("会话未初始化".to_string())),
        }
    }

    /// 停止并释放解码服务；可重复调用
    pub fn release(&mut self) {
        if self.state == DecoderState::Released {
            debug!("会话已释放，忽略");
            return;
        }
        if let Some(mut service) = self.service.take() {
            for slot in self.ownership.reclaim_all() {
                if let Err(e) = service.release_output_slot(slot, false) {
                    debug!("释放时归还槽位 {} 失败: {}", slot, e);
                }
            }
            if let Err(e) = service.stop() {
                warn!("⚠️ 停止解码器失败: {}", e);
            }
            service.release();
        }
        self.outstanding_inputs.clear();
        self.generation += 1;
        self.state = DecoderState::Released;
        info!("🗑️ 解码会话已释放");
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn format(&self) -> Option<&VideoFormat> {
        self.format.as_ref()
    }

    pub fn last_buffer_info(&self) -> BufferInfo {
        self.last_buffer_info
    }

    pub fn is_surface_mode(&self) -> bool {
        self.surface_mode
    }

    /// 只支持同步轮询
    pub fn is_async_mode(&self) -> bool {
        false
    }

    pub fn owned_output_count(&self) -> usize {
        self.ownership.owned_count()
    }

    pub fn decoder_name(&self) -> Option<&str> {
        self.service.as_ref().map(|s| s.name())
    }

    fn owns_input(&self, buffer: &InputBuffer) -> bool {
        buffer.generation == self.generation && self.outstanding_inputs.contains(&buffer.index)
    }

    fn violation(&self, message: String) -> PlayerError {
        warn!("⚠️ 协议违规: {}", message);
        PlayerError::ProtocolViolation(message)
    }

    /// 解码服务报错：协议违规原样返回，其余视为服务故障，会话进入 Error
    fn service_failure(&mut self, e: PlayerError) -> PlayerError {
        match e {
            PlayerError::ProtocolViolation(msg) => self.violation(msg),
            other => {
                error!("✗ 解码服务故障: {}", other);
                self.state = DecoderState::Error;
                PlayerError::UnknownFailure(other.to_string())
            }
        }
    }
}

impl Drop for DecoderSession {
    fn drop(&mut self) {
        self.release();
    }
}
