use crate::codec::service::{DecoderFactory, DecoderService, InputSlotStatus, OutputSlotStatus};
use crate::core::{BufferFlags, BufferInfo, PixelFormat, PlayerError, Result, SurfaceHandle, VideoFormat};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// 直通解码器参数
#[derive(Debug, Clone)]
pub struct PassthroughOptions {
    pub input_slots: usize,
    pub output_slots: usize,
    /// 解码流水线延迟：保留这么多个输入后才开始输出（EOS 到达后全部排出）
    pub latency: usize,
    pub codecs: Vec<String>,
    /// 输出首帧前先报告一次格式变更
    pub emit_format_change: bool,
    /// 模拟平台拒绝配置
    pub fail_configure: bool,
    /// 输出这么多帧之后模拟服务故障
    pub fail_after_outputs: Option<u64>,
}

impl Default for PassthroughOptions {
    fn default() -> Self {
        Self {
            input_slots: 4,
            output_slots: 4,
            latency: 0,
            codecs: vec![
                "video/avc".to_string(),
                "video/hevc".to_string(),
                "video/x-vnd.on2.vp8".to_string(),
                "video/x-vnd.on2.vp9".to_string(),
                "video/av01".to_string(),
            ],
            emit_format_change: true,
            fail_configure: false,
            fail_after_outputs: None,
        }
    }
}

/// 解码服务侧计数（测试和诊断用）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeCounters {
    pub created: u64,
    pub submitted: u64,
    pub end_of_stream_submitted: u64,
    pub frames_output: u64,
    pub slots_released: u64,
    pub frames_rendered: u64,
    pub flushes: u64,
    pub service_releases: u64,
    pub surface: Option<SurfaceHandle>,
}

/// 同一工厂创建的所有直通解码器共享的计数器
#[derive(Debug, Clone, Default)]
pub struct PassthroughProbe {
    inner: Arc<Mutex<ProbeCounters>>,
}

impl PassthroughProbe {
    pub fn snapshot(&self) -> ProbeCounters {
        self.inner.lock().clone()
    }

    fn update<F: FnOnce(&mut ProbeCounters)>(&self, f: F) {
        f(&mut self.inner.lock());
    }
}

/// 已提交、尚未输出的输入：槽位在输出前一直归解码器所有
struct PendingInput {
    slot: usize,
    size: usize,
    timestamp_us: i64,
    flags: BufferFlags,
}

/// 纯软件直通解码器：把提交的数据原样作为"解码输出"
///
/// 槽位池、格式变更、EOS、输出槽位耗尽时的饥饿行为都与硬件解码服务一致，
/// 用于在没有硬件的环境中驱动完整的缓冲区交换协议。
pub struct PassthroughDecoder {
    options: PassthroughOptions,
    probe: PassthroughProbe,
    format: Option<VideoFormat>,
    surface: Option<SurfaceHandle>,
    started: bool,
    released: bool,
    input_pool: Vec<Vec<u8>>,
    input_lent: Vec<bool>,
    free_inputs: VecDeque<usize>,
    pending: VecDeque<PendingInput>,
    output_pool: Vec<Vec<u8>>,
    output_lent: Vec<bool>,
    format_change_pending: bool,
    outputs: u64,
}

impl PassthroughDecoder {
    pub fn new(options: PassthroughOptions, probe: PassthroughProbe) -> Self {
        probe.update(|c| c.created += 1);
        Self {
            options,
            probe,
            format: None,
            surface: None,
            started: false,
            released: false,
            input_pool: Vec::new(),
            input_lent: Vec::new(),
            free_inputs: VecDeque::new(),
            pending: VecDeque::new(),
            output_pool: Vec::new(),
            output_lent: Vec::new(),
            format_change_pending: false,
            outputs: 0,
        }
    }

    fn ensure_started(&self) -> Result<()> {
        if self.released {
            return Err(PlayerError::UnknownFailure("解码器已释放".to_string()));
        }
        if !self.started {
            return Err(PlayerError::UnknownFailure("解码器未启动".to_string()));
        }
        Ok(())
    }

    fn reset_pools(&mut self) {
        self.pending.clear();
        self.free_inputs = (0..self.input_pool.len()).collect();
        self.input_lent.iter_mut().for_each(|lent| *lent = false);
        self.output_lent.iter_mut().for_each(|lent| *lent = false);
    }

    fn output_ready(&self) -> bool {
        let draining = self.pending.iter().any(|p| p.flags.is_end_of_stream());
        !self.pending.is_empty() && (draining || self.pending.len() > self.options.latency)
    }
}

impl DecoderService for PassthroughDecoder {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn configure(&mut self, format: &VideoFormat, surface: Option<SurfaceHandle>) -> Result<()> {
        if self.options.fail_configure {
            return Err(PlayerError::Configuration(format!("平台拒绝配置: {}", format)));
        }
        if format.width == 0 || format.height == 0 || format.max_input_size == 0 {
            return Err(PlayerError::Configuration(format!("无效的格式: {}", format)));
        }

        self.input_pool = vec![vec![0u8; format.max_input_size]; self.options.input_slots];
        self.input_lent = vec![false; self.options.input_slots];
        self.output_pool = vec![Vec::new(); self.options.output_slots];
        self.output_lent = vec![false; self.options.output_slots];
        self.reset_pools();

        self.format = Some(format.clone());
        self.set_output_surface(surface)?;
        self.format_change_pending = self.options.emit_format_change;

        debug!(
            "直通解码器配置完成: {}, 输入槽位 {}, 输出槽位 {}",
            format, self.options.input_slots, self.options.output_slots
        );
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.format.is_none() {
            return Err(PlayerError::Configuration("启动前未配置".to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn dequeue_input_slot(&mut self, _timeout: Duration) -> Result<InputSlotStatus> {
        self.ensure_started()?;
        match self.free_inputs.pop_front() {
            Some(index) => {
                self.input_lent[index] = true;
                Ok(InputSlotStatus::Slot {
                    index,
                    capacity: self.input_pool[index].len(),
                })
            }
            None => Ok(InputSlotStatus::TryAgainLater),
        }
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        self.ensure_started()?;
        if !self.input_lent.get(index).copied().unwrap_or(false) {
            return Err(PlayerError::ProtocolViolation(format!("输入槽位 {} 未出队", index)));
        }
        Ok(self.input_pool[index].as_mut_slice())
    }

    fn submit_input(
        &mut self,
        index: usize,
        size: usize,
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        self.ensure_started()?;
        if !self.input_lent.get(index).copied().unwrap_or(false) {
            return Err(PlayerError::ProtocolViolation(format!("输入槽位 {} 未出队", index)));
        }
        if size > self.input_pool[index].len() {
            return Err(PlayerError::ProtocolViolation(format!(
                "输入大小 {} 超过槽位容量 {}",
                size,
                self.input_pool[index].len()
            )));
        }

        self.input_lent[index] = false;
        if size == 0 && !flags.is_end_of_stream() {
            // 空提交：调用方放弃了该槽位，直接回收
            self.free_inputs.push_back(index);
            return Ok(());
        }
        self.pending.push_back(PendingInput {
            slot: index,
            size,
            timestamp_us,
            flags,
        });

        self.probe.update(|c| {
            c.submitted += 1;
            if flags.is_end_of_stream() {
                c.end_of_stream_submitted += 1;
            }
        });
        Ok(())
    }

    fn dequeue_output_slot(&mut self, _timeout: Duration) -> Result<OutputSlotStatus> {
        self.ensure_started()?;
        if self.options.fail_after_outputs.map_or(false, |n| self.outputs >= n) {
            return Err(PlayerError::UnknownFailure("模拟的解码服务故障".to_string()));
        }
        if !self.output_ready() {
            return Ok(OutputSlotStatus::TryAgainLater);
        }
        if self.format_change_pending {
            self.format_change_pending = false;
            return Ok(OutputSlotStatus::FormatChanged);
        }

        let Some(index) = self.output_lent.iter().position(|lent| !lent) else {
            // 所有输出槽位都借出去了：解码器饥饿
            return Ok(OutputSlotStatus::TryAgainLater);
        };
        let Some(input) = self.pending.pop_front() else {
            return Ok(OutputSlotStatus::TryAgainLater);
        };

        let info = BufferInfo {
            timestamp_us: input.timestamp_us,
            size: input.size,
            flags: input.flags,
        };
        self.output_pool[index] = self.input_pool[input.slot][..input.size].to_vec();
        self.output_lent[index] = true;
        self.free_inputs.push_back(input.slot);
        self.outputs += 1;
        self.probe.update(|c| c.frames_output += 1);

        Ok(OutputSlotStatus::Slot { index, info })
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        if !self.output_lent.get(index).copied().unwrap_or(false) {
            return Err(PlayerError::ProtocolViolation(format!("输出槽位 {} 未借出", index)));
        }
        Ok(self.output_pool[index].as_slice())
    }

    fn output_format(&self) -> Result<VideoFormat> {
        let format = self
            .format
            .clone()
            .ok_or_else(|| PlayerError::UnknownFailure("解码器未配置".to_string()))?;
        let pixel_format = if self.surface.is_some() {
            PixelFormat::Surface
        } else {
            PixelFormat::YUV420Flexible
        };
        Ok(format.with_pixel_format(pixel_format))
    }

    fn release_output_slot(&mut self, index: usize, render: bool) -> Result<()> {
        if !self.output_lent.get(index).copied().unwrap_or(false) {
            return Err(PlayerError::ProtocolViolation(format!("输出槽位 {} 未借出", index)));
        }
        self.output_lent[index] = false;
        self.output_pool[index].clear();
        let rendered = render && self.surface.is_some();
        self.probe.update(|c| {
            c.slots_released += 1;
            if rendered {
                c.frames_rendered += 1;
            }
        });
        Ok(())
    }

    fn set_output_surface(&mut self, surface: Option<SurfaceHandle>) -> Result<()> {
        self.surface = surface;
        self.probe.update(|c| c.surface = surface);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_started()?;
        self.reset_pools();
        self.probe.update(|c| c.flushes += 1);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        self.reset_pools();
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.started = false;
        self.input_pool.clear();
        self.output_pool.clear();
        self.probe.update(|c| c.service_releases += 1);
        info!("🗑️ 直通解码器已释放");
    }
}

/// 直通解码器工厂
#[derive(Clone, Default)]
pub struct PassthroughFactory {
    options: PassthroughOptions,
    probe: PassthroughProbe,
}

impl PassthroughFactory {
    pub fn new(options: PassthroughOptions) -> Self {
        Self {
            options,
            probe: PassthroughProbe::default(),
        }
    }

    pub fn probe(&self) -> PassthroughProbe {
        self.probe.clone()
    }
}

impl DecoderFactory for PassthroughFactory {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn supports(&self, codec_id: &str) -> bool {
        self.options.codecs.iter().any(|c| c == codec_id)
    }

    fn create_decoder(&self, codec_id: &str) -> Result<Box<dyn DecoderService>> {
        if !self.supports(codec_id) {
            return Err(PlayerError::Configuration(format!("直通解码器不支持 {}", codec_id)));
        }
        Ok(Box::new(PassthroughDecoder::new(
            self.options.clone(),
            self.probe.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(options: PassthroughOptions) -> PassthroughDecoder {
        let mut decoder = PassthroughDecoder::new(options, PassthroughProbe::default());
        let format = VideoFormat::new("video/avc", 16, 16);
        decoder.configure(&format, None).unwrap();
        decoder.start().unwrap();
        decoder
    }

    fn submit(decoder: &mut PassthroughDecoder, payload: &[u8], ts: i64, flags: BufferFlags) {
        let InputSlotStatus::Slot { index, .. } = decoder.dequeue_input_slot(Duration::ZERO).unwrap() else {
            panic!("no input slot");
        };
        decoder.input_buffer(index).unwrap()[..payload.len()].copy_from_slice(payload);
        decoder.submit_input(index, payload.len(), ts, flags).unwrap();
    }

    #[test]
    fn test_format_change_precedes_first_frame() {
        let mut decoder = started(PassthroughOptions::default());
        assert_eq!(decoder.dequeue_output_slot(Duration::ZERO).unwrap(), OutputSlotStatus::TryAgainLater);

        submit(&mut decoder, &[1, 2, 3], 100, BufferFlags::KEY_FRAME);
        assert_eq!(decoder.dequeue_output_slot(Duration::ZERO).unwrap(), OutputSlotStatus::FormatChanged);
        match decoder.dequeue_output_slot(Duration::ZERO).unwrap() {
            OutputSlotStatus::Slot { index, info } => {
                assert_eq!(info.timestamp_us, 100);
                assert_eq!(decoder.output_buffer(index).unwrap(), &[1, 2, 3]);
                decoder.release_output_slot(index, false).unwrap();
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_output_starves_when_all_slots_lent() {
        let options = PassthroughOptions {
            output_slots: 1,
            emit_format_change: false,
            ..Default::default()
        };
        let mut decoder = started(options);
        submit(&mut decoder, &[1], 0, BufferFlags::NONE);
        submit(&mut decoder, &[2], 1, BufferFlags::NONE);

        let OutputSlotStatus::Slot { index, .. } = decoder.dequeue_output_slot(Duration::ZERO).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(decoder.dequeue_output_slot(Duration::ZERO).unwrap(), OutputSlotStatus::TryAgainLater);
        decoder.release_output_slot(index, false).unwrap();
        assert!(matches!(
            decoder.dequeue_output_slot(Duration::ZERO).unwrap(),
            OutputSlotStatus::Slot { .. }
        ));
    }

    #[test]
    fn test_latency_drains_on_end_of_stream() {
        let options = PassthroughOptions {
            latency: 2,
            emit_format_change: false,
            ..Default::default()
        };
        let mut decoder = started(options);
        submit(&mut decoder, &[1], 0, BufferFlags::NONE);
        assert_eq!(decoder.dequeue_output_slot(Duration::ZERO).unwrap(), OutputSlotStatus::TryAgainLater);
        submit(&mut decoder, &[], 0, BufferFlags::END_OF_STREAM);
        assert!(matches!(
            decoder.dequeue_output_slot(Duration::ZERO).unwrap(),
            OutputSlotStatus::Slot { .. }
        ));
    }

    #[test]
    fn test_input_slots_held_until_output() {
        let mut decoder = started(PassthroughOptions {
            input_slots: 2,
            emit_format_change: false,
            ..Default::default()
        });
        submit(&mut decoder, &[1], 0, BufferFlags::NONE);
        submit(&mut decoder, &[2], 1, BufferFlags::NONE);
        assert_eq!(decoder.dequeue_input_slot(Duration::ZERO).unwrap(), InputSlotStatus::TryAgainLater);

        let OutputSlotStatus::Slot { index, .. } = decoder.dequeue_output_slot(Duration::ZERO).unwrap() else {
            panic!("expected a frame");
        };
        decoder.release_output_slot(index, false).unwrap();
        assert!(matches!(
            decoder.dequeue_input_slot(Duration::ZERO).unwrap(),
            InputSlotStatus::Slot { .. }
        ));
    }

    #[test]
    fn test_empty_submission_returns_slot() {
        let mut decoder = started(PassthroughOptions {
            input_slots: 1,
            emit_format_change: false,
            ..Default::default()
        });
        submit(&mut decoder, &[], 0, BufferFlags::NONE);
        assert_eq!(decoder.dequeue_output_slot(Duration::ZERO).unwrap(), OutputSlotStatus::TryAgainLater);
        assert!(matches!(
            decoder.dequeue_input_slot(Duration::ZERO).unwrap(),
            InputSlotStatus::Slot { .. }
        ));
    }

    #[test]
    fn test_double_release_rejected_by_service() {
        let mut decoder = started(PassthroughOptions {
            emit_format_change: false,
            ..Default::default()
        });
        submit(&mut decoder, &[9], 0, BufferFlags::NONE);
        let OutputSlotStatus::Slot { index, .. } = decoder.dequeue_output_slot(Duration::ZERO).unwrap() else {
            panic!("expected a frame");
        };
        decoder.release_output_slot(index, false).unwrap();
        assert!(decoder.release_output_slot(index, false).is_err());
    }

    #[test]
    fn test_simulated_service_failure() {
        let mut decoder = started(PassthroughOptions {
            emit_format_change: false,
            fail_after_outputs: Some(1),
            ..Default::default()
        });
        submit(&mut decoder, &[1], 0, BufferFlags::NONE);
        submit(&mut decoder, &[2], 1, BufferFlags::NONE);
        assert!(matches!(
            decoder.dequeue_output_slot(Duration::ZERO).unwrap(),
            OutputSlotStatus::Slot { .. }
        ));
        assert!(matches!(
            decoder.dequeue_output_slot(Duration::ZERO),
            Err(PlayerError::UnknownFailure(_))
        ));
    }

    #[test]
    fn test_configure_failure() {
        let mut decoder = PassthroughDecoder::new(
            PassthroughOptions {
                fail_configure: true,
                ..Default::default()
            },
            PassthroughProbe::default(),
        );
        let err = decoder.configure(&VideoFormat::new("video/avc", 16, 16), None).unwrap_err();
        assert!(matches!(err, PlayerError::Configuration(_)));
    }
}
