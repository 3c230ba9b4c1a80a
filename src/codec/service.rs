use crate::core::{BufferFlags, BufferInfo, Result, SurfaceHandle, VideoFormat};
use std::time::Duration;

/// 输入槽位出队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSlotStatus {
    /// 获得一个空闲槽位
    Slot { index: usize, capacity: usize },
    /// 等待时限内没有空闲槽位
    TryAgainLater,
}

/// 输出槽位出队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSlotStatus {
    /// 一帧解码完成，槽位借给调用方
    Slot { index: usize, info: BufferInfo },
    /// 暂无输出
    TryAgainLater,
    /// 输出格式变更，调用方需要重新查询 `output_format()`
    FormatChanged,
}

/// 硬件解码服务抽象接口
///
/// 槽位按下标在调用方与解码器之间交换，不复制缓冲区本身。
/// 所有等待都是有界的，实现方不得阻塞超过给定的 `timeout`。
pub trait DecoderService: Send {
    /// 解码器名称（用于日志）
    fn name(&self) -> &str;

    fn configure(&mut self, format: &VideoFormat, surface: Option<SurfaceHandle>) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn dequeue_input_slot(&mut self, timeout: Duration) -> Result<InputSlotStatus>;

    /// 已出队输入槽位的可写区域
    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]>;

    fn submit_input(
        &mut self,
        index: usize,
        size: usize,
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    fn dequeue_output_slot(&mut self, timeout: Duration) -> Result<OutputSlotStatus>;

    /// 已出队输出槽位的解码数据（表面模式下可能为空）
    fn output_buffer(&self, index: usize) -> Result<&[u8]>;

    /// 当前生效的输出格式
    fn output_format(&self) -> Result<VideoFormat>;

    /// 归还输出槽位；`render` 为真时先把该帧送到绑定的表面
    fn release_output_slot(&mut self, index: usize, render: bool) -> Result<()>;

    fn set_output_surface(&mut self, surface: Option<SurfaceHandle>) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);
}

/// 解码器工厂：为给定编解码器 id 创建解码服务
pub trait DecoderFactory: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, codec_id: &str) -> bool;

    fn create_decoder(&self, codec_id: &str) -> Result<Box<dyn DecoderService>>;
}
