use crate::core::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放器配置（JSON 文件，所有字段均有默认值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlayerConfig {
    /// 等待输入槽位的时限（微秒）
    pub input_timeout_us: i64,

    /// 等待输出帧的时限（微秒）
    pub output_timeout_us: i64,

    /// 所有有界等待的上限（微秒）
    pub max_wait_us: i64,

    /// 非播放状态下工作线程等待命令的时长（毫秒）
    pub idle_wait_ms: u64,

    /// 解码器直接输出到绑定的渲染表面
    pub surface_mode: bool,

    /// 按播放时钟节奏送帧
    pub pace_frames: bool,

    /// 生成时间戳使用的帧率
    pub frame_rate: f64,

    /// 码流无法提供尺寸时使用的默认宽高
    pub fallback_width: u32,
    pub fallback_height: u32,

    /// 输入槽位容量（为空时取 宽*高）
    pub max_input_size: Option<usize>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            input_timeout_us: 10_000,
            output_timeout_us: 10_000,
            max_wait_us: 1_000_000,
            idle_wait_ms: 20,
            surface_mode: false,
            pace_frames: true,
            frame_rate: 30.0,
            fallback_width: 1280,
            fallback_height: 720,
            max_input_size: None,
        }
    }
}

impl PlayerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        info!("📄 加载配置文件: {}", path.display());
        Ok(config)
    }

    /// 两帧之间的时间间隔（微秒）
    pub fn frame_interval_us(&self) -> i64 {
        if self.frame_rate > 0.0 {
            (1_000_000.0 / self.frame_rate) as i64
        } else {
            33_333
        }
    }

    /// 把调用方给出的等待时长收敛为有界等待：
    /// 非正数退化为立即轮询，超过上限时截断到 `max_wait_us`
    pub fn bounded_wait(&self, timeout_us: i64) -> Duration {
        bounded_wait(timeout_us, self.max_wait_us)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms.max(1))
    }
}

pub fn bounded_wait(timeout_us: i64, max_wait_us: i64) -> Duration {
    if timeout_us <= 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(timeout_us.min(max_wait_us.max(0)) as u64)
}
