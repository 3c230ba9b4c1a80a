use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// `state_code()` 在播放器尚未 prepare 时返回的哨兵值，不对应任何有效状态
pub const STATE_UNAVAILABLE: i32 = -1;

/// 播放器状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    #[default]
    Init,       // 初始状态（尚未 prepare）
    Prepared,   // 已准备好
    Playing,    // 正在播放
    Seeking,    // 跳转中
    Paused,     // 已暂停
    Stopped,    // 已停止
    Completed,  // 播放完成
    Error,      // 错误状态
}

impl PlayerState {
    /// 稳定的整数编码（供跨语言 / UI 层使用）
    pub fn code(&self) -> i32 {
        match self {
            PlayerState::Init => 0,
            PlayerState::Prepared => 1,
            PlayerState::Playing => 2,
            PlayerState::Seeking => 3,
            PlayerState::Paused => 4,
            PlayerState::Stopped => 5,
            PlayerState::Completed => 6,
            PlayerState::Error => 7,
        }
    }

    /// 是否允许执行 prepare
    pub fn can_prepare(&self) -> bool {
        matches!(
            self,
            PlayerState::Init | PlayerState::Stopped | PlayerState::Completed | PlayerState::Error
        )
    }

    /// 是否持有可被 stop 的解码会话
    pub fn can_stop(&self) -> bool {
        matches!(
            self,
            PlayerState::Prepared
                | PlayerState::Playing
                | PlayerState::Seeking
                | PlayerState::Paused
                | PlayerState::Completed
        )
    }
}

/// 解码会话状态
///
/// `Uninitialized → Configured → Flushed ⇄ Running → EndOfStream`，
/// 任意状态都可以进入 `Error`，`Released` 是终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoderState {
    Uninitialized,
    Configured,
    Flushed,
    Running,
    EndOfStream,
    Error,
    Released,
}

impl DecoderState {
    /// 可以交换缓冲区的状态
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DecoderState::Flushed | DecoderState::Running | DecoderState::EndOfStream
        )
    }
}

/// 缓冲区标志位（取值与平台编解码服务一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(2);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(4);
    pub const PARTIAL_FRAME: BufferFlags = BufferFlags(8);

    pub fn from_bits(bits: u32) -> Self {
        BufferFlags(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: BufferFlags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_key_frame(&self) -> bool {
        self.contains(BufferFlags::KEY_FRAME)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.contains(BufferFlags::END_OF_STREAM)
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: BufferFlags) {
        self.0 |= rhs.0;
    }
}

/// 最近一次输出缓冲区的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferInfo {
    pub timestamp_us: i64,  // 显示时间戳（微秒）
    pub size: usize,        // 有效负载大小
    pub flags: BufferFlags,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    YUV420Flexible,
    NV12,
    /// 解码器直接输出到绑定的渲染表面
    Surface,
}

/// 解码格式描述（编解码器 id、尺寸、编解码特定数据）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub codec_id: String,
    pub width: u32,
    pub height: u32,
    /// 编解码特定数据（如 SPS / PPS），按下标对应 `csd-0`、`csd-1` ...
    pub config_blobs: Vec<Vec<u8>>,
    pub max_input_size: usize,
    pub pixel_format: PixelFormat,
}

impl VideoFormat {
    pub fn new(codec_id: &str, width: u32, height: u32) -> Self {
        Self {
            codec_id: codec_id.to_string(),
            width,
            height,
            config_blobs: Vec::new(),
            max_input_size: (width as usize) * (height as usize),
            pixel_format: PixelFormat::YUV420Flexible,
        }
    }

    pub fn with_config_blobs(mut self, blobs: &[Vec<u8>]) -> Self {
        self.config_blobs = blobs.to_vec();
        self
    }

    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = size;
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// 按下标顺序列出非空的编解码特定数据（空数据跳过，但保留原下标）
    pub fn csd_entries(&self) -> impl Iterator<Item = (String, &[u8])> + '_ {
        self.config_blobs
            .iter()
            .enumerate()
            .filter(|(_, blob)| !blob.is_empty())
            .map(|(i, blob)| (format!("csd-{}", i), blob.as_slice()))
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} ({:?}, csd={}, max_input={})",
            self.codec_id,
            self.width,
            self.height,
            self.pixel_format,
            self.config_blobs.len(),
            self.max_input_size
        )
    }
}

/// 平台渲染表面的不透明引用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceHandle(pub u64);

/// 渲染目标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderTarget {
    pub surface: SurfaceHandle,
    pub width: u32,
    pub height: u32,
    pub valid: bool,
}

impl RenderTarget {
    pub fn new(surface: SurfaceHandle, width: u32, height: u32) -> Self {
        Self {
            surface,
            width,
            height,
            valid: true,
        }
    }
}

/// 渲染表面生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Created(RenderTarget),
    Resized { width: u32, height: u32 },
    Destroyed,
}

/// 编码数据包（由外部解封装器产生）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub timestamp_us: i64,
    pub flags: BufferFlags,
}

/// 码流信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub codec_id: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub config_blobs: Vec<Vec<u8>>,
    pub duration_us: Option<i64>,
}

/// 播放统计（用于监控和调试）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackStats {
    /// 已送往渲染器的帧数
    pub frames_rendered: u64,

    /// 因渲染目标无效而丢弃的帧数
    pub frames_dropped: u64,

    /// 输入槽位不可用被拒绝的次数（背压）
    pub input_rejections: u64,

    /// 输出格式变更次数
    pub format_changes: u64,

    /// 超过输入槽位容量被丢弃的输入包数
    pub packets_oversized: u64,

    /// 最近一帧的显示时间戳（微秒）
    pub last_timestamp_us: i64,
}
