// 编码数据源：解封装在外部完成，这里只定义边界和两个内置实现

pub mod annexb;
pub mod synthetic;

pub use annexb::AnnexBSource;
pub use synthetic::SyntheticSource;

use crate::core::{EncodedPacket, PlayerConfig, PlayerError, Result, StreamInfo};
use log::info;
use std::path::PathBuf;

/// 编码数据包来源抽象接口
///
/// 不同的来源（合成数据、裸码流文件、外部解封装器）实现这个接口，
/// 播放工作线程只通过它取包。
pub trait PacketSource: Send {
    /// 流信息（编解码器、尺寸、配置数据）
    fn stream_info(&self) -> &StreamInfo;

    /// 读取下一个数据包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达流末尾
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<Option<EncodedPacket>>;

    /// Seek 到指定位置（微秒），落在不晚于该位置的关键帧上
    fn seek(&mut self, timestamp_us: i64) -> Result<()>;

    fn is_seekable(&self) -> bool {
        true
    }

    /// 描述信息（用于日志）
    fn description(&self) -> String;
}

/// 把 `prepare(source_path)` 的路径解析成数据源
pub trait SourceOpener: Send + Sync {
    fn open(&self, locator: &str, config: &PlayerConfig) -> Result<Box<dyn PacketSource>>;
}

/// 数据源定位符
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// `synthetic:<codec>?frames=N&width=W&height=H`
    Synthetic {
        codec_id: String,
        frames: Option<u64>,
        width: Option<u32>,
        height: Option<u32>,
    },
    /// H.264 Annex-B 裸码流文件
    AnnexB(PathBuf),
}

impl SourceLocator {
    /// 从路径字符串解析定位符
    pub fn parse(locator: &str) -> Result<Self> {
        if let Some(rest) = locator.strip_prefix("synthetic:") {
            return Self::parse_synthetic(rest);
        }

        let lower = locator.to_ascii_lowercase();
        if lower.ends_with(".h264") || lower.ends_with(".264") || lower.ends_with(".avc") {
            Ok(SourceLocator::AnnexB(PathBuf::from(locator)))
        } else {
            Err(PlayerError::Configuration(format!(
                "不支持的数据源: {}（容器解析需要外部解封装器）",
                locator
            )))
        }
    }

    fn parse_synthetic(rest: &str) -> Result<Self> {
        let (codec, query) = match rest.split_once('?') {
            Some((codec, query)) => (codec, Some(query)),
            None => (rest, None),
        };
        if codec.is_empty() {
            return Err(PlayerError::Configuration("合成数据源缺少编解码器".to_string()));
        }

        let mut frames = None;
        let mut width = None;
        let mut height = None;
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| PlayerError::Configuration(format!("无效的参数: {}", pair)))?;
            let invalid = || PlayerError::Configuration(format!("无效的参数值: {}", pair));
            match key {
                "frames" => frames = Some(value.parse().map_err(|_| invalid())?),
                "width" => width = Some(value.parse().map_err(|_| invalid())?),
                "height" => height = Some(value.parse().map_err(|_| invalid())?),
                other => {
                    return Err(PlayerError::Configuration(format!("未知参数: {}", other)));
                }
            }
        }

        Ok(SourceLocator::Synthetic {
            codec_id: codec_mime(codec),
            frames,
            width,
            height,
        })
    }
}

/// 简写编解码器名映射到 mime 类型；已经是 mime 的原样返回
pub fn codec_mime(codec: &str) -> String {
    match codec {
        "avc" | "h264" => "video/avc".to_string(),
        "hevc" | "h265" => "video/hevc".to_string(),
        "vp8" => "video/x-vnd.on2.vp8".to_string(),
        "vp9" => "video/x-vnd.on2.vp9".to_string(),
        "av1" | "av01" => "video/av01".to_string(),
        other if other.contains('/') => other.to_string(),
        other => format!("video/{}", other),
    }
}

/// 内置数据源打开器
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSourceOpener;

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, locator: &str, config: &PlayerConfig) -> Result<Box<dyn PacketSource>> {
        let source: Box<dyn PacketSource> = match SourceLocator::parse(locator)? {
            SourceLocator::Synthetic {
                codec_id,
                frames,
                width,
                height,
            } => Box::new(SyntheticSource::new(
                &codec_id,
                frames.unwrap_or(synthetic::DEFAULT_FRAMES),
                width.unwrap_or(config.fallback_width),
                height.unwrap_or(config.fallback_height),
                config.frame_interval_us(),
            )),
            SourceLocator::AnnexB(path) => Box::new(AnnexBSource::open(&path, config.frame_interval_us())?),
        };
        info!("📁 打开数据源: {}", source.description());
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_synthetic_locator() {
        let locator = SourceLocator::parse("synthetic:hevc?frames=12&width=320&height=240").unwrap();
        assert_eq!(
            locator,
            SourceLocator::Synthetic {
                codec_id: "video/hevc".to_string(),
                frames: Some(12),
                width: Some(320),
                height: Some(240),
            }
        );

        let locator = SourceLocator::parse("synthetic:avc").unwrap();
        assert!(matches!(locator, SourceLocator::Synthetic { frames: None, .. }));
    }

    #[test]
    fn test_parse_rejects_bad_locators() {
        for bad in ["clip.mp4", "synthetic:", "synthetic:avc?frames=x", "synthetic:avc?fps=30"] {
            let err = SourceLocator::parse(bad).unwrap_err();
            assert!(matches!(err, PlayerError::Configuration(_)), "{}", bad);
        }
    }

    #[test]
    fn test_parse_annexb_locator() {
        assert_eq!(
            SourceLocator::parse("/tmp/Clip.H264").unwrap(),
            SourceLocator::AnnexB(PathBuf::from("/tmp/Clip.H264"))
        );
    }

    #[test]
    fn test_default_opener_uses_fallback_dimensions() {
        let config = PlayerConfig::default();
        let source = DefaultSourceOpener.open("synthetic:vp9?frames=3", &config).unwrap();
        let info = source.stream_info();
        assert_eq!(info.codec_id, "video/x-vnd.on2.vp9");
        assert_eq!(info.width, Some(config.fallback_width));
        assert_eq!(info.height, Some(config.fallback_height));
    }
}
