use crate::codec::service::{DecoderFactory, DecoderService};
use crate::core::{PlayerError, Result};
use log::{debug, info, warn};
use std::sync::Arc;

/// 解码器注册表（按优先级排序）
///
/// 先注册的工厂优先；硬件后端应排在软件回退之前。
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    factories: Vec<Arc<dyn DecoderFactory>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    pub fn register(&mut self, factory: Arc<dyn DecoderFactory>) {
        info!("✓ 注册解码器工厂: {}", factory.name());
        self.factories.push(factory);
    }

    /// 注册为最高优先级
    pub fn register_first(&mut self, factory: Arc<dyn DecoderFactory>) {
        info!("✓ 注册解码器工厂（最高优先级）: {}", factory.name());
        self.factories.insert(0, factory);
    }

    pub fn with_factory(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// 列出支持该编解码器的工厂名称（按优先级）
    pub fn available_for(&self, codec_id: &str) -> Vec<String> {
        self.factories
            .iter()
            .filter(|f| f.supports(codec_id))
            .map(|f| f.name().to_string())
            .collect()
    }

    /// 为编解码器 id 创建解码服务：依次尝试每个支持它的工厂，第一个成功的胜出
    pub fn create_decoder(&self, codec_id: &str) -> Result<Box<dyn DecoderService>> {
        info!("正在为 {} 选择解码器...", codec_id);

        let mut last_error = None;
        for factory in self.factories.iter().filter(|f| f.supports(codec_id)) {
            debug!("尝试解码器工厂: {}", factory.name());
            match factory.create_decoder(codec_id) {
                Ok(decoder) => {
                    info!("✓ 成功创建解码器: {} ({})", decoder.name(), factory.name());
                    return Ok(decoder);
                }
                Err(e) => {
                    warn!("✗ {} 创建失败: {}", factory.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => PlayerError::Configuration(format!("{} 的所有解码器均创建失败: {}", codec_id, e)),
            None => PlayerError::Configuration(format!("没有匹配 {} 的解码器", codec_id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::passthrough::PassthroughFactory;

    struct BrokenFactory;

    impl DecoderFactory for BrokenFactory {
        fn name(&self) -> &str {
            "broken"
        }

        fn supports(&self, _codec_id: &str) -> bool {
            true
        }

        fn create_decoder(&self, codec_id: &str) -> Result<Box<dyn DecoderService>> {
            Err(PlayerError::UnknownFailure(format!("{} 设备不可用", codec_id)))
        }
    }

    #[test]
    fn test_no_matching_decoder() {
        let registry = DecoderRegistry::new().with_factory(Arc::new(PassthroughFactory::default()));
        let err = registry.create_decoder("video/unknown").err().unwrap();
        assert!(matches!(err, PlayerError::Configuration(_)));
    }

    #[test]
    fn test_falls_back_to_next_factory() {
        let registry = DecoderRegistry::new()
            .with_factory(Arc::new(BrokenFactory))
            .with_factory(Arc::new(PassthroughFactory::default()));
        assert_eq!(registry.available_for("video/avc"), vec!["broken", "passthrough"]);
        let decoder = registry.create_decoder("video/avc").unwrap();
        assert_eq!(decoder.name(), "passthrough");
    }

    #[test]
    fn test_register_first_takes_priority() {
        let mut registry = DecoderRegistry::new().with_factory(Arc::new(PassthroughFactory::default()));
        registry.register_first(Arc::new(BrokenFactory));
        assert_eq!(registry.available_for("video/hevc"), vec!["broken", "passthrough"]);
    }

    #[test]
    fn test_all_factories_fail() {
        let registry = DecoderRegistry::new().with_factory(Arc::new(BrokenFactory));
        let err = registry.create_decoder("video/avc").err().unwrap();
        assert!(matches!(err, PlayerError::Configuration(_)));
    }
}
