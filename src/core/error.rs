use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    /// 解码器 / 格式配置被拒绝（对会话是致命的）
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 在等待时限内没有可用的槽位或帧（调用方重试即可）
    #[error("缓冲区等待超时")]
    BufferTimeout,

    /// 槽位重复获取/释放，或向未初始化的会话发送命令
    #[error("协议违规: {0}")]
    ProtocolViolation(String),

    /// 平台解码服务的意外失败
    #[error("未知故障: {0}")]
    UnknownFailure(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置文件解析失败: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("图像解码失败: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("纹理错误: {0}")]
    Texture(String),

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl PlayerError {
    /// 可恢复错误：由重试循环内部消化，不向上传播
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PlayerError::BufferTimeout | PlayerError::ProtocolViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(PlayerError::BufferTimeout.is_recoverable());
        assert!(PlayerError::ProtocolViolation("重复释放".into()).is_recoverable());
        assert!(!PlayerError::Configuration("no decoder".into()).is_recoverable());
        assert!(!PlayerError::UnknownFailure("dead".into()).is_recoverable());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PlayerError = io.into();
        assert!(matches!(err, PlayerError::IoError(_)));
    }
}
