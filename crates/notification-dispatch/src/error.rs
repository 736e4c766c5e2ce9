//! 通知分发错误类型
//!
//! 渠道内部的失败大多在适配器边界被吞掉，只有收件人解析失败、
//! 存储读写失败会以错误的形式返回给调用方。

use placement_shared::error::PlacementError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("队列错误: {0}")]
    Queue(String),

    #[error("推送网关错误: {0}")]
    PushGateway(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error(transparent)]
    Shared(#[from] PlacementError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    /// 获取错误码，用于日志和指标标签
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::PushGateway(_) => "PUSH_GATEWAY_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Shared(e) => e.code(),
        }
    }

    /// 是否为瞬时错误（只用于日志分类，分发链路不重试）
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(_) | Self::Queue(_) | Self::PushGateway(_) => true,
            Self::Shared(e) => e.is_transient(),
            Self::Serialization(_) | Self::Validation(_) | Self::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::PushGateway("status 503".to_string());
        assert_eq!(err.to_string(), "推送网关错误: status 503");
        assert_eq!(err.code(), "PUSH_GATEWAY_ERROR");
    }

    #[test]
    fn test_shared_error_is_transparent() {
        let err: DispatchError = PlacementError::Kafka("broker down".to_string()).into();
        assert_eq!(err.to_string(), "Kafka 错误: broker down");
        assert_eq!(err.code(), "KAFKA_ERROR");
        assert!(err.is_transient());
    }

    #[test]
    fn test_validation_is_not_transient() {
        let err = DispatchError::Validation("subject 不能为空".to_string());
        assert!(!err.is_transient());
        assert!(DispatchError::Queue("closed".to_string()).is_transient());
    }
}
