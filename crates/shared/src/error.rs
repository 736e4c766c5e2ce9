//! 统一错误处理模块
//!
//! 定义各 crate 共享的基础设施错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum PlacementError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== 消息队列错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 序列化错误 ====================
    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, PlacementError>;

impl PlacementError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为瞬时错误
    ///
    /// 通知链路本身不做重试，该标记只用于日志和指标分类。
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Kafka(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = PlacementError::Validation("to 不能为空".to_string());
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.to_string(), "参数验证失败: to 不能为空");
    }

    #[test]
    fn test_is_transient() {
        let db_err = PlacementError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_transient());

        let kafka_err = PlacementError::Kafka("broker down".to_string());
        assert!(kafka_err.is_transient());

        let validation = PlacementError::Validation("bad".to_string());
        assert!(!validation.is_transient());
    }
}
