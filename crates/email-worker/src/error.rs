//! 邮件 worker 错误类型
//!
//! 消息格式错误与发送失败分开，前者直接丢弃，后者记录日志并计数。

use placement_shared::error::PlacementError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("邮件消息反序列化失败: {0}")]
    DeserializationFailed(String),

    #[error("邮件消息无效: {0}")]
    InvalidMessage(String),

    #[error("邮件发送失败: {0}")]
    SendFailed(String),

    #[error(transparent)]
    Shared(#[from] PlacementError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkerError::InvalidMessage("收件人邮箱为空".to_string());
        assert_eq!(err.to_string(), "邮件消息无效: 收件人邮箱为空");

        let err = WorkerError::SendFailed("status 500".to_string());
        assert_eq!(err.to_string(), "邮件发送失败: status 500");
    }
}
