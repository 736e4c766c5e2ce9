//! 邮件 worker
//!
//! 从邮件队列消费通知分发引擎投递的 `{to, subject, text}` 任务并实际发信。
//! 每条消息至多发送一次，失败不重试。

pub mod consumer;
pub mod error;
pub mod sender;
