//! 共享库
//!
//! 包含通知分发引擎与邮件 worker 共用的配置、错误处理、数据库连接、Kafka
//! 以及可观测性基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod kafka;
pub mod observability;
