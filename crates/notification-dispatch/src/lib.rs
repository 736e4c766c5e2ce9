//! 通知分发引擎
//!
//! 将一条逻辑通知投递到站内信、邮件队列和移动推送三个互相独立的渠道，
//! 并支持对全体用户分页广播公告。
//!
//! ## 模块结构
//!
//! - `dispatcher`: 通知分发入口，各渠道并发投递、互相隔离
//! - `announcement`: 全员公告游标分页广播
//! - `channels`: 邮件与推送渠道适配器、推送网关客户端
//! - `queue`: 邮件队列连接管理（至多一次连接，失败即降级）
//! - `store`: 站内通知的写入、分页查询与已读标记
//! - `directory`: 收件人身份解析
//! - `engine`: 按配置组装上述组件

pub mod announcement;
pub mod channels;
pub mod directory;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod models;
pub mod queue;
pub mod store;
pub mod test_utils;
pub mod types;

pub use announcement::{AnnouncementBroadcaster, BroadcastSummary};
pub use dispatcher::NotificationDispatcher;
pub use engine::NotificationEngine;
pub use error::{DispatchError, Result};
pub use models::{Channel, Notification, NotificationPage, NotificationType, RecipientIdentity};
pub use queue::{QueueConnectionManager, QueueState};
pub use types::{ChannelOutcome, DispatchReport, NotifyRequest, SendStatus};
