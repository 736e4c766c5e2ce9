//! 投递渠道适配器
//!
//! - **Email**: 每个收件人一条消息投递到邮件队列，由 email-worker 实际发信
//! - **Push**: 通过推送网关 multicast 接口批量推送
//!
//! 站内信直接写 [`NotificationStore`](crate::store::NotificationStore)，没有单独的适配器。
//! 适配器从不返回错误，所有失败都折算进 [`ChannelOutcome`](crate::types::ChannelOutcome)。

mod email;
mod gateway;
mod push;

pub use email::EmailDispatchAdapter;
pub use gateway::{
    HttpPushGateway, MulticastMessage, MulticastResponse, PushGateway, PushPayload, SendResponse,
};
pub use push::{PushDispatchAdapter, stringify_data};

#[cfg(test)]
pub use gateway::MockPushGateway;
