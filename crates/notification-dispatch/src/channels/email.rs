//! 邮件渠道
//!
//! 不直接发信，只把 `{to, subject, text}` 写入邮件队列。

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::models::{Channel, EmailJob, EmailRecipient};
use crate::queue::QueueConnectionManager;
use crate::types::ChannelOutcome;

/// 邮件渠道适配器
#[derive(Clone)]
pub struct EmailDispatchAdapter {
    queue: Arc<QueueConnectionManager>,
}

impl EmailDispatchAdapter {
    pub fn new(queue: Arc<QueueConnectionManager>) -> Self {
        Self { queue }
    }

    /// 为每个收件人投递一条邮件任务
    ///
    /// 队列不可用时返回 Skipped；一次发布失败即认为 channel 已损坏，
    /// 本次调用剩余的收件人不再尝试。
    #[instrument(skip_all, fields(recipient_count = recipients.len(), queue = %self.queue.queue_name()))]
    pub async fn send(
        &self,
        recipients: &[EmailRecipient],
        subject: &str,
        body: &str,
    ) -> ChannelOutcome {
        if recipients.is_empty() {
            debug!("没有邮件收件人，跳过");
            return ChannelOutcome::skipped(Channel::Email, "没有收件人");
        }

        let Some(channel) = self.queue.get_channel().await else {
            warn!(
                recipient_count = recipients.len(),
                state = %self.queue.state(),
                "邮件队列不可用，跳过邮件通知"
            );
            return ChannelOutcome::skipped(Channel::Email, "邮件队列不可用");
        };

        let start = Instant::now();
        let queue_name = self.queue.queue_name();
        let mut queued = 0usize;
        let mut first_error: Option<String> = None;

        for (index, recipient) in recipients.iter().enumerate() {
            let job = EmailJob::for_recipient(recipient, subject, body);

            if let Err(reason) = job.validate() {
                warn!(index, reason = %reason, "邮件任务校验失败，跳过该收件人");
                first_error.get_or_insert(reason);
                continue;
            }

            let payload = match serde_json::to_vec(&job) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(index, error = %e, "邮件任务序列化失败");
                    first_error.get_or_insert(e.to_string());
                    continue;
                }
            };

            if let Err(e) = channel.publish(queue_name, &payload).await {
                error!(
                    error = %e,
                    code = e.code(),
                    transient = e.is_transient(),
                    recipient_count = recipients.len(),
                    queued,
                    "邮件任务投递失败，停止本次投递"
                );
                first_error = Some(e.to_string());
                break;
            }

            queued += 1;
        }

        info!(
            recipient_count = recipients.len(),
            queued, "邮件任务已入队"
        );

        ChannelOutcome::from_counts(
            Channel::Email,
            recipients.len(),
            queued,
            first_error,
            start.elapsed(),
        )
    }
}
