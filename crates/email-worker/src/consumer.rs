//! 邮件任务消费者
//!
//! 从邮件 topic 消费 `{to, subject, text}`，校验后交给 [`MailTransport`] 发送。
//! 格式错误的消息直接丢弃；发送失败只记录日志和指标，不重试。
//!
//! 投递语义为至多一次：消费者自动提交 offset，发送失败的消息不会重新入队，
//! 邮件服务故障期间消费到的邮件会丢失，只能通过 `email_worker_messages_total{outcome="failed"}`
//! 和错误日志发现。

use std::sync::Arc;

use notification_dispatch::models::EmailJob;
use placement_shared::config::QueueConfig;
use placement_shared::kafka::{ConsumerMessage, KafkaConsumer};
use placement_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::WorkerError;
use crate::sender::MailTransport;

/// 单条消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Sent,
    /// 消息格式错误，已丢弃
    Invalid,
    /// 发送失败，已丢弃
    Failed,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Invalid => "invalid",
            Self::Failed => "failed",
        }
    }
}

/// 邮件消费者
pub struct EmailConsumer {
    consumer: KafkaConsumer,
    topic: String,
    transport: Arc<dyn MailTransport>,
}

impl EmailConsumer {
    pub fn new(config: &QueueConfig, transport: Arc<dyn MailTransport>) -> Result<Self, WorkerError> {
        let consumer = KafkaConsumer::new(config)?;
        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            transport,
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        self.consumer.subscribe(&[self.topic.as_str()])?;

        info!(
            topic = %self.topic,
            transport = self.transport.name(),
            "邮件消费者已启动"
        );

        let transport = self.transport;

        self.consumer
            .start(shutdown, |msg| {
                let transport = Arc::clone(&transport);
                async move {
                    handle_message(transport.as_ref(), &msg).await;
                    Ok(())
                }
            })
            .await;

        info!("邮件消费者已停止");
        Ok(())
    }
}

/// 解析并校验邮件任务，字段两端空白会被去掉
pub fn parse_job(msg: &ConsumerMessage) -> Result<EmailJob, WorkerError> {
    let job: EmailJob = msg
        .deserialize_payload()
        .map_err(|e| WorkerError::DeserializationFailed(e.to_string()))?;

    let job = EmailJob {
        to: job.to.trim().to_string(),
        subject: job.subject.trim().to_string(),
        text: job.text.trim().to_string(),
    };

    job.validate().map_err(WorkerError::InvalidMessage)?;

    if !job.to.contains('@') {
        return Err(WorkerError::InvalidMessage(format!(
            "收件人邮箱格式错误: {}",
            job.to
        )));
    }

    Ok(job)
}

/// 处理单条邮件消息，至多发送一次
pub async fn handle_message(transport: &dyn MailTransport, msg: &ConsumerMessage) -> MessageOutcome {
    let outcome = match parse_job(msg) {
        Err(e) => {
            warn!(
                error = %e,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "丢弃无效的邮件消息"
            );
            MessageOutcome::Invalid
        }
        Ok(job) => match transport.send(&job).await {
            Ok(message_id) => {
                info!(to = %job.to, message_id = ?message_id, "邮件已发送");
                MessageOutcome::Sent
            }
            Err(e) => {
                error!(
                    to = %job.to,
                    error = %e,
                    offset = msg.offset,
                    "邮件发送失败"
                );
                MessageOutcome::Failed
            }
        },
    };

    metrics::record_email_worker_message(outcome.as_str());
    outcome
}
