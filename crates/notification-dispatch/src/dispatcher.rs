//! 通知分发器
//!
//! 对一次逻辑通知：解析一次收件人，然后各渠道并发投递。
//! 单个渠道返回失败或 panic 都只会体现在该渠道的 [`ChannelOutcome`] 中，
//! 不影响其他渠道，也不会传给调用方；只有收件人解析失败会返回错误。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use placement_shared::observability::metrics;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::channels::{EmailDispatchAdapter, PushDispatchAdapter};
use crate::directory::RecipientDirectory;
use crate::error::Result;
use crate::models::{Channel, EmailRecipient, RecipientIdentity};
use crate::store::NotificationStore;
use crate::types::{ChannelOutcome, DispatchReport, NotifyRequest, SendStatus};

/// 通知分发器
pub struct NotificationDispatcher {
    directory: Arc<dyn RecipientDirectory>,
    store: Arc<dyn NotificationStore>,
    email: EmailDispatchAdapter,
    push: PushDispatchAdapter,
}

impl NotificationDispatcher {
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        store: Arc<dyn NotificationStore>,
        email: EmailDispatchAdapter,
        push: PushDispatchAdapter,
    ) -> Self {
        Self {
            directory,
            store,
            email,
            push,
        }
    }

    /// 分发一条通知到请求的全部渠道
    #[instrument(
        skip(self, request),
        fields(
            notification_type = %request.notification_type,
            recipient_count = request.recipient_ids.len(),
            channels = ?request.channels
        )
    )]
    pub async fn notify(&self, request: NotifyRequest) -> Result<DispatchReport> {
        let start = Instant::now();
        let notification_type = request.notification_type;
        let recipient_ids = request.unique_recipient_ids();

        if recipient_ids.is_empty() {
            warn!("没有收件人，跳过通知");
            metrics::record_notify(notification_type.as_str(), "noop");
            return Ok(DispatchReport::empty(notification_type, 0));
        }

        let recipients = match self.directory.resolve(&recipient_ids).await {
            Ok(recipients) => recipients,
            Err(e) => {
                error!(error = %e, code = e.code(), "解析收件人失败");
                metrics::record_notify(notification_type.as_str(), "resolution_failed");
                return Err(e);
            }
        };

        if recipients.is_empty() {
            warn!(requested = recipient_ids.len(), "未找到任何收件人，跳过通知");
            metrics::record_notify(notification_type.as_str(), "noop");
            return Ok(DispatchReport::empty(notification_type, recipient_ids.len()));
        }

        let channels = request.unique_channels();
        let outcomes = join_all(
            channels
                .iter()
                .map(|&channel| self.dispatch_guarded(channel, &request, &recipients)),
        )
        .await;

        let report = DispatchReport {
            notification_type,
            requested: recipient_ids.len(),
            resolved: recipients.len(),
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
            dispatched_at: Utc::now(),
        };

        metrics::record_notify(notification_type.as_str(), "dispatched");
        if report.failure_count() == 0 {
            info!(
                resolved = report.resolved,
                duration_ms = report.duration_ms,
                "通知分发完成"
            );
        } else {
            warn!(
                resolved = report.resolved,
                failed_channels = report.failure_count(),
                duration_ms = report.duration_ms,
                "通知分发完成，部分渠道失败"
            );
        }

        Ok(report)
    }

    /// 后台分发通知，不阻塞调用方
    ///
    /// 结果只记录日志。
    pub fn notify_detached(self: &Arc<Self>, request: NotifyRequest) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);

        tokio::spawn(async move {
            let notification_type = request.notification_type;
            match dispatcher.notify(request).await {
                Ok(report) => {
                    info!(
                        notification_type = %notification_type,
                        resolved = report.resolved,
                        failed_channels = report.failure_count(),
                        "后台通知分发结束"
                    );
                }
                Err(e) => {
                    error!(notification_type = %notification_type, error = %e, "后台通知分发失败");
                }
            }
        })
    }

    /// 投递单个渠道，捕获 panic 并记录指标
    async fn dispatch_guarded(
        &self,
        channel: Channel,
        request: &NotifyRequest,
        recipients: &[RecipientIdentity],
    ) -> ChannelOutcome {
        let start = Instant::now();

        let outcome = match AssertUnwindSafe(self.dispatch_channel(channel, request, recipients))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(channel = %channel, reason = %reason, "渠道投递发生 panic");
                ChannelOutcome::failed(channel, recipients.len(), reason, start.elapsed())
            }
        };

        metrics::record_channel_dispatch(
            channel.as_str(),
            outcome.status.as_str(),
            outcome.delivered as u64,
            outcome.failed_count() as u64,
            start.elapsed().as_secs_f64(),
        );

        if matches!(outcome.status, SendStatus::Failed | SendStatus::Partial) {
            warn!(
                channel = %channel,
                attempted = outcome.attempted,
                delivered = outcome.delivered,
                error = ?outcome.error,
                "渠道投递未完全成功"
            );
        }

        outcome
    }

    async fn dispatch_channel(
        &self,
        channel: Channel,
        request: &NotifyRequest,
        recipients: &[RecipientIdentity],
    ) -> ChannelOutcome {
        match channel {
            Channel::InApp => self.store_in_app(request, recipients).await,
            Channel::Email => {
                let email_recipients: Vec<EmailRecipient> =
                    recipients.iter().map(EmailRecipient::from).collect();
                self.email
                    .send(&email_recipients, &request.title, &request.message)
                    .await
            }
            Channel::Push => {
                let tokens: Vec<String> = recipients
                    .iter()
                    .flat_map(|r| r.device_tokens.iter().cloned())
                    .collect();
                self.push
                    .send(
                        &tokens,
                        &request.title,
                        &request.message,
                        request.data.as_ref(),
                    )
                    .await
            }
        }
    }

    async fn store_in_app(
        &self,
        request: &NotifyRequest,
        recipients: &[RecipientIdentity],
    ) -> ChannelOutcome {
        let start = Instant::now();
        let user_ids: Vec<String> = recipients.iter().map(|r| r.id.clone()).collect();

        match self
            .store
            .store_for_recipients(
                &user_ids,
                request.notification_type,
                &request.title,
                &request.message,
                request.data.clone(),
            )
            .await
        {
            Ok(inserted) => {
                info!(count = inserted, "站内通知已写入");
                ChannelOutcome::from_counts(
                    Channel::InApp,
                    user_ids.len(),
                    inserted as usize,
                    None,
                    start.elapsed(),
                )
            }
            Err(e) => {
                error!(recipient_count = user_ids.len(), error = %e, "站内通知写入失败");
                ChannelOutcome::failed(Channel::InApp, user_ids.len(), e.to_string(), start.elapsed())
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}
