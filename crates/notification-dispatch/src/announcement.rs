//! 全员公告广播
//!
//! 按用户 ID 游标分页读取未删除用户，每页投递一次邮件队列，
//! 内存中最多只保留一页用户。读取某一页失败时整个广播终止，
//! 已投递的页不回滚也不重试。

use std::sync::Arc;
use std::time::Instant;

use placement_shared::config::AnnouncementConfig;
use placement_shared::observability::metrics;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::channels::EmailDispatchAdapter;
use crate::directory::RecipientDirectory;
use crate::models::EmailRecipient;

/// 默认每页用户数
pub const DEFAULT_BATCH_SIZE: i64 = 500;

/// 一次广播的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSummary {
    /// 已投递的非空页数
    pub pages: usize,
    /// 读取到的用户总数
    pub recipients: usize,
    /// 成功入队的邮件数
    pub queued: usize,
    /// 读取某页失败时的错误信息
    pub aborted: Option<String>,
    pub duration_ms: u64,
}

impl BroadcastSummary {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }
}

/// 公告广播器
pub struct AnnouncementBroadcaster {
    directory: Arc<dyn RecipientDirectory>,
    email: EmailDispatchAdapter,
    batch_size: i64,
}

impl AnnouncementBroadcaster {
    pub fn new(directory: Arc<dyn RecipientDirectory>, email: EmailDispatchAdapter) -> Self {
        Self {
            directory,
            email,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_config(mut self, config: &AnnouncementConfig) -> Self {
        self.batch_size = config.batch_size.max(1);
        self
    }

    /// 设置每页用户数（至少为 1）
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    /// 向全部未删除用户发送公告邮件
    #[instrument(skip(self, body), fields(batch_size = self.batch_size))]
    pub async fn broadcast(&self, subject: &str, body: &str) -> BroadcastSummary {
        let start = Instant::now();
        let mut summary = BroadcastSummary::default();
        let mut cursor: Option<String> = None;

        info!("开始广播公告");

        loop {
            let page = match self
                .directory
                .active_page(cursor.clone(), self.batch_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(
                        pages = summary.pages,
                        cursor = ?cursor,
                        error = %e,
                        "读取公告收件人失败，终止广播"
                    );
                    summary.aborted = Some(e.to_string());
                    break;
                }
            };

            if page.is_empty() {
                break;
            }

            let recipients: Vec<EmailRecipient> = page.iter().map(EmailRecipient::from).collect();
            let outcome = self.email.send(&recipients, subject, body).await;

            summary.pages += 1;
            summary.recipients += page.len();
            summary.queued += outcome.delivered;
            metrics::record_announcement_batch(page.len() as u64);

            debug!(
                page = summary.pages,
                page_size = page.len(),
                queued = outcome.delivered,
                status = outcome.status.as_str(),
                "公告批次已投递"
            );

            if (page.len() as i64) < self.batch_size {
                break;
            }

            cursor = page.last().map(|r| r.id.clone());
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;

        if summary.is_complete() {
            metrics::record_announcement_run("completed");
            info!(
                pages = summary.pages,
                recipients = summary.recipients,
                queued = summary.queued,
                duration_ms = summary.duration_ms,
                "公告广播完成"
            );
        } else {
            metrics::record_announcement_run("aborted");
        }

        summary
    }

    /// 在后台任务中广播，调用方无需等待
    pub fn spawn(
        self: &Arc<Self>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> JoinHandle<BroadcastSummary> {
        let broadcaster = Arc::clone(self);
        let subject = subject.into();
        let body = body.into();

        tokio::spawn(async move { broadcaster.broadcast(&subject, &body).await })
    }
}
