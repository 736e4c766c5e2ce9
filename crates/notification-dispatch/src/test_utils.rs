//! 测试工具模块
//!
//! 提供内存版的存储、收件人目录、队列和推送网关，
//! 供单元测试与 `tests/` 下的集成测试在没有 PostgreSQL、Kafka 的环境中运行。

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::channels::{MulticastMessage, MulticastResponse, PushGateway, SendResponse};
use crate::directory::RecipientDirectory;
use crate::error::{DispatchError, Result};
use crate::models::{
    AnnouncementRecipient, Channel, EmailJob, Notification, NotificationPage, NotificationType,
    RecipientIdentity,
};
use crate::queue::{QueueChannel, QueueConnection, QueueConnector, QueueSession};
use crate::store::{NotificationStore, normalize_page};

// ==================== 测试数据 ====================

/// 创建测试用收件人，邮箱为 `{id}@example.com`
pub fn recipient(id: &str) -> RecipientIdentity {
    RecipientIdentity {
        id: id.to_string(),
        email: format!("{id}@example.com"),
        display_name: Some(format!("User {id}")),
        device_tokens: Vec::new(),
    }
}

/// 创建带设备 token 的测试收件人
pub fn recipient_with_tokens(id: &str, tokens: &[&str]) -> RecipientIdentity {
    RecipientIdentity {
        device_tokens: tokens.iter().map(|t| t.to_string()).collect(),
        ..recipient(id)
    }
}

// ==================== 收件人目录 ====================

#[derive(Debug, Clone)]
struct DirectoryEntry {
    identity: RecipientIdentity,
    deleted: bool,
}

/// 内存收件人目录
#[derive(Default)]
pub struct MemoryRecipientDirectory {
    users: Mutex<Vec<DirectoryEntry>>,
    page_requests: Mutex<Vec<(Option<String>, i64)>>,
    fail_pages_after: Mutex<Option<usize>>,
}

impl MemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = RecipientIdentity>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.add(user);
        }
        directory
    }

    /// 生成 `count` 个用户，ID 为零填充的 `user-00000` 形式，保证字典序与数值序一致
    pub fn with_generated_users(count: usize) -> Self {
        Self::with_users((0..count).map(|i| recipient(&format!("user-{i:05}"))))
    }

    pub fn add(&self, identity: RecipientIdentity) {
        self.users.lock().push(DirectoryEntry {
            identity,
            deleted: false,
        });
    }

    pub fn add_deleted(&self, identity: RecipientIdentity) {
        self.users.lock().push(DirectoryEntry {
            identity,
            deleted: true,
        });
    }

    /// 前 `pages` 次分页成功，之后的分页请求全部失败
    pub fn fail_pages_after(self, pages: usize) -> Self {
        *self.fail_pages_after.lock() = Some(pages);
        self
    }

    /// 已收到的分页请求 `(after, limit)`
    pub fn page_requests(&self) -> Vec<(Option<String>, i64)> {
        self.page_requests.lock().clone()
    }
}

#[async_trait]
impl RecipientDirectory for MemoryRecipientDirectory {
    async fn resolve(&self, user_ids: &[String]) -> Result<Vec<RecipientIdentity>> {
        let wanted: HashSet<&str> = user_ids.iter().map(String::as_str).collect();
        let mut found: Vec<RecipientIdentity> = self
            .users
            .lock()
            .iter()
            .filter(|entry| wanted.contains(entry.identity.id.as_str()))
            .map(|entry| entry.identity.clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn active_page(
        &self,
        after: Option<String>,
        limit: i64,
    ) -> Result<Vec<AnnouncementRecipient>> {
        let served = {
            let mut requests = self.page_requests.lock();
            requests.push((after.clone(), limit));
            requests.len() - 1
        };

        if let Some(allowed) = *self.fail_pages_after.lock()
            && served >= allowed
        {
            return Err(DispatchError::Internal("模拟分页查询失败".to_string()));
        }

        let mut active: Vec<AnnouncementRecipient> = self
            .users
            .lock()
            .iter()
            .filter(|entry| !entry.deleted)
            .filter(|entry| after.as_deref().is_none_or(|cursor| entry.identity.id.as_str() > cursor))
            .map(|entry| AnnouncementRecipient {
                id: entry.identity.id.clone(),
                email: entry.identity.email.clone(),
            })
            .collect();

        active.sort_by(|a, b| a.id.cmp(&b.id));
        active.truncate(limit.max(0) as usize);
        Ok(active)
    }
}

// ==================== 站内通知存储 ====================

/// 内存站内通知存储
#[derive(Default)]
pub struct MemoryNotificationStore {
    rows: Mutex<Vec<Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前全部记录
    pub fn rows(&self) -> Vec<Notification> {
        self.rows.lock().clone()
    }

    pub fn rows_for(&self, user_id: &str) -> Vec<Notification> {
        self.rows
            .lock()
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn store_for_recipients(
        &self,
        recipient_ids: &[String],
        notification_type: NotificationType,
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut rows = self.rows.lock();
        for user_id in recipient_ids {
            rows.push(Notification {
                id: Uuid::now_v7(),
                user_id: user_id.clone(),
                notification_type,
                channel: Channel::InApp,
                title: title.to_string(),
                message: message.to_string(),
                data: data.clone(),
                is_read: false,
                read_at: None,
                created_at: now,
            });
        }
        Ok(recipient_ids.len() as u64)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<NotificationPage> {
        let (limit, offset) = normalize_page(Some(limit), Some(offset));
        let rows = self.rows.lock();

        let mut owned: Vec<&Notification> = rows
            .iter()
            .filter(|n| n.user_id == user_id && n.channel == Channel::InApp)
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let unread_count = owned.iter().filter(|n| !n.is_read).count() as i64;
        let notifications = owned
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(NotificationPage {
            notifications,
            unread_count,
        })
    }

    async fn mark_read(&self, notification_ids: &[Uuid], user_id: &str) -> Result<u64> {
        let now = Utc::now();
        let mut changed = 0;
        for row in self.rows.lock().iter_mut() {
            if notification_ids.contains(&row.id) && row.user_id == user_id && !row.is_read {
                row.is_read = true;
                row.read_at = Some(now);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        let now = Utc::now();
        let mut changed = 0;
        for row in self.rows.lock().iter_mut() {
            if row.user_id == user_id && !row.is_read {
                row.is_read = true;
                row.read_at = Some(now);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

// ==================== 队列 ====================

/// 已发布到内存队列的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub queue: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct QueueLog {
    published: Mutex<Vec<PublishedMessage>>,
    publish_attempts: AtomicUsize,
    connect_attempts: AtomicUsize,
    channel_closed: AtomicUsize,
    connection_closed: AtomicUsize,
}

/// 内存队列连接器
///
/// 记录所有发布的消息，可配置为连接失败或在若干条消息后发布失败。
pub struct MemoryQueueConnector {
    log: Arc<QueueLog>,
    fail_connect: bool,
    fail_publish_after: Option<usize>,
}

impl Default for MemoryQueueConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueueConnector {
    pub fn new() -> Self {
        Self {
            log: Arc::new(QueueLog::default()),
            fail_connect: false,
            fail_publish_after: None,
        }
    }

    /// 连接总是失败
    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::new()
        }
    }

    /// 成功发布 `count` 条之后的发布全部失败
    pub fn fail_publish_after(mut self, count: usize) -> Self {
        self.fail_publish_after = Some(count);
        self
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.log.published.lock().clone()
    }

    /// 将已发布的消息解析为邮件任务
    pub fn published_jobs(&self) -> Vec<EmailJob> {
        self.log
            .published
            .lock()
            .iter()
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    pub fn publish_attempts(&self) -> usize {
        self.log.publish_attempts.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> usize {
        self.log.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn channel_closed(&self) -> usize {
        self.log.channel_closed.load(Ordering::SeqCst)
    }

    pub fn connection_closed(&self) -> usize {
        self.log.connection_closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueConnector for MemoryQueueConnector {
    async fn connect(&self) -> Result<QueueSession> {
        self.log.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(DispatchError::Queue("模拟连接被拒绝".to_string()));
        }

        Ok(QueueSession {
            connection: Arc::new(MemoryQueueConnection {
                log: Arc::clone(&self.log),
            }),
            channel: Arc::new(MemoryQueueChannel {
                log: Arc::clone(&self.log),
                fail_publish_after: self.fail_publish_after,
            }),
        })
    }
}

struct MemoryQueueChannel {
    log: Arc<QueueLog>,
    fail_publish_after: Option<usize>,
}

#[async_trait]
impl QueueChannel for MemoryQueueChannel {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.log.publish_attempts.fetch_add(1, Ordering::SeqCst);

        let mut published = self.log.published.lock();
        if self
            .fail_publish_after
            .is_some_and(|limit| published.len() >= limit)
        {
            return Err(DispatchError::Queue("模拟 channel 已断开".to_string()));
        }

        published.push(PublishedMessage {
            queue: queue.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.channel_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryQueueConnection {
    log: Arc<QueueLog>,
}

#[async_trait]
impl QueueConnection for MemoryQueueConnection {
    async fn close(&self) -> Result<()> {
        self.log.connection_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ==================== 推送网关 ====================

/// 内存推送网关
///
/// 记录每次 multicast 请求，`rejected_tokens` 中的 token 报告为失败。
pub struct MemoryPushGateway {
    batch_limit: usize,
    rejected_tokens: HashSet<String>,
    requests: Mutex<Vec<MulticastMessage>>,
}

impl MemoryPushGateway {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            batch_limit,
            rejected_tokens: HashSet::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(mut self, tokens: &[&str]) -> Self {
        self.rejected_tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn requests(&self) -> Vec<MulticastMessage> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PushGateway for MemoryPushGateway {
    fn max_batch_size(&self) -> usize {
        self.batch_limit
    }

    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse> {
        self.requests.lock().push(message.clone());

        let responses: Vec<SendResponse> = message
            .tokens
            .iter()
            .map(|token| {
                if self.rejected_tokens.contains(token) {
                    SendResponse {
                        success: false,
                        message_id: None,
                        error: Some(serde_json::json!({
                            "code": "registration-token-not-registered"
                        })),
                    }
                } else {
                    SendResponse {
                        success: true,
                        message_id: Some(format!("msg-{token}")),
                        error: None,
                    }
                }
            })
            .collect();

        let success_count = responses.iter().filter(|r| r.success).count();
        Ok(MulticastResponse {
            success_count,
            failure_count: responses.len() - success_count,
            responses,
        })
    }
}
