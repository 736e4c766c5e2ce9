//! 站内通知存储
//!
//! 写入走单条多行 INSERT，按块拆分以避开 PostgreSQL 单语句 65535 个绑定参数的限制，
//! 所有块在同一事务内提交。

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Channel, Notification, NotificationPage, NotificationType};

/// 单条 INSERT 最多写入的行数（每行 9 个参数）
pub const INSERT_CHUNK_SIZE: usize = 1000;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// 规范化分页参数：limit 缺省为 20 并限制在 1..=100，offset 不小于 0
pub fn normalize_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

/// 站内通知存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// 为每个收件人写入一条 IN_APP 通知，返回写入行数
    async fn store_for_recipients(
        &self,
        recipient_ids: &[String],
        notification_type: NotificationType,
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<u64>;

    /// 按创建时间倒序分页查询用户的站内通知，并附带未读总数
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<NotificationPage>;

    /// 将属于该用户且仍未读的通知标记为已读，返回实际变更行数
    async fn mark_read(&self, notification_ids: &[Uuid], user_id: &str) -> Result<u64>;

    /// 将该用户全部未读通知标记为已读
    async fn mark_all_read(&self, user_id: &str) -> Result<u64>;
}

/// 基于 PostgreSQL 的站内通知存储
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    #[instrument(skip(self, recipient_ids, title, message, data), fields(recipient_count = recipient_ids.len()))]
    async fn store_for_recipients(
        &self,
        recipient_ids: &[String],
        notification_type: NotificationType,
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<u64> {
        if recipient_ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in recipient_ids.chunks(INSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO notifications \
                 (id, user_id, notification_type, channel, title, message, data, is_read, created_at) ",
            );

            builder.push_values(chunk, |mut row, user_id| {
                row.push_bind(Uuid::now_v7())
                    .push_bind(user_id)
                    .push_bind(notification_type)
                    .push_bind(Channel::InApp)
                    .push_bind(title)
                    .push_bind(message)
                    .push_bind(data.clone())
                    .push_bind(false)
                    .push_bind(now);
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        debug!(inserted, "站内通知已写入");
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<NotificationPage> {
        let (limit, offset) = normalize_page(Some(limit), Some(offset));

        let list_query = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, notification_type, channel, title, message, data,
                   is_read, read_at, created_at
            FROM notifications
            WHERE user_id = $1 AND channel = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(Channel::InApp)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool);

        let unread_query = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM notifications
            WHERE user_id = $1 AND channel = $2 AND is_read = false
            "#,
        )
        .bind(user_id)
        .bind(Channel::InApp)
        .fetch_one(&self.pool);

        let (notifications, unread_count) = tokio::try_join!(list_query, unread_query)?;

        Ok(NotificationPage {
            notifications,
            unread_count,
        })
    }

    #[instrument(skip(self, notification_ids), fields(id_count = notification_ids.len()))]
    async fn mark_read(&self, notification_ids: &[Uuid], user_id: &str) -> Result<u64> {
        if notification_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = true, read_at = NOW()
            WHERE id = ANY($1) AND user_id = $2 AND is_read = false
            "#,
        )
        .bind(notification_ids)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = true, read_at = NOW()
            WHERE user_id = $1 AND is_read = false
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
