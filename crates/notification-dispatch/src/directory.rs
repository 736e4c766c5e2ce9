//! 收件人目录
//!
//! 将用户 ID 解析为投递身份（邮箱、称呼、设备 token），
//! 并为全员公告提供按 ID 递增的游标分页。users 表由主业务系统维护，这里只读。

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use crate::error::Result;
use crate::models::{AnnouncementRecipient, RecipientIdentity};

/// 收件人目录接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// 批量解析用户身份，不存在的 ID 直接忽略
    async fn resolve(&self, user_ids: &[String]) -> Result<Vec<RecipientIdentity>>;

    /// 读取一页未删除用户，`after` 为上一页最后一个 ID，结果按 ID 升序
    async fn active_page(
        &self,
        after: Option<String>,
        limit: i64,
    ) -> Result<Vec<AnnouncementRecipient>>;
}

/// 基于 PostgreSQL users 表的收件人目录
pub struct PgRecipientDirectory {
    pool: PgPool,
}

impl PgRecipientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    #[instrument(skip(self, user_ids), fields(user_count = user_ids.len()))]
    async fn resolve(&self, user_ids: &[String]) -> Result<Vec<RecipientIdentity>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let recipients = sqlx::query_as::<_, RecipientIdentity>(
            r#"
            SELECT id, email, name, COALESCE(device_tokens, '{}') AS device_tokens
            FROM users
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(recipients)
    }

    #[instrument(skip(self))]
    async fn active_page(
        &self,
        after: Option<String>,
        limit: i64,
    ) -> Result<Vec<AnnouncementRecipient>> {
        let recipients = sqlx::query_as::<_, AnnouncementRecipient>(
            r#"
            SELECT id, email
            FROM users
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR id > $1)
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(recipients)
    }
}
