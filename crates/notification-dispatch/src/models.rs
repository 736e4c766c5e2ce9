//! 通知领域模型
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化，
//! 数据库中以 varchar 存储大写蛇形名称。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    JobCreated,
    JobUpdated,
    JobDeadlineExtended,
    JobClosed,
    JobReopened,
    ApplicationSubmitted,
    ApplicationStatusChanged,
    InterviewScheduled,
    OfferReceived,
    ApplicationRejected,
    /// 全员公告
    Announcement,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobCreated => "JOB_CREATED",
            Self::JobUpdated => "JOB_UPDATED",
            Self::JobDeadlineExtended => "JOB_DEADLINE_EXTENDED",
            Self::JobClosed => "JOB_CLOSED",
            Self::JobReopened => "JOB_REOPENED",
            Self::ApplicationSubmitted => "APPLICATION_SUBMITTED",
            Self::ApplicationStatusChanged => "APPLICATION_STATUS_CHANGED",
            Self::InterviewScheduled => "INTERVIEW_SCHEDULED",
            Self::OfferReceived => "OFFER_RECEIVED",
            Self::ApplicationRejected => "APPLICATION_REJECTED",
            Self::Announcement => "ANNOUNCEMENT",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 投递渠道
///
/// 封闭枚举，分发器对其做穷尽匹配，新增渠道时编译器会指出所有需要处理的位置。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    /// 站内信，持久化到 notifications 表
    InApp,
    /// 邮件，投递到邮件队列由 worker 发送
    Email,
    /// 移动端推送
    Push,
}

impl Channel {
    /// 默认启用的全部渠道
    pub const ALL: [Channel; 3] = [Channel::InApp, Channel::Email, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InApp => "IN_APP",
            Self::Email => "EMAIL",
            Self::Push => "PUSH",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 站内通知记录
///
/// 对应 notifications 表。除 `is_read`/`read_at` 外写入后不再修改，
/// 且这两个字段只会从未读变为已读。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 站内通知分页结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    /// 该用户全部未读数，与本页内容不保证强一致
    pub unread_count: i64,
}

/// 收件人投递身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecipientIdentity {
    pub id: String,
    pub email: String,
    #[sqlx(rename = "name")]
    pub display_name: Option<String>,
    pub device_tokens: Vec<String>,
}

/// 公告收件人，只需要邮箱
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AnnouncementRecipient {
    pub id: String,
    pub email: String,
}

/// 邮件渠道的收件人
///
/// 有称呼时生成事务邮件格式的正文，公告不带称呼。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRecipient {
    pub email: String,
    pub display_name: Option<String>,
}

impl EmailRecipient {
    pub fn new(email: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            email: email.into(),
            display_name,
        }
    }
}

impl From<&RecipientIdentity> for EmailRecipient {
    fn from(identity: &RecipientIdentity) -> Self {
        Self {
            email: identity.email.clone(),
            display_name: identity
                .display_name
                .clone()
                .filter(|name| !name.trim().is_empty()),
        }
    }
}

impl From<&AnnouncementRecipient> for EmailRecipient {
    fn from(recipient: &AnnouncementRecipient) -> Self {
        Self {
            email: recipient.email.clone(),
            display_name: None,
        }
    }
}

/// 邮件队列消息体
///
/// 线上格式固定为 `{"to", "subject", "text"}`，不携带任何 header。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJob {
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl EmailJob {
    /// 为单个收件人构造邮件任务
    pub fn for_recipient(recipient: &EmailRecipient, subject: &str, body: &str) -> Self {
        let text = match recipient.display_name.as_deref() {
            Some(name) => format!("Hi {name},\n\n{body}"),
            None => body.to_string(),
        };

        Self {
            to: recipient.email.trim().to_string(),
            subject: subject.to_string(),
            text,
        }
    }

    /// 校验三个字段均非空白
    pub fn validate(&self) -> Result<(), String> {
        if self.to.trim().is_empty() {
            return Err("收件人邮箱为空".to_string());
        }
        if self.subject.trim().is_empty() {
            return Err("邮件主题为空".to_string());
        }
        if self.text.trim().is_empty() {
            return Err("邮件正文为空".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_serialization() {
        let json = serde_json::to_string(&NotificationType::ApplicationStatusChanged).unwrap();
        assert_eq!(json, "\"APPLICATION_STATUS_CHANGED\"");

        let parsed: NotificationType = serde_json::from_str("\"JOB_DEADLINE_EXTENDED\"").unwrap();
        assert_eq!(parsed, NotificationType::JobDeadlineExtended);
        assert_eq!(parsed.to_string(), "JOB_DEADLINE_EXTENDED");
    }

    #[test]
    fn test_channel_serialization_matches_as_str() {
        for channel in Channel::ALL {
            let json = serde_json::to_string(&channel).unwrap();
            assert_eq!(json, format!("\"{}\"", channel.as_str()));
        }
    }

    #[test]
    fn test_email_job_greets_named_recipient() {
        let recipient = EmailRecipient::new("alice@example.com", Some("Alice".to_string()));
        let job = EmailJob::for_recipient(&recipient, "Status update", "You are shortlisted.");

        assert_eq!(job.to, "alice@example.com");
        assert_eq!(job.text, "Hi Alice,\n\nYou are shortlisted.");
    }

    #[test]
    fn test_email_job_uses_raw_body_without_name() {
        let recipient = EmailRecipient::new("bob@example.com", None);
        let job = EmailJob::for_recipient(&recipient, "Campus drive", "Drive on Friday");
        assert_eq!(job.text, "Drive on Friday");
    }

    #[test]
    fn test_blank_display_name_is_dropped() {
        let identity = RecipientIdentity {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            display_name: Some("  ".to_string()),
            device_tokens: vec![],
        };
        assert_eq!(EmailRecipient::from(&identity).display_name, None);
    }

    #[test]
    fn test_email_job_validate() {
        let ok = EmailJob {
            to: "a@example.com".to_string(),
            subject: "s".to_string(),
            text: "t".to_string(),
        };
        assert!(ok.validate().is_ok());

        let blank_to = EmailJob {
            to: "  ".to_string(),
            ..ok.clone()
        };
        assert!(blank_to.validate().is_err());

        let blank_subject = EmailJob {
            subject: String::new(),
            ..ok
        };
        assert!(blank_subject.validate().is_err());
    }

    #[test]
    fn test_email_job_wire_format() {
        let job = EmailJob {
            to: "a@example.com".to_string(),
            subject: "Hello".to_string(),
            text: "Body".to_string(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"to": "a@example.com", "subject": "Hello", "text": "Body"})
        );
    }
}
