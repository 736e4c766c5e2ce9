//! 邮件发送
//!
//! 通过 `MailTransport` trait 抽象发送行为：`HttpMailTransport` 调用邮件服务 API，
//! `LogMailTransport` 只记录日志，用于未配置邮件服务的开发环境。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notification_dispatch::models::EmailJob;
use placement_shared::config::MailConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::WorkerError;

/// 邮件发送 trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// 发送一封纯文本邮件，返回服务端消息 ID（若有）
    async fn send(&self, job: &EmailJob) -> Result<Option<String>, WorkerError>;

    /// 发送器名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 根据配置选择发送器，未配置邮件 API 时退化为只记录日志
pub fn transport_from_config(config: &MailConfig) -> Result<Arc<dyn MailTransport>, WorkerError> {
    match (config.endpoint.as_deref(), config.api_key.as_deref()) {
        (Some(endpoint), Some(api_key)) if !endpoint.trim().is_empty() => {
            let transport = HttpMailTransport::new(
                endpoint.trim(),
                api_key.trim(),
                &config.from,
                Duration::from_millis(config.request_timeout_ms),
            )?;
            info!(endpoint = %endpoint, "使用 HTTP 邮件发送器");
            Ok(Arc::new(transport))
        }
        _ => {
            warn!("未配置邮件服务，邮件只会记录到日志");
            Ok(Arc::new(LogMailTransport))
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP 邮件发送器
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SendMailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendMailResponse {
    #[serde(default)]
    id: Option<String>,
}

/// 调用邮件服务 HTTP API 的发送器
pub struct HttpMailTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpMailTransport {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WorkerError::SendFailed(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(&self, job: &EmailJob) -> Result<Option<String>, WorkerError> {
        let request = SendMailRequest {
            from: &self.from,
            to: &job.to,
            subject: &job.subject,
            text: &job.text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkerError::SendFailed(format!("请求失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::SendFailed(format!("邮件服务返回 {status}: {body}")));
        }

        // 部分服务成功时不返回 body，解析失败不视为发送失败
        let message_id = response
            .json::<SendMailResponse>()
            .await
            .ok()
            .and_then(|r| r.id);

        debug!(to = %job.to, message_id = ?message_id, "邮件已提交到邮件服务");
        Ok(message_id)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

// ---------------------------------------------------------------------------
// 日志发送器
// ---------------------------------------------------------------------------

/// 只记录日志的发送器
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn send(&self, job: &EmailJob) -> Result<Option<String>, WorkerError> {
        info!(
            to = %job.to,
            subject = %job.subject,
            text_len = job.text.len(),
            "模拟发送邮件"
        );
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_falls_back_to_log() {
        let transport = transport_from_config(&MailConfig::default()).unwrap();
        assert_eq!(transport.name(), "log");

        let config = MailConfig {
            endpoint: Some("https://mail.example.com/send".to_string()),
            api_key: Some("key".to_string()),
            ..Default::default()
        };
        assert_eq!(transport_from_config(&config).unwrap().name(), "http");
    }

    #[tokio::test]
    async fn test_log_transport_always_succeeds() {
        let job = EmailJob {
            to: "a@example.com".to_string(),
            subject: "s".to_string(),
            text: "t".to_string(),
        };
        assert!(LogMailTransport.send(&job).await.unwrap().is_none());
    }
}
