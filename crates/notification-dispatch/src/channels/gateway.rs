//! 推送网关客户端
//!
//! 网关协议：`POST {endpoint}`，Bearer 认证，请求体为
//! `{"tokens", "notification": {"title", "body"}, "data"}`，
//! 响应体为 `{"successCount", "failureCount", "responses"}`。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use placement_shared::config::PushConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DispatchError, Result};

/// 推送展示内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
}

/// multicast 请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastMessage {
    pub tokens: Vec<String>,
    pub notification: PushPayload,
    /// 网关只接受字符串值
    pub data: HashMap<String, String>,
}

/// 单个 token 的推送结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    #[serde(default)]
    pub message_id: Option<String>,
    /// 网关返回的错误，格式因网关而异
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

/// multicast 响应，与请求中的 token 顺序一一对应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastResponse {
    pub success_count: usize,
    pub failure_count: usize,
    #[serde(default)]
    pub responses: Vec<SendResponse>,
}

/// 推送网关接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// 单次 multicast 允许的最大 token 数
    fn max_batch_size(&self) -> usize;

    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse>;
}

/// 基于 HTTP 的推送网关
pub struct HttpPushGateway {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
    batch_limit: usize,
}

impl HttpPushGateway {
    pub fn new(
        endpoint: impl Into<String>,
        server_key: impl Into<String>,
        batch_limit: usize,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DispatchError::PushGateway(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            server_key: server_key.into(),
            batch_limit: batch_limit.max(1),
        })
    }

    /// 根据配置创建，未配置端点或密钥时返回 `None`
    pub fn from_config(config: &PushConfig) -> Result<Option<Self>> {
        if !config.is_configured() {
            return Ok(None);
        }

        let (Some(endpoint), Some(server_key)) = (&config.endpoint, &config.server_key) else {
            return Ok(None);
        };

        let gateway = Self::new(
            endpoint.trim(),
            server_key.trim(),
            config.batch_limit,
            Duration::from_millis(config.request_timeout_ms),
        )?;

        info!(endpoint = %gateway.endpoint, batch_limit = gateway.batch_limit, "推送网关已初始化");
        Ok(Some(gateway))
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    fn max_batch_size(&self) -> usize {
        self.batch_limit
    }

    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.server_key)
            .json(message)
            .send()
            .await
            .map_err(|e| DispatchError::PushGateway(format!("请求失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::PushGateway(format!(
                "网关返回 {status}: {body}"
            )));
        }

        let result = response
            .json::<MulticastResponse>()
            .await
            .map_err(|e| DispatchError::PushGateway(format!("响应解析失败: {e}")))?;

        debug!(
            token_count = message.tokens.len(),
            success_count = result.success_count,
            failure_count = result.failure_count,
            "multicast 请求完成"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_endpoint_and_key() {
        let config = PushConfig {
            endpoint: Some("http://localhost:1/push".to_string()),
            ..Default::default()
        };
        assert!(HttpPushGateway::from_config(&config).unwrap().is_none());

        let config = PushConfig {
            server_key: Some("key".to_string()),
            batch_limit: 0,
            ..config
        };
        let gateway = HttpPushGateway::from_config(&config).unwrap().unwrap();
        assert_eq!(gateway.max_batch_size(), 1);
    }

    #[test]
    fn test_response_deserialization() {
        let json = r#"{
            "successCount": 1,
            "failureCount": 1,
            "responses": [
                {"success": true, "messageId": "m-1"},
                {"success": false, "error": {"code": "registration-token-not-registered"}}
            ]
        }"#;
        let response: MulticastResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.success_count, 1);
        assert_eq!(response.responses[0].message_id.as_deref(), Some("m-1"));
        assert!(response.responses[1].error.is_some());
    }
}
