//! 推送渠道

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use placement_shared::observability::metrics;
use tracing::{debug, error, info, instrument, warn};

use super::gateway::{MulticastMessage, PushGateway, PushPayload};
use crate::models::Channel;
use crate::types::ChannelOutcome;

/// 推送渠道适配器
#[derive(Clone)]
pub struct PushDispatchAdapter {
    gateway: Option<Arc<dyn PushGateway>>,
}

impl PushDispatchAdapter {
    pub fn new(gateway: Arc<dyn PushGateway>) -> Self {
        Self {
            gateway: Some(gateway),
        }
    }

    /// 未配置推送网关的适配器
    pub fn disabled() -> Self {
        warn!("推送网关未配置，推送渠道降级");
        Self { gateway: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.gateway.is_some()
    }

    /// 向一组设备 token 推送
    ///
    /// token 按网关上限分批；某一批请求失败只记录日志，后续批次照常发送。
    #[instrument(skip_all, fields(token_count = tokens.len()))]
    pub async fn send(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: Option<&serde_json::Value>,
    ) -> ChannelOutcome {
        let tokens = dedupe_tokens(tokens);
        if tokens.is_empty() {
            info!("没有可用的设备 token，跳过推送");
            return ChannelOutcome::skipped(Channel::Push, "没有设备 token");
        }

        let Some(gateway) = self.gateway.as_ref() else {
            warn!(token_count = tokens.len(), "推送网关未配置，跳过推送");
            return ChannelOutcome::skipped(Channel::Push, "推送网关未配置");
        };

        let start = Instant::now();
        let data = stringify_data(data);
        let batch_size = gateway.max_batch_size().max(1);

        let mut success_total = 0usize;
        let mut failure_total = 0usize;
        let mut first_error: Option<String> = None;

        for batch in tokens.chunks(batch_size) {
            let message = MulticastMessage {
                tokens: batch.to_vec(),
                notification: PushPayload {
                    title: title.to_string(),
                    body: body.to_string(),
                },
                data: data.clone(),
            };

            match gateway.send_multicast(&message).await {
                Ok(response) => {
                    success_total += response.success_count;
                    failure_total += response.failure_count;

                    for (token, result) in batch.iter().zip(response.responses.iter()) {
                        if !result.success {
                            let reason = result
                                .error
                                .as_ref()
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "unknown".to_string());
                            warn!(token = %token, error = %reason, "推送 token 发送失败");
                        }
                    }

                    debug!(
                        batch_size = batch.len(),
                        success_count = response.success_count,
                        failure_count = response.failure_count,
                        "推送批次完成"
                    );
                }
                Err(e) => {
                    error!(
                        batch_size = batch.len(),
                        error = %e,
                        transient = e.is_transient(),
                        "推送批次请求失败"
                    );
                    failure_total += batch.len();
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        metrics::record_push_tokens(success_total as u64, failure_total as u64);
        info!(
            token_count = tokens.len(),
            success_count = success_total,
            failure_count = failure_total,
            "推送完成"
        );

        if first_error.is_none() && failure_total > 0 {
            first_error = Some(format!("{failure_total} 个 token 推送失败"));
        }

        ChannelOutcome::from_counts(
            Channel::Push,
            tokens.len(),
            success_total,
            first_error,
            start.elapsed(),
        )
    }
}

/// 去掉空白和重复的 token，保持原有顺序
fn dedupe_tokens(tokens: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && seen.insert(*t))
        .map(String::from)
        .collect()
}

/// 将业务数据转换为网关要求的字符串字典
///
/// 字符串原样保留，其它值编码为 JSON 文本；非对象负载放在 `payload` 键下。
pub fn stringify_data(data: Option<&serde_json::Value>) -> HashMap<String, String> {
    fn to_text(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    match data {
        None | Some(serde_json::Value::Null) => HashMap::new(),
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .map(|(key, value)| (key.clone(), to_text(value)))
            .collect(),
        Some(other) => HashMap::from([("payload".to_string(), to_text(other))]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{MockPushGateway, MulticastResponse, SendResponse};
    use crate::error::DispatchError;
    use crate::types::SendStatus;
    use serde_json::json;

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("token-{i}")).collect()
    }

    fn ok_response(n: usize) -> MulticastResponse {
        MulticastResponse {
            success_count: n,
            failure_count: 0,
            responses: (0..n)
                .map(|i| SendResponse {
                    success: true,
                    message_id: Some(format!("m-{i}")),
                    error: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_empty_tokens_never_calls_gateway() {
        let mut gateway = MockPushGateway::new();
        gateway.expect_max_batch_size().times(0);
        gateway.expect_send_multicast().times(0);

        let adapter = PushDispatchAdapter::new(Arc::new(gateway));
        let outcome = adapter.send(&[], "t", "b", None).await;

        assert_eq!(outcome.status, SendStatus::Skipped);
    }

    #[tokio::test]
    async fn test_disabled_gateway_is_skipped() {
        let adapter = PushDispatchAdapter::disabled();
        let outcome = adapter.send(&tokens(3), "t", "b", None).await;
        assert_eq!(outcome.status, SendStatus::Skipped);
        assert!(!adapter.is_enabled());
    }

    #[tokio::test]
    async fn test_batches_respect_gateway_limit() {
        let mut gateway = MockPushGateway::new();
        gateway.expect_max_batch_size().return_const(500usize);
        gateway
            .expect_send_multicast()
            .times(3)
            .returning(|msg| {
                assert!(msg.tokens.len() <= 500);
                Ok(ok_response(msg.tokens.len()))
            });

        let adapter = PushDispatchAdapter::new(Arc::new(gateway));
        let outcome = adapter.send(&tokens(1200), "t", "b", None).await;

        assert_eq!(outcome.status, SendStatus::Success);
        assert_eq!(outcome.attempted, 1200);
        assert_eq!(outcome.delivered, 1200);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_later_batches() {
        let mut gateway = MockPushGateway::new();
        gateway.expect_max_batch_size().return_const(2usize);

        let mut seq = mockall::Sequence::new();
        gateway
            .expect_send_multicast()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DispatchError::PushGateway("503".to_string())));
        gateway
            .expect_send_multicast()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|msg| Ok(ok_response(msg.tokens.len())));

        let adapter = PushDispatchAdapter::new(Arc::new(gateway));
        let outcome = adapter.send(&tokens(4), "t", "b", None).await;

        assert_eq!(outcome.status, SendStatus::Partial);
        assert_eq!(outcome.delivered, 2);
        assert!(outcome.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_duplicate_tokens_are_collapsed() {
        let mut gateway = MockPushGateway::new();
        gateway.expect_max_batch_size().return_const(500usize);
        gateway
            .expect_send_multicast()
            .times(1)
            .withf(|msg| msg.tokens == vec!["a".to_string(), "b".to_string()])
            .returning(|msg| Ok(ok_response(msg.tokens.len())));

        let adapter = PushDispatchAdapter::new(Arc::new(gateway));
        let input = vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
            "".to_string(),
        ];
        let outcome = adapter.send(&input, "t", "b", None).await;
        assert_eq!(outcome.attempted, 2);
    }

    #[test]
    fn test_stringify_data() {
        let data = json!({"jobId": 42, "company": "Acme", "tags": ["a"], "remote": true});
        let converted = stringify_data(Some(&data));

        assert_eq!(converted["jobId"], "42");
        assert_eq!(converted["company"], "Acme");
        assert_eq!(converted["tags"], "[\"a\"]");
        assert_eq!(converted["remote"], "true");

        assert!(stringify_data(None).is_empty());
        assert_eq!(stringify_data(Some(&json!("raw")))["payload"], "raw");
        assert_eq!(stringify_data(Some(&json!([1, 2])))["payload"], "[1,2]");
    }
}
