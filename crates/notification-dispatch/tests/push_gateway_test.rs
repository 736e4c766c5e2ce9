//! 推送网关 HTTP 协议测试

use std::sync::Arc;
use std::time::Duration;

use notification_dispatch::SendStatus;
use notification_dispatch::channels::{HttpPushGateway, PushDispatchAdapter};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(server: &MockServer, batch_limit: usize) -> HttpPushGateway {
    HttpPushGateway::new(
        format!("{}/v1/multicast", server.uri()),
        "server-key",
        batch_limit,
        Duration::from_secs(5),
    )
    .unwrap()
}

fn tokens(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("device-{i}")).collect()
}

#[tokio::test]
async fn test_multicast_request_shape() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/multicast"))
        .and(header("authorization", "Bearer server-key"))
        .and(body_partial_json(json!({
            "tokens": ["device-0", "device-1"],
            "notification": {"title": "Offer", "body": "You got an offer"},
            "data": {"offerId": "9", "company": "Acme"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "successCount": 1,
            "failureCount": 1,
            "responses": [
                {"success": true, "messageId": "m-0"},
                {"success": false, "error": {"code": "invalid-registration-token"}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = PushDispatchAdapter::new(Arc::new(gateway(&server, 500)));
    let data = json!({"offerId": 9, "company": "Acme"});
    let outcome = adapter
        .send(&tokens(2), "Offer", "You got an offer", Some(&data))
        .await;

    assert_eq!(outcome.status, SendStatus::Partial);
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.failed_count(), 1);
}

#[tokio::test]
async fn test_tokens_split_by_batch_limit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/multicast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "successCount": 2,
            "failureCount": 0,
            "responses": []
        })))
        .expect(3)
        .mount(&server)
        .await;

    let adapter = PushDispatchAdapter::new(Arc::new(gateway(&server, 2)));
    let outcome = adapter.send(&tokens(5), "t", "b", None).await;

    // 最后一批只有 1 个 token，但网关固定返回 2，成功数以 attempted 为上限
    assert_eq!(outcome.attempted, 5);
    assert_eq!(outcome.status, SendStatus::Success);
}

#[tokio::test]
async fn test_gateway_error_status_is_swallowed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/multicast"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = PushDispatchAdapter::new(Arc::new(gateway(&server, 500)));
    let outcome = adapter.send(&tokens(3), "t", "b", None).await;

    assert_eq!(outcome.status, SendStatus::Failed);
    assert!(outcome.error.unwrap().contains("503"));
}

#[tokio::test]
async fn test_empty_tokens_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let adapter = PushDispatchAdapter::new(Arc::new(gateway(&server, 500)));
    let outcome = adapter.send(&[], "t", "b", None).await;

    assert_eq!(outcome.status, SendStatus::Skipped);
}
