//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//!
//! 通知各渠道的失败在业务侧被吞掉，不会抛给调用方，
//! 跨调用观察投递失败依赖这里的计数器。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "notification_dispatch_total",
        "Total number of notify calls by outcome"
    );
    metrics::describe_counter!(
        "notification_channel_dispatch_total",
        "Channel dispatch attempts by channel and status"
    );
    metrics::describe_counter!(
        "notification_channel_recipients_total",
        "Recipients handled per channel, split into delivered and failed"
    );
    metrics::describe_histogram!(
        "notification_channel_duration_seconds",
        "Channel dispatch duration in seconds"
    );
    metrics::describe_counter!(
        "notification_push_tokens_total",
        "Push tokens reported by the gateway as succeeded or failed"
    );
    metrics::describe_counter!(
        "queue_connection_transitions_total",
        "Queue connection state transitions"
    );
    metrics::describe_counter!(
        "announcement_batches_total",
        "Announcement pages dispatched to the email queue"
    );
    metrics::describe_counter!(
        "announcement_runs_total",
        "Announcement broadcasts by final status"
    );
    metrics::describe_counter!(
        "email_worker_messages_total",
        "Email jobs consumed by the worker by outcome"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 通知链路指标
// ============================================================================

/// 记录一次 notify 调用的整体结果（`dispatched` / `noop` / `resolution_failed`）
#[inline]
pub fn record_notify(notification_type: &str, outcome: &str) {
    metrics::counter!(
        "notification_dispatch_total",
        "type" => notification_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录单个渠道的投递结果
#[inline]
pub fn record_channel_dispatch(
    channel: &str,
    status: &str,
    delivered: u64,
    failed: u64,
    duration_secs: f64,
) {
    metrics::counter!(
        "notification_channel_dispatch_total",
        "channel" => channel.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::counter!(
        "notification_channel_recipients_total",
        "channel" => channel.to_string(),
        "result" => "delivered"
    )
    .increment(delivered);

    metrics::counter!(
        "notification_channel_recipients_total",
        "channel" => channel.to_string(),
        "result" => "failed"
    )
    .increment(failed);

    metrics::histogram!(
        "notification_channel_duration_seconds",
        "channel" => channel.to_string()
    )
    .record(duration_secs);
}

/// 记录推送网关返回的 token 级结果
#[inline]
pub fn record_push_tokens(success: u64, failure: u64) {
    metrics::counter!("notification_push_tokens_total", "result" => "success").increment(success);
    metrics::counter!("notification_push_tokens_total", "result" => "failure").increment(failure);
}

/// 记录队列连接状态迁移
#[inline]
pub fn record_queue_transition(state: &str) {
    metrics::counter!(
        "queue_connection_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// 记录一页公告收件人已投递
#[inline]
pub fn record_announcement_batch(size: u64) {
    metrics::counter!("announcement_batches_total").increment(1);
    metrics::counter!("announcement_recipients_total").increment(size);
}

/// 记录一次公告广播的最终状态（`completed` / `aborted`）
#[inline]
pub fn record_announcement_run(status: &str) {
    metrics::counter!("announcement_runs_total", "status" => status.to_string()).increment(1);
}

/// 记录邮件 worker 处理的单条消息
#[inline]
pub fn record_email_worker_message(outcome: &str) {
    metrics::counter!(
        "email_worker_messages_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_notify("APPLICATION_STATUS_CHANGED", "dispatched");
        record_channel_dispatch("EMAIL", "SUCCESS", 2, 0, 0.01);
        record_push_tokens(3, 1);
        record_queue_transition("READY");
        record_announcement_batch(500);
        record_announcement_run("completed");
        record_email_worker_message("sent");
        assert!(get_handle().is_none());
    }
}
