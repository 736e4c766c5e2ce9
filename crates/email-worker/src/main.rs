//! 邮件 worker 服务
//!
//! 消费邮件 topic 并通过邮件服务发信，收到 Ctrl+C 或 SIGTERM 后优雅退出。

use anyhow::Result;
use email_worker::consumer::EmailConsumer;
use email_worker::sender::transport_from_config;
use placement_shared::config::AppConfig;
use placement_shared::observability;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load("email-worker").unwrap_or_else(|e| {
        eprintln!("加载配置失败，使用默认配置: {e}");
        AppConfig {
            service_name: "email-worker".to_string(),
            ..AppConfig::default()
        }
    });

    let mut obs_config = config.observability.clone();
    obs_config.service_name = config.service_name.clone();
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        topic = %config.queue.topic,
        "Starting email-worker..."
    );

    if !config.queue.is_configured() {
        anyhow::bail!("未配置 Kafka brokers（PLACEMENT__QUEUE__BROKERS），email-worker 无法启动");
    }

    let transport = transport_from_config(&config.mail)?;
    let consumer = EmailConsumer::new(&config.queue, transport)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_handle = tokio::spawn(consumer.run(shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match consumer_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "邮件消费者异常退出"),
        Err(e) => error!(error = %e, "邮件消费者任务异常"),
    }

    info!("email-worker shutdown complete");
    Ok(())
}

/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
