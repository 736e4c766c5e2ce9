//! 邮件队列连接管理
//!
//! 进程内至多建立一次队列连接：第一个调用方发起连接，并发调用方等待同一次尝试，
//! 之后所有调用共享同一个只读 channel。连接失败或未配置时进入 Degraded，
//! 不做重连，邮件渠道在进程生命周期内保持降级。
//!
//! ```text
//! Uninitialized ──> Connecting ──> Ready ──> Closed
//!        │               │
//!        └───────────────┴──> Degraded
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use placement_shared::config::QueueConfig;
use placement_shared::kafka::KafkaProducer;
use placement_shared::observability::metrics;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// 可发布消息的队列 channel
#[async_trait]
pub trait QueueChannel: Send + Sync {
    /// 以持久化方式向指定队列发布一条消息
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// 底层队列连接
#[async_trait]
pub trait QueueConnection: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// 一次成功连接得到的连接与 channel
pub struct QueueSession {
    pub connection: Arc<dyn QueueConnection>,
    pub channel: Arc<dyn QueueChannel>,
}

/// 队列连接器，负责建立一次连接
#[async_trait]
pub trait QueueConnector: Send + Sync {
    async fn connect(&self) -> Result<QueueSession>;
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Uninitialized,
    Connecting,
    Ready,
    /// 未配置或连接失败，终态
    Degraded,
    Closed,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::Degraded => "DEGRADED",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 队列连接管理器
pub struct QueueConnectionManager {
    connector: Option<Arc<dyn QueueConnector>>,
    queue_name: String,
    session: OnceCell<Option<QueueSession>>,
    state: Mutex<QueueState>,
    /// 会话是否已关闭，保证 channel 与连接只被关闭一次
    released: AtomicBool,
}

impl QueueConnectionManager {
    pub fn new(connector: Arc<dyn QueueConnector>, queue_name: impl Into<String>) -> Self {
        Self {
            connector: Some(connector),
            queue_name: queue_name.into(),
            session: OnceCell::new(),
            state: Mutex::new(QueueState::Uninitialized),
            released: AtomicBool::new(false),
        }
    }

    /// 未配置队列的管理器，首次获取 channel 时进入 Degraded
    pub fn unconfigured(queue_name: impl Into<String>) -> Self {
        Self {
            connector: None,
            queue_name: queue_name.into(),
            session: OnceCell::new(),
            state: Mutex::new(QueueState::Uninitialized),
            released: AtomicBool::new(false),
        }
    }

    /// 根据配置创建，未配置 brokers 时返回未配置的管理器
    pub fn from_config(config: &QueueConfig) -> Self {
        if config.is_configured() {
            Self::new(
                Arc::new(KafkaQueueConnector::new(config.clone())),
                config.topic.clone(),
            )
        } else {
            Self::unconfigured(config.topic.clone())
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn state(&self) -> QueueState {
        *self.state.lock()
    }

    /// 获取共享的 channel
    ///
    /// 首次调用时建立连接；Degraded 或 Closed 时返回 `None`。
    pub async fn get_channel(&self) -> Option<Arc<dyn QueueChannel>> {
        if self.state() == QueueState::Closed {
            return None;
        }

        let session = self.session.get_or_init(|| self.establish()).await;

        if self.state() == QueueState::Closed {
            // close() 可能在会话写入前执行，此时由这里释放
            if let Some(session) = session {
                self.close_session(session).await;
            }
            return None;
        }

        session.as_ref().map(|s| Arc::clone(&s.channel))
    }

    async fn establish(&self) -> Option<QueueSession> {
        let Some(connector) = self.connector.as_ref() else {
            warn!(queue = %self.queue_name, "邮件队列未配置，邮件渠道降级");
            self.transition(QueueState::Degraded);
            return None;
        };

        self.transition(QueueState::Connecting);
        info!(queue = %self.queue_name, "正在连接邮件队列");

        match connector.connect().await {
            Ok(session) => {
                if self.state() == QueueState::Closed {
                    // 连接过程中已被关闭，新建的会话不会再被使用
                    warn!(queue = %self.queue_name, "连接建立时队列已关闭，释放新连接");
                    self.close_session(&session).await;
                    return None;
                }

                self.transition(QueueState::Ready);
                info!(queue = %self.queue_name, "邮件队列连接就绪");
                Some(session)
            }
            Err(e) => {
                error!(queue = %self.queue_name, error = %e, "邮件队列连接失败，邮件渠道降级");
                self.transition(QueueState::Degraded);
                None
            }
        }
    }

    /// 关闭 channel 与连接
    ///
    /// 两者都会尝试关闭，失败只记录日志。重复调用为空操作。
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == QueueState::Closed {
                return;
            }
            *state = QueueState::Closed;
        }
        metrics::record_queue_transition(QueueState::Closed.as_str());

        let Some(Some(session)) = self.session.get() else {
            debug!(queue = %self.queue_name, "队列未建立连接，无需关闭");
            return;
        };

        self.close_session(session).await;
    }

    /// 依次关闭 channel 与连接，前者失败不影响后者
    async fn close_session(&self, session: &QueueSession) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = session.channel.close().await {
            warn!(queue = %self.queue_name, error = %e, "关闭队列 channel 失败");
        }
        if let Err(e) = session.connection.close().await {
            warn!(queue = %self.queue_name, error = %e, "关闭队列连接失败");
        }

        info!(queue = %self.queue_name, "邮件队列连接已关闭");
    }

    fn transition(&self, next: QueueState) {
        let mut state = self.state.lock();
        // Closed 是终态，连接过程中被关闭时保持 Closed
        if *state == QueueState::Closed {
            return;
        }
        *state = next;
        drop(state);

        metrics::record_queue_transition(next.as_str());
    }
}

// ---------------------------------------------------------------------------
// Kafka 实现
// ---------------------------------------------------------------------------

/// 基于 Kafka 的队列连接器
///
/// 连接时拉取 topic 元数据，broker 不可达会在首次使用时暴露并降级，
/// 而不是等到第一条消息超时。
pub struct KafkaQueueConnector {
    config: QueueConfig,
}

impl KafkaQueueConnector {
    pub fn new(config: QueueConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl QueueConnector for KafkaQueueConnector {
    async fn connect(&self) -> Result<QueueSession> {
        let producer = KafkaProducer::new(&self.config)?;
        producer
            .probe_topic(
                &self.config.topic,
                Duration::from_millis(self.config.connect_timeout_ms),
            )
            .await?;

        let flush_timeout = Duration::from_millis(self.config.message_timeout_ms);

        Ok(QueueSession {
            connection: Arc::new(KafkaQueueConnection {
                producer: producer.clone(),
            }),
            channel: Arc::new(KafkaQueueChannel {
                producer,
                flush_timeout,
            }),
        })
    }
}

struct KafkaQueueChannel {
    producer: KafkaProducer,
    flush_timeout: Duration,
}

#[async_trait]
impl QueueChannel for KafkaQueueChannel {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.producer.send(queue, None, payload).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.producer.flush(self.flush_timeout).await?;
        Ok(())
    }
}

struct KafkaQueueConnection {
    producer: KafkaProducer,
}

#[async_trait]
impl QueueConnection for KafkaQueueConnection {
    async fn close(&self) -> Result<()> {
        let pending = self.producer.in_flight_count();
        if pending > 0 {
            warn!(pending, "关闭时仍有未确认的邮件消息，将被丢弃");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopChannel;

    #[async_trait]
    impl QueueChannel for NoopChannel {
        async fn publish(&self, _queue: &str, _payload: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Err(DispatchError::Queue("channel already closed".to_string()))
        }
    }

    struct CountingConnection {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QueueConnection for CountingConnection {
        async fn close(&self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SlowConnector {
        attempts: AtomicUsize,
        closed: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl QueueConnector for SlowConnector {
        async fn connect(&self) -> Result<QueueSession> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(DispatchError::Queue("connection refused".to_string()));
            }
            Ok(QueueSession {
                connection: Arc::new(CountingConnection {
                    closed: Arc::clone(&self.closed),
                }),
                channel: Arc::new(NoopChannel),
            })
        }
    }

    fn connector(fail: bool) -> Arc<SlowConnector> {
        Arc::new(SlowConnector {
            attempts: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            fail,
        })
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_connect() {
        let connector = connector(false);
        let manager = Arc::new(QueueConnectionManager::new(
            connector.clone(),
            "placement.notifications",
        ));
        assert_eq!(manager.state(), QueueState::Uninitialized);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_channel().await.is_some() })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), QueueState::Ready);
    }

    #[tokio::test]
    async fn test_failed_connect_degrades_without_retry() {
        let connector = connector(true);
        let manager = QueueConnectionManager::new(connector.clone(), "q");

        assert!(manager.get_channel().await.is_none());
        assert!(manager.get_channel().await.is_none());

        assert_eq!(manager.state(), QueueState::Degraded);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_degrades() {
        let manager = QueueConnectionManager::unconfigured("q");
        assert!(manager.get_channel().await.is_none());
        assert_eq!(manager.state(), QueueState::Degraded);
    }

    #[tokio::test]
    async fn test_close_attempts_connection_even_if_channel_close_fails() {
        let connector = connector(false);
        let manager = QueueConnectionManager::new(connector.clone(), "q");
        assert!(manager.get_channel().await.is_some());

        manager.close().await;
        manager.close().await;

        assert_eq!(manager.state(), QueueState::Closed);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
        assert!(manager.get_channel().await.is_none());
    }

    #[tokio::test]
    async fn test_close_before_connect_never_connects() {
        let connector = connector(false);
        let manager = QueueConnectionManager::new(connector.clone(), "q");

        manager.close().await;

        assert!(manager.get_channel().await.is_none());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_during_connect_releases_new_session() {
        let connector = connector(false);
        let manager = Arc::new(QueueConnectionManager::new(connector.clone(), "q"));

        let pending = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_channel().await.is_some() })
        };

        // 连接器耗时 20ms，此时连接仍在建立中
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.close().await;

        assert!(!pending.await.unwrap());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), QueueState::Closed);
        assert!(manager.get_channel().await.is_none());
    }

    #[test]
    fn test_from_config_without_brokers_is_unconfigured() {
        let manager = QueueConnectionManager::from_config(&QueueConfig::default());
        assert!(manager.connector.is_none());
        assert_eq!(manager.queue_name(), "placement.notifications");
    }
}
