//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一消息序列化、错误映射和优雅关闭语义。
//!
//! 邮件任务 topic 作为持久化队列使用：生产者使用 `acks=all` 并开启幂等，
//! 只有在全部 ISR 副本落盘后才视为投递成功。

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::PlacementError;

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, PlacementError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| PlacementError::Kafka(format!("负载反序列化失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer`，内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    message_timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// librdkafka 的连接是惰性建立的，创建成功并不代表 broker 可达，
    /// 需要配合 [`KafkaProducer::probe_topic`] 判断。
    pub fn new(config: &QueueConfig) -> Result<Self, PlacementError> {
        let brokers = config
            .brokers
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| PlacementError::Kafka("未配置 Kafka brokers".to_string()))?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| PlacementError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            message_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    /// 拉取 topic 元数据，确认 broker 可达且 topic 存在
    ///
    /// `fetch_metadata` 是阻塞调用，放到 blocking 线程池执行。
    pub async fn probe_topic(&self, topic: &str, timeout: Duration) -> Result<(), PlacementError> {
        let producer = self.producer.clone();
        let topic_name = topic.to_string();

        let metadata = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(Some(&topic_name), timeout)
        })
        .await
        .map_err(|e| PlacementError::Internal(format!("元数据探测任务异常: {e}")))?
        .map_err(|e| PlacementError::Kafka(format!("获取 topic 元数据失败: {e}")))?;

        if let Some(err) = metadata.topics().first().and_then(|t| t.error()) {
            return Err(PlacementError::Kafka(format!(
                "topic {topic} 不可用: {err:?}"
            )));
        }

        debug!(topic, brokers = metadata.brokers().len(), "topic 元数据探测成功");
        Ok(())
    }

    /// 发送原始字节消息
    ///
    /// `key` 为空时由分区器轮询分配分区。
    pub async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(i32, i64), PlacementError> {
        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, self.message_timeout)
            .await
            .map_err(|(e, _)| PlacementError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 刷出本地缓冲区中尚未确认的消息
    pub async fn flush(&self, timeout: Duration) -> Result<(), PlacementError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| PlacementError::Internal(format!("flush 任务异常: {e}")))?
            .map_err(|e| PlacementError::Kafka(format!("flush 失败: {e}")))
    }

    /// 当前仍在本地队列中等待投递的消息数
    pub fn in_flight_count(&self) -> i32 {
        self.producer.in_flight_count()
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
///
/// 封装 `StreamConsumer` 并提供基于 `watch` channel 的优雅关闭语义。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    pub fn new(config: &QueueConfig) -> Result<Self, PlacementError> {
        let brokers = config
            .brokers
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| PlacementError::Kafka("未配置 Kafka brokers".to_string()))?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| PlacementError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %brokers, group_id = %config.consumer_group, "Kafka 消费者已初始化");
        Ok(Self { consumer })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), PlacementError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| PlacementError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// handler 返回错误只记录日志而不中断循环；关闭信号变为 `true` 时退出，
    /// 正在执行的 handler 会自然完成。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), PlacementError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    match msg_result {
                        Ok(borrowed_msg) => {
                            let msg = ConsumerMessage::from_borrowed(&borrowed_msg);
                            debug!(
                                topic = %msg.topic,
                                partition = msg.partition,
                                offset = msg.offset,
                                "收到 Kafka 消息"
                            );

                            if let Err(e) = handler(msg).await {
                                error!(error = %e, "处理 Kafka 消息失败");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                        }
                    }
                }
            }
        }
    }
}
