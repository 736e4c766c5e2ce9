//! 通知引擎装配
//!
//! 根据 [`AppConfig`] 组装分发器、公告广播器和站内通知存储，
//! 进程退出前调用 [`NotificationEngine::shutdown`] 关闭邮件队列。

use std::sync::Arc;

use placement_shared::config::AppConfig;
use placement_shared::database::Database;
use sqlx::PgPool;
use tracing::info;

use crate::announcement::AnnouncementBroadcaster;
use crate::channels::{EmailDispatchAdapter, HttpPushGateway, PushDispatchAdapter};
use crate::directory::{PgRecipientDirectory, RecipientDirectory};
use crate::dispatcher::NotificationDispatcher;
use crate::error::Result;
use crate::queue::QueueConnectionManager;
use crate::store::{NotificationStore, PgNotificationStore};

/// 组装完成的通知引擎
pub struct NotificationEngine {
    pub dispatcher: Arc<NotificationDispatcher>,
    pub broadcaster: Arc<AnnouncementBroadcaster>,
    /// 站内信读接口，供 HTTP 层查询和标记已读
    pub store: Arc<dyn NotificationStore>,
    queue: Arc<QueueConnectionManager>,
}

impl NotificationEngine {
    /// 连接数据库、执行迁移并组装
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let database = Database::connect(&config.database).await?;
        database.run_migrations().await?;
        Self::build(config, database.pool().clone())
    }

    /// 基于 PostgreSQL 和配置中的队列、推送网关组装
    pub fn build(config: &AppConfig, pool: PgPool) -> Result<Self> {
        let directory: Arc<dyn RecipientDirectory> =
            Arc::new(PgRecipientDirectory::new(pool.clone()));
        let store: Arc<dyn NotificationStore> = Arc::new(PgNotificationStore::new(pool));
        let queue = Arc::new(QueueConnectionManager::from_config(&config.queue));

        let push = match HttpPushGateway::from_config(&config.push)? {
            Some(gateway) => PushDispatchAdapter::new(Arc::new(gateway)),
            None => PushDispatchAdapter::disabled(),
        };

        let engine = Self::assemble(directory, store, queue, push, config);

        info!(
            queue = %engine.queue.queue_name(),
            queue_configured = config.queue.is_configured(),
            push_configured = config.push.is_configured(),
            announcement_batch_size = engine.broadcaster.batch_size(),
            "通知引擎已初始化"
        );
        Ok(engine)
    }

    /// 用给定的组件组装，便于替换存储和队列实现
    pub fn assemble(
        directory: Arc<dyn RecipientDirectory>,
        store: Arc<dyn NotificationStore>,
        queue: Arc<QueueConnectionManager>,
        push: PushDispatchAdapter,
        config: &AppConfig,
    ) -> Self {
        let email = EmailDispatchAdapter::new(Arc::clone(&queue));

        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&directory),
            Arc::clone(&store),
            email.clone(),
            push,
        ));

        let broadcaster = Arc::new(
            AnnouncementBroadcaster::new(directory, email).with_config(&config.announcement),
        );

        Self {
            dispatcher,
            broadcaster,
            store,
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<QueueConnectionManager> {
        &self.queue
    }

    /// 关闭邮件队列连接
    pub async fn shutdown(&self) {
        self.queue.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, NotificationType};
    use crate::queue::QueueState;
    use crate::test_utils::{
        MemoryNotificationStore, MemoryQueueConnector, MemoryRecipientDirectory, recipient,
    };
    use crate::types::{NotifyRequest, SendStatus};
    use placement_shared::config::AnnouncementConfig;

    #[tokio::test]
    async fn test_assembled_engine_shares_queue() {
        let connector = Arc::new(MemoryQueueConnector::new());
        let queue = Arc::new(QueueConnectionManager::new(
            connector.clone(),
            "placement.notifications",
        ));
        let config = AppConfig {
            announcement: AnnouncementConfig { batch_size: 2 },
            ..AppConfig::default()
        };

        let engine = NotificationEngine::assemble(
            Arc::new(MemoryRecipientDirectory::with_users([
                recipient("u1"),
                recipient("u2"),
                recipient("u3"),
            ])),
            Arc::new(MemoryNotificationStore::new()),
            queue,
            PushDispatchAdapter::disabled(),
            &config,
        );
        assert_eq!(engine.broadcaster.batch_size(), 2);

        let report = engine
            .dispatcher
            .notify(
                NotifyRequest::new(["u1"], NotificationType::InterviewScheduled, "t", "m")
                    .with_channels([Channel::InApp, Channel::Email]),
            )
            .await
            .unwrap();
        assert!(report.all_succeeded());

        let summary = engine.broadcaster.broadcast("Notice", "Body").await;
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.queued, 3);

        // 分发器与广播器共用同一个连接
        assert_eq!(connector.connect_attempts(), 1);
        assert_eq!(connector.published().len(), 4);

        let page = engine.store.list_for_user("u1", 20, 0).await.unwrap();
        assert_eq!(page.unread_count, 1);

        engine.shutdown().await;
        assert_eq!(engine.queue().state(), QueueState::Closed);
        assert_eq!(connector.channel_closed(), 1);

        let after_close = engine
            .dispatcher
            .notify(
                NotifyRequest::new(["u2"], NotificationType::JobClosed, "t", "m")
                    .with_channels([Channel::Email]),
            )
            .await
            .unwrap();
        assert_eq!(
            after_close.outcome(Channel::Email).unwrap().status,
            SendStatus::Skipped
        );
    }
}
