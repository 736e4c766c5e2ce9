//! 分发请求与结果类型

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Channel, NotificationType};

/// 通知分发请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    /// 目标用户 ID 列表
    pub recipient_ids: Vec<String>,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    /// 透传给推送和站内信的业务数据
    pub data: Option<serde_json::Value>,
    /// 要投递的渠道，默认全部
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
}

fn default_channels() -> Vec<Channel> {
    Channel::ALL.to_vec()
}

impl NotifyRequest {
    /// 创建请求，默认投递到全部渠道
    pub fn new(
        recipient_ids: impl IntoIterator<Item = impl Into<String>>,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_ids: recipient_ids.into_iter().map(Into::into).collect(),
            notification_type,
            title: title.into(),
            message: message.into(),
            data: None,
            channels: default_channels(),
        }
    }

    /// 设置业务数据
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// 指定投递渠道，重复项会被去掉
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut seen = HashSet::new();
        self.channels = channels
            .into_iter()
            .filter(|channel| seen.insert(*channel))
            .collect();
        self
    }

    /// 去重后的渠道，保持原有顺序
    ///
    /// `channels` 是公开字段，反序列化或直接构造时可能包含重复项。
    pub fn unique_channels(&self) -> Vec<Channel> {
        let mut seen = HashSet::new();
        self.channels
            .iter()
            .copied()
            .filter(|channel| seen.insert(*channel))
            .collect()
    }

    /// 去重后的收件人 ID，保持原有顺序，空白 ID 被忽略
    pub fn unique_recipient_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.recipient_ids
            .iter()
            .filter(|id| !id.trim().is_empty())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }
}

/// 单渠道发送状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    /// 全部收件人投递成功
    Success,
    /// 部分收件人投递成功
    Partial,
    /// 没有任何收件人投递成功
    Failed,
    /// 已跳过（渠道未配置、不可用或没有可投递的目标）
    Skipped,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

/// 单渠道投递结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOutcome {
    pub channel: Channel,
    pub status: SendStatus,
    /// 尝试投递的目标数（收件人、邮件或推送 token）
    pub attempted: usize,
    /// 确认投递成功的目标数
    pub delivered: usize,
    /// 第一个失败原因，或跳过原因
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ChannelOutcome {
    /// 按成功数推导状态
    pub fn from_counts(
        channel: Channel,
        attempted: usize,
        delivered: usize,
        error: Option<String>,
        duration: Duration,
    ) -> Self {
        let status = if attempted == 0 {
            SendStatus::Skipped
        } else if delivered >= attempted {
            SendStatus::Success
        } else if delivered == 0 {
            SendStatus::Failed
        } else {
            SendStatus::Partial
        };

        Self {
            channel,
            status,
            attempted,
            delivered: delivered.min(attempted),
            error,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// 创建成功结果
    pub fn success(channel: Channel, delivered: usize, duration: Duration) -> Self {
        Self::from_counts(channel, delivered, delivered, None, duration)
    }

    /// 创建失败结果
    pub fn failed(
        channel: Channel,
        attempted: usize,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            channel,
            status: SendStatus::Failed,
            attempted,
            delivered: 0,
            error: Some(error.into()),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// 创建跳过结果
    pub fn skipped(channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            channel,
            status: SendStatus::Skipped,
            attempted: 0,
            delivered: 0,
            error: Some(reason.into()),
            duration_ms: 0,
        }
    }

    /// 未投递成功的目标数
    pub fn failed_count(&self) -> usize {
        self.attempted.saturating_sub(self.delivered)
    }
}

/// 一次 notify 调用的汇总结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub notification_type: NotificationType,
    /// 去重后请求的收件人数
    pub requested: usize,
    /// 实际解析到的收件人数
    pub resolved: usize,
    pub outcomes: Vec<ChannelOutcome>,
    pub duration_ms: u64,
    pub dispatched_at: DateTime<Utc>,
}

impl DispatchReport {
    /// 没有任何收件人时的空结果
    pub fn empty(notification_type: NotificationType, requested: usize) -> Self {
        Self {
            notification_type,
            requested,
            resolved: 0,
            outcomes: Vec::new(),
            duration_ms: 0,
            dispatched_at: Utc::now(),
        }
    }

    /// 是否为空操作
    pub fn is_noop(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// 获取指定渠道的结果
    pub fn outcome(&self, channel: Channel) -> Option<&ChannelOutcome> {
        self.outcomes.iter().find(|o| o.channel == channel)
    }

    /// 所有渠道都成功
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == SendStatus::Success)
    }

    /// 失败或部分失败的渠道数
    pub fn failure_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SendStatus::Failed | SendStatus::Partial))
            .count()
    }
}
