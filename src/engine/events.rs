// ==========================================
// 压机工具管理系统 - 引擎层通知
// ==========================================
// 职责: 定义通知发送 trait，实现依赖倒置
// 红线: 通知失败只记日志, 不影响核心操作结果
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

/// 通知发送错误
pub type SinkError = Box<dyn Error + Send + Sync>;

// ==========================================
// 通知内容
// ==========================================

/// 面向人的事件摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub actor_id: i64,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, actor_id: i64) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            actor_id,
        }
    }
}

// ==========================================
// 通知发送 Trait
// ==========================================

/// 通知接收方 (外部协作者, 如动态信息流)
///
/// # 实现说明
/// - 一次调用, 发出即忘
/// - 返回的错误只会被记录, 不会传给引擎调用方
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, body: &str, actor_id: i64) -> Result<(), SinkError>;
}

/// 空操作通知接收方
///
/// 用于不需要通知的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpNotificationSink;

impl NotificationSink for NoOpNotificationSink {
    fn notify(&self, title: &str, _body: &str, actor_id: i64) -> Result<(), SinkError> {
        tracing::debug!(
            "NoOpNotificationSink: 跳过通知 - title={}, actor_id={}",
            title,
            actor_id
        );
        Ok(())
    }
}

/// 可选的通知包装
///
/// 简化 Option<Arc<dyn NotificationSink>> 的使用, 并吞掉发送失败
#[derive(Clone)]
pub struct OptionalNotifier {
    inner: Option<Arc<dyn NotificationSink>>,
}

impl OptionalNotifier {
    /// 创建带接收方的实例
    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        Self { inner: Some(sink) }
    }

    /// 创建空实例（不发送通知）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 尽力发送
    ///
    /// # 返回
    /// - true: 已成功交付给接收方
    /// - false: 未配置接收方或发送失败 (已记录 warn 日志)
    pub fn notify(&self, notification: &Notification) -> bool {
        match &self.inner {
            Some(sink) => {
                match sink.notify(&notification.title, &notification.body, notification.actor_id) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            "通知发送失败(已忽略): title={}, actor_id={}, error={}",
                            notification.title,
                            notification.actor_id,
                            e
                        );
                        false
                    }
                }
            }
            None => {
                tracing::debug!(
                    "OptionalNotifier: 未配置接收方，跳过通知 - title={}",
                    notification.title
                );
                false
            }
        }
    }

    /// 检查是否配置了接收方
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalNotifier {
    fn default() -> Self {
        Self::none()
    }
}
