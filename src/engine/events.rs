// ==========================================
// 广播排播系统 - 审计事件发布
// ==========================================
// 职责: 定义审计事件发布 trait，实现依赖倒置
// 说明: Engine 层定义 trait，Repository 层实现持久化适配器
// ==========================================

use crate::domain::audit::AuditEvent;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// 发布错误
pub type PublishError = Box<dyn Error + Send + Sync>;

// ==========================================
// 事件发布 Trait
// ==========================================

/// 审计事件发布者 Trait
///
/// # 实现说明
/// - `AuditEventRepository` 将事件写入 audit_event 表
/// - `InMemoryEventPublisher` 用于测试与 CLI 输出
pub trait AuditEventPublisher: Send + Sync {
    /// 发布审计事件
    ///
    /// # 返回
    /// - `Ok(event_id)`: 已发布的事件ID（如果支持）或空字符串
    /// - `Err`: 发布失败
    fn publish(&self, event: &AuditEvent) -> Result<String, PublishError>;
}

/// 空操作事件发布者
///
/// 用于不需要事件发布的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl AuditEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: &AuditEvent) -> Result<String, PublishError> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - log_id={}, event_type={}",
            event.log_id,
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 内存事件发布者
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已发布事件的副本
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditEventPublisher for InMemoryEventPublisher {
    fn publish(&self, event: &AuditEvent) -> Result<String, PublishError> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| format!("锁获取失败: {}", e))?;
        events.push(event.clone());
        Ok(event.event_id.clone())
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn AuditEventPublisher>> 的使用
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn AuditEventPublisher>>,
}

impl OptionalEventPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn AuditEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件（如果有发布者）
    pub fn publish(&self, event: &AuditEvent) -> Result<String, PublishError> {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => {
                tracing::debug!(
                    "OptionalEventPublisher: 未配置发布者，跳过事件 - log_id={}, event_type={}",
                    event.log_id,
                    event.event_type.as_str()
                );
                Ok(String::new())
            }
        }
    }

    /// 按顺序发布一批事件
    ///
    /// # 返回
    /// 发布失败的事件数（失败不中断后续发布）
    pub fn publish_all(&self, events: &[AuditEvent]) -> usize {
        let mut failures = 0;
        for event in events {
            if let Err(e) = self.publish(event) {
                failures += 1;
                tracing::error!(
                    log_id = %event.log_id,
                    event_type = event.event_type.as_str(),
                    error = %e,
                    "审计事件发布失败"
                );
            }
        }
        failures
    }

    /// 发布一批事件, 有任一失败即返回错误
    ///
    /// 失败不中断后续发布; 错误中包含失败数
    pub fn publish_all_required(&self, events: &[AuditEvent]) -> Result<(), PublishError> {
        let failures = self.publish_all(events);
        if failures > 0 {
            return Err(format!("{} / {} 条审计事件发布失败", failures, events.len()).into());
        }
        Ok(())
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}
