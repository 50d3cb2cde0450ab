// ==========================================
// 广播排播系统 - 审计事件领域模型
// ==========================================
// 红线: 节目单的每次写入必须产生审计事件
// 用途: 审计追踪,前端审计日志展示
// 对齐: audit_event 表
// ==========================================

use crate::domain::types::AuditEventType;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// AuditEvent - 审计事件
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,            // 事件ID (UUID)
    pub log_id: String,              // 关联节目单
    pub event_type: AuditEventType,  // 事件类型
    pub slot_position: Option<u32>,  // 关联时段 (状态迁移类事件为 None)
    pub actor: String,               // 操作人 (自动排程为 "scheduler")
    pub timestamp: NaiveDateTime,    // 事件时间
    pub message: String,             // 描述
    pub metadata: JsonValue,         // 附加信息 (JSON)
}

impl AuditEvent {
    /// 创建新的审计事件
    ///
    /// # 参数
    /// - `log_id`: 节目单ID
    /// - `event_type`: 事件类型
    /// - `actor`: 操作人
    /// - `message`: 描述
    pub fn new(
        log_id: &str,
        event_type: AuditEventType,
        actor: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            log_id: log_id.to_string(),
            event_type,
            slot_position: None,
            actor: actor.to_string(),
            timestamp: chrono::Utc::now().naive_utc(),
            message: message.into(),
            metadata: JsonValue::Null,
        }
    }

    /// 设置关联时段
    pub fn at_slot(mut self, position: u32) -> Self {
        self.slot_position = Some(position);
        self
    }

    /// 设置附加信息 (转换为JSON)
    pub fn with_metadata<T: Serialize>(mut self, metadata: &T) -> Self {
        self.metadata = serde_json::to_value(metadata).unwrap_or(JsonValue::Null);
        self
    }

    /// 生成展示用ID
    pub fn get_display_id(&self) -> String {
        let short = self.event_id.get(..8).unwrap_or(&self.event_id);
        format!("{}_{}", self.log_id, short)
    }
}
