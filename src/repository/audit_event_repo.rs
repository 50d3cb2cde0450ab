// ==========================================
// 广播排播系统 - 审计事件仓储
// ==========================================
// 对齐: audit_event 表
// 红线: 仅追加,不提供修改与删除
// ==========================================

use crate::domain::audit::AuditEvent;
use crate::domain::types::AuditEventType;
use crate::engine::events::{AuditEventPublisher, PublishError};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::invalid_column;
use rusqlite::{params, Connection, Row};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};

pub struct AuditEventRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AuditEventRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加审计事件
    ///
    /// # 返回
    /// - `Ok(event_id)`: 成功插入
    pub fn insert(&self, event: &AuditEvent) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO audit_event (
                event_id, log_id, event_type, slot_position, actor,
                event_ts, message, metadata_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.event_id,
                event.log_id,
                event.event_type.as_str(),
                event.slot_position,
                event.actor,
                event.timestamp,
                event.message,
                Self::metadata_text(&event.metadata),
            ],
        )?;
        Ok(event.event_id.clone())
    }

    /// 批量追加 (单事务)
    pub fn batch_insert(&self, events: &[AuditEvent]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO audit_event (
                    event_id, log_id, event_type, slot_position, actor,
                    event_ts, message, metadata_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for event in events {
                stmt.execute(params![
                    event.event_id,
                    event.log_id,
                    event.event_type.as_str(),
                    event.slot_position,
                    event.actor,
                    event.timestamp,
                    event.message,
                    Self::metadata_text(&event.metadata),
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// 查询节目单的全部事件 (按写入顺序)
    pub fn list_by_log(&self, log_id: &str) -> RepositoryResult<Vec<AuditEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT event_id, log_id, event_type, slot_position, actor,
                   event_ts, message, metadata_json
            FROM audit_event
            WHERE log_id = ?1
            ORDER BY rowid ASC
            "#,
        )?;
        let events = stmt
            .query_map(params![log_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// 按类型统计节目单事件数
    pub fn count_by_type(&self, log_id: &str, event_type: AuditEventType) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit_event WHERE log_id = ?1 AND event_type = ?2",
            params![log_id, event_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn metadata_text(metadata: &JsonValue) -> Option<String> {
        if metadata.is_null() {
            None
        } else {
            Some(metadata.to_string())
        }
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
        let type_str: String = row.get(2)?;
        let event_type = AuditEventType::from_str(&type_str)
            .ok_or_else(|| invalid_column(2, format!("未知事件类型: {}", type_str)))?;
        let metadata = match row.get::<_, Option<String>>(7)? {
            Some(text) => serde_json::from_str(&text)
                .map_err(|e| invalid_column(7, format!("metadata 解析失败: {}", e)))?,
            None => JsonValue::Null,
        };

        Ok(AuditEvent {
            event_id: row.get(0)?,
            log_id: row.get(1)?,
            event_type,
            slot_position: row.get(3)?,
            actor: row.get(4)?,
            timestamp: row.get(5)?,
            message: row.get(6)?,
            metadata,
        })
    }
}

impl AuditEventPublisher for AuditEventRepository {
    fn publish(&self, event: &AuditEvent) -> Result<String, PublishError> {
        Ok(self.insert(event)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_repo() -> AuditEventRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        AuditEventRepository::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_publish_and_list() {
        let repo = setup_repo();
        let scheduled = AuditEvent::new("L1", AuditEventType::SpotScheduled, "scheduler", "M1 -> #0")
            .at_slot(0)
            .with_metadata(&json!({"item_id": "M1"}));
        let locked = AuditEvent::new("L1", AuditEventType::LogLocked, "alice", "锁定");

        repo.publish(&scheduled).unwrap();
        repo.batch_insert(&[locked.clone()]).unwrap();
        repo.insert(&AuditEvent::new("L2", AuditEventType::LogLocked, "bob", "锁定"))
            .unwrap();

        let events = repo.list_by_log("L1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], scheduled);
        assert_eq!(events[1].metadata, JsonValue::Null);
        assert_eq!(repo.count_by_type("L1", AuditEventType::LogLocked).unwrap(), 1);
    }
}
