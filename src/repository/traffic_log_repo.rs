// ==========================================
// 广播排播系统 - 节目单仓储
// ==========================================
// 对齐: traffic_log / log_slot / conflict_record 表
// 红线: 节目单头、时段、冲突记录同一事务写入; 更新必须带 revision 检查
// ==========================================

use crate::domain::conflict::{ConflictReason, ConflictRecord};
use crate::domain::traffic_log::{Slot, TrafficLog};
use crate::domain::types::{ConflictResolution, LogState, MediaKind, SlotStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::invalid_column;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex};

pub struct TrafficLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TrafficLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 新建节目单
    ///
    /// # 返回
    /// - Err(UniqueConstraintViolation): 同一电台同一日期已有节目单
    pub fn insert(&self, log: &TrafficLog) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO traffic_log (log_id, station_id, log_date, state, revision, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                log.log_id,
                log.station_id,
                log.log_date,
                log.state.to_db_str(),
                log.revision,
                log.created_at,
                log.updated_at,
            ],
        )?;
        Self::write_children(&tx, log)?;

        tx.commit()?;
        Ok(())
    }

    /// 更新节目单 (带乐观锁检查)
    ///
    /// 成功后 `log.revision` 同步递增
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision 不匹配 (其他会话已更新)
    /// - `RepositoryError::NotFound`: log_id 不存在
    pub fn update(&self, log: &mut TrafficLog) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let rows_affected = tx.execute(
            r#"
            UPDATE traffic_log
            SET state = ?1, updated_at = ?2, revision = revision + 1
            WHERE log_id = ?3 AND revision = ?4
            "#,
            params![log.state.to_db_str(), log.updated_at, log.log_id, log.revision],
        )?;

        if rows_affected == 0 {
            let actual: Option<i32> = tx
                .query_row(
                    "SELECT revision FROM traffic_log WHERE log_id = ?1",
                    params![log.log_id],
                    |row| row.get(0),
                )
                .optional()?;

            return match actual {
                Some(actual) => Err(RepositoryError::OptimisticLockFailure {
                    log_id: log.log_id.clone(),
                    expected: log.revision,
                    actual,
                }),
                None => Err(RepositoryError::NotFound {
                    entity: "TrafficLog".to_string(),
                    id: log.log_id.clone(),
                }),
            };
        }

        tx.execute("DELETE FROM log_slot WHERE log_id = ?1", params![log.log_id])?;
        tx.execute("DELETE FROM conflict_record WHERE log_id = ?1", params![log.log_id])?;
        Self::write_children(&tx, log)?;

        tx.commit()?;
        log.revision += 1;
        Ok(())
    }

    fn write_children(tx: &Transaction<'_>, log: &TrafficLog) -> RepositoryResult<()> {
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO log_slot (
                    log_id, position, start_time, duration_secs, daypart_id,
                    accepts_kind, assigned_item, copy_id, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for slot in &log.slots {
                stmt.execute(params![
                    log.log_id,
                    slot.position,
                    slot.start_time,
                    slot.duration_secs,
                    slot.daypart_id,
                    slot.accepts_kind.map(|k| k.to_db_str()),
                    slot.assigned_item,
                    slot.copy_id,
                    slot.status.to_db_str(),
                ])?;
            }
        }

        let mut stmt = tx.prepare(
            r#"
            INSERT INTO conflict_record (
                log_id, slot_position, reason_json, candidates_considered,
                resolution, relaxed_rules_json, resolved_item
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )?;
        for record in &log.conflicts {
            stmt.execute(params![
                log.log_id,
                record.slot_position,
                serde_json::to_string(&record.reason)?,
                record.candidates_considered,
                record.resolution.to_db_str(),
                serde_json::to_string(&record.relaxed_rules)?,
                record.resolved_item,
            ])?;
        }
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, log_id: &str) -> RepositoryResult<Option<TrafficLog>> {
        let conn = self.get_conn()?;
        let header = conn
            .query_row(
                r#"
                SELECT log_id, station_id, log_date, state, revision, created_at, updated_at
                FROM traffic_log WHERE log_id = ?1
                "#,
                params![log_id],
                Self::map_header,
            )
            .optional()?;

        match header {
            Some(log) => Ok(Some(Self::load_children(&conn, log)?)),
            None => Ok(None),
        }
    }

    /// 按电台与日期查询
    pub fn find_by_key(&self, station_id: &str, log_date: NaiveDate) -> RepositoryResult<Option<TrafficLog>> {
        let conn = self.get_conn()?;
        let header = conn
            .query_row(
                r#"
                SELECT log_id, station_id, log_date, state, revision, created_at, updated_at
                FROM traffic_log WHERE station_id = ?1 AND log_date = ?2
                "#,
                params![station_id, log_date],
                Self::map_header,
            )
            .optional()?;

        match header {
            Some(log) => Ok(Some(Self::load_children(&conn, log)?)),
            None => Ok(None),
        }
    }

    /// 查询指定日期之前最近的若干已发布节目单 (按日期升序,用于构造历史种子)
    ///
    /// 草稿与锁定的节目单未播出,不参与历史
    pub fn find_prior_logs(
        &self,
        station_id: &str,
        before: NaiveDate,
        limit: usize,
    ) -> RepositoryResult<Vec<TrafficLog>> {
        let conn = self.get_conn()?;
        let headers = {
            let mut stmt = conn.prepare(
                r#"
                SELECT log_id, station_id, log_date, state, revision, created_at, updated_at
                FROM traffic_log
                WHERE station_id = ?1 AND log_date < ?2 AND state = ?3
                ORDER BY log_date DESC
                LIMIT ?4
                "#,
            )?;
            let rows = stmt
                .query_map(
                    params![station_id, before, LogState::Published.to_db_str(), limit],
                    Self::map_header,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut logs = headers
            .into_iter()
            .map(|log| Self::load_children(&conn, log))
            .collect::<RepositoryResult<Vec<_>>>()?;
        logs.reverse();
        Ok(logs)
    }

    fn load_children(conn: &Connection, mut log: TrafficLog) -> RepositoryResult<TrafficLog> {
        let mut stmt = conn.prepare(
            r#"
            SELECT position, start_time, duration_secs, daypart_id,
                   accepts_kind, assigned_item, copy_id, status
            FROM log_slot WHERE log_id = ?1
            ORDER BY position ASC
            "#,
        )?;
        log.slots = stmt
            .query_map(params![log.log_id], Self::map_slot)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT slot_position, reason_json, candidates_considered,
                   resolution, relaxed_rules_json, resolved_item
            FROM conflict_record WHERE log_id = ?1
            ORDER BY slot_position ASC
            "#,
        )?;
        log.conflicts = stmt
            .query_map(params![log.log_id], Self::map_conflict)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(log)
    }

    fn map_header(row: &Row<'_>) -> rusqlite::Result<TrafficLog> {
        let state_str: String = row.get(3)?;
        let state = LogState::from_str(&state_str)
            .ok_or_else(|| invalid_column(3, format!("未知节目单状态: {}", state_str)))?;

        Ok(TrafficLog {
            log_id: row.get(0)?,
            station_id: row.get(1)?,
            log_date: row.get(2)?,
            slots: Vec::new(),
            state,
            conflicts: Vec::new(),
            revision: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn map_slot(row: &Row<'_>) -> rusqlite::Result<Slot> {
        Ok(Slot {
            position: row.get(0)?,
            start_time: row.get(1)?,
            duration_secs: row.get(2)?,
            daypart_id: row.get(3)?,
            accepts_kind: row
                .get::<_, Option<String>>(4)?
                .map(|k| MediaKind::from_str(&k)),
            assigned_item: row.get(5)?,
            copy_id: row.get(6)?,
            status: SlotStatus::from_str(&row.get::<_, String>(7)?),
        })
    }

    fn map_conflict(row: &Row<'_>) -> rusqlite::Result<ConflictRecord> {
        let reason: ConflictReason = serde_json::from_str(&row.get::<_, String>(1)?)
            .map_err(|e| invalid_column(1, format!("冲突原因解析失败: {}", e)))?;
        let relaxed_rules: Vec<String> = serde_json::from_str(&row.get::<_, String>(4)?)
            .map_err(|e| invalid_column(4, format!("放宽规则解析失败: {}", e)))?;

        Ok(ConflictRecord {
            slot_position: row.get(0)?,
            reason,
            candidates_considered: row.get(2)?,
            resolution: ConflictResolution::from_str(&row.get::<_, String>(3)?),
            relaxed_rules,
            resolved_item: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conflict::FrequencyWindow;
    use crate::engine::log_builder::LogBuilder;

    fn setup_repo() -> TrafficLogRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        TrafficLogRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn sample_log(date: NaiveDate) -> TrafficLog {
        let t = |h| date.and_hms_opt(h, 0, 0).unwrap();
        let mut slots = vec![
            Slot::new(0, t(6), 60, "AM"),
            Slot::new(1, t(7), 30, "AM").accepting(MediaKind::Spot),
        ];
        slots[0].fill("M1");
        slots[1].status = SlotStatus::Conflict;

        let mut log = LogBuilder::new().create_draft("KXYZ", date, slots);
        log.conflicts.push(ConflictRecord::unresolved(
            1,
            ConflictReason::FrequencyCapExhausted {
                rule_id: "R1".to_string(),
                window: FrequencyWindow::Hour,
            },
            3,
        ));
        log
    }

    #[test]
    fn test_insert_and_find() {
        let repo = setup_repo();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let log = sample_log(date);
        repo.insert(&log).unwrap();

        let loaded = repo.find_by_key("KXYZ", date).unwrap().unwrap();
        assert_eq!(loaded.log_id, log.log_id);
        assert_eq!(loaded.slots, log.slots);
        assert_eq!(loaded.conflicts, log.conflicts);
        assert_eq!(loaded.state, LogState::Draft);

        assert!(matches!(
            repo.insert(&sample_log(date)),
            Err(RepositoryError::UniqueConstraintViolation(_))
        ));
    }

    #[test]
    fn test_update_with_optimistic_lock() {
        let repo = setup_repo();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let log = sample_log(date);
        repo.insert(&log).unwrap();

        let mut first = repo.find_by_id(&log.log_id).unwrap().unwrap();
        let mut stale = first.clone();

        first.conflicts.clear();
        first.slots[1].fill("S1");
        repo.update(&mut first).unwrap();
        assert_eq!(first.revision, 1);

        stale.state = LogState::Locked;
        let err = repo.update(&mut stale).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::OptimisticLockFailure { expected: 0, actual: 1, .. }
        ));

        let loaded = repo.find_by_id(&log.log_id).unwrap().unwrap();
        assert!(loaded.conflicts.is_empty());
        assert_eq!(loaded.slots[1].assigned_item.as_deref(), Some("S1"));
        assert_eq!(loaded.state, LogState::Draft);
    }

    #[test]
    fn test_find_prior_logs_only_published() {
        let repo = setup_repo();
        for day in 1..=5 {
            let mut log = sample_log(NaiveDate::from_ymd_opt(2025, 3, day).unwrap());
            // 3 日停留在草稿, 4 日已锁定未发布
            log.state = match day {
                3 => LogState::Draft,
                4 => LogState::Locked,
                _ => LogState::Published,
            };
            repo.insert(&log).unwrap();
        }

        let prior = repo
            .find_prior_logs("KXYZ", NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(), 2)
            .unwrap();
        let dates: Vec<u32> = prior.iter().map(|l| chrono::Datelike::day(&l.log_date)).collect();
        assert_eq!(dates, vec![1, 2]);
        assert!(prior.iter().all(|l| l.is_published()));
        assert_eq!(prior[0].slots.len(), 2);
    }
}
