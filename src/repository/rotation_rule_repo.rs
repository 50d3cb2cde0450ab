// ==========================================
// 广播排播系统 - 轮播规则仓储
// ==========================================
// 对齐: daypart / rotation_rule 表
// 红线: 规则快照必须在同一读事务内取得,不得混合两个版本
// ==========================================

use crate::domain::rule::{Daypart, RotationRule};
use crate::domain::types::RotationType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::invalid_column;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

/// 单个电台的时段与规则 (含停用规则)
#[derive(Debug, Clone, Default)]
pub struct StationRules {
    pub dayparts: Vec<Daypart>,
    pub rules: Vec<RotationRule>,
}

pub struct RotationRuleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RotationRuleRepository {
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

    pub fn upsert_daypart(&self, daypart: &Daypart) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO daypart (station_id, daypart_id, name, start_time, end_time, category)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(station_id, daypart_id) DO UPDATE SET
                name = excluded.name,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                category = excluded.category
            "#,
            params![
                daypart.station_id,
                daypart.id,
                daypart.name,
                daypart.start_time,
                daypart.end_time,
                daypart.category,
            ],
        )?;
        Ok(())
    }

    /// 新增或更新规则
    ///
    /// # 参数
    /// - `station_id`: 规则所属电台
    pub fn upsert_rule(&self, station_id: &str, rule: &RotationRule) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO rotation_rule (
                station_id, rule_id, name, rotation_type, daypart_id, campaign_id,
                min_separation, max_per_hour, max_per_day, priority, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(station_id, rule_id) DO UPDATE SET
                name = excluded.name,
                rotation_type = excluded.rotation_type,
                daypart_id = excluded.daypart_id,
                campaign_id = excluded.campaign_id,
                min_separation = excluded.min_separation,
                max_per_hour = excluded.max_per_hour,
                max_per_day = excluded.max_per_day,
                priority = excluded.priority,
                active = excluded.active
            "#,
            params![
                station_id,
                rule.id,
                rule.name,
                rule.rotation_type.to_db_str(),
                rule.daypart_id,
                rule.campaign_id,
                rule.min_separation,
                rule.max_per_hour,
                rule.max_per_day,
                rule.priority,
                rule.active,
            ],
        )?;
        Ok(())
    }

    pub fn delete_rule(&self, station_id: &str, rule_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "DELETE FROM rotation_rule WHERE station_id = ?1 AND rule_id = ?2",
            params![station_id, rule_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "RotationRule".to_string(),
                id: rule_id.to_string(),
            });
        }
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 读取电台的时段与规则 (单一读事务)
    pub fn load_station(&self, station_id: &str) -> RepositoryResult<StationRules> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let dayparts = {
            let mut stmt = tx.prepare(
                r#"
                SELECT daypart_id, station_id, name, start_time, end_time, category
                FROM daypart
                WHERE station_id = ?1
                ORDER BY start_time ASC, daypart_id ASC
                "#,
            )?;
            let rows = stmt
                .query_map(params![station_id], Self::map_daypart)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let rules = {
            let mut stmt = tx.prepare(
                r#"
                SELECT rule_id, name, rotation_type, daypart_id, campaign_id,
                       min_separation, max_per_hour, max_per_day, priority, active
                FROM rotation_rule
                WHERE station_id = ?1
                ORDER BY priority DESC, rule_id ASC
                "#,
            )?;
            let rows = stmt
                .query_map(params![station_id], Self::map_rule)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        tx.commit()?;
        Ok(StationRules { dayparts, rules })
    }

    fn map_daypart(row: &Row<'_>) -> rusqlite::Result<Daypart> {
        Ok(Daypart {
            id: row.get(0)?,
            station_id: row.get(1)?,
            name: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            category: row.get(5)?,
        })
    }

    fn map_rule(row: &Row<'_>) -> rusqlite::Result<RotationRule> {
        let rotation_type = row
            .get::<_, String>(2)?
            .parse::<RotationType>()
            .map_err(|e| invalid_column(2, e))?;

        Ok(RotationRule {
            id: row.get(0)?,
            name: row.get(1)?,
            rotation_type,
            daypart_id: row.get(3)?,
            campaign_id: row.get(4)?,
            min_separation: row.get(5)?,
            max_per_hour: row.get(6)?,
            max_per_day: row.get(7)?,
            priority: row.get(8)?,
            active: row.get(9)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn setup_repo() -> RotationRuleRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        RotationRuleRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn daypart(id: &str, start: u32, end: u32) -> Daypart {
        Daypart {
            id: id.to_string(),
            station_id: "KXYZ".to_string(),
            name: id.to_string(),
            start_time: NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
            category: None,
        }
    }

    #[test]
    fn test_load_station() {
        let repo = setup_repo();
        repo.upsert_daypart(&daypart("PM", 14, 18)).unwrap();
        repo.upsert_daypart(&daypart("AM", 6, 10)).unwrap();
        repo.upsert_rule(
            "KXYZ",
            &RotationRule::new("R-LOW", RotationType::Even, 1).with_max_per_day(3),
        )
        .unwrap();
        repo.upsert_rule(
            "KXYZ",
            &RotationRule::new("R-HIGH", RotationType::Weighted, 9)
                .for_daypart("AM")
                .with_min_separation(4),
        )
        .unwrap();
        repo.upsert_rule("WABC", &RotationRule::new("R-OTHER", RotationType::Random, 5))
            .unwrap();

        let station = repo.load_station("KXYZ").unwrap();
        assert_eq!(station.dayparts.len(), 2);
        assert_eq!(station.dayparts[0].id, "AM");
        assert_eq!(
            station.dayparts[0].start_time,
            NaiveTime::from_hms_opt(6, 0, 0).unwrap()
        );

        let ids: Vec<&str> = station.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["R-HIGH", "R-LOW"]);
        assert_eq!(station.rules[0].rotation_type, RotationType::Weighted);
        assert_eq!(station.rules[0].daypart_id.as_deref(), Some("AM"));
        assert_eq!(station.rules[1].max_per_day, Some(3));
    }

    #[test]
    fn test_delete_missing_rule() {
        let repo = setup_repo();
        assert!(matches!(
            repo.delete_rule("KXYZ", "R1"),
            Err(RepositoryError::NotFound { .. })
        ));
    }
}
