// ==========================================
// 广播排播系统 - 素材目录仓储
// ==========================================
// 对齐: media_item 表
// 红线: Repository 不含业务逻辑; 目录顺序 (catalog_order) 一经分配不变
// ==========================================

use crate::domain::media::MediaItem;
use crate::domain::types::MediaKind;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::invalid_column;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT item_id, kind, campaign_id, advertiser_id, duration_secs, genre, bpm,
           daypart_eligible, allow_back_to_back, is_new_release, active, weight
    FROM media_item
"#;

// ==========================================
// MediaCatalogRepository - 素材目录仓储
// ==========================================
pub struct MediaCatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MediaCatalogRepository {
    /// 从已有连接创建仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新增或更新素材
    ///
    /// 新素材追加到目录末尾; 已有素材保留原目录顺序
    pub fn upsert(&self, item: &MediaItem) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::upsert_with(&conn, item)
    }

    /// 批量新增或更新 (单事务)
    ///
    /// # 返回
    /// - Ok(count): 写入条数
    pub fn batch_upsert(&self, items: &[MediaItem]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for item in items {
            Self::upsert_with(&tx, item)?;
        }
        tx.commit()?;
        Ok(items.len())
    }

    fn upsert_with(conn: &Connection, item: &MediaItem) -> RepositoryResult<()> {
        let dayparts = serde_json::to_string(&item.daypart_eligible)?;
        conn.execute(
            r#"
            INSERT INTO media_item (
                item_id, kind, campaign_id, advertiser_id, duration_secs, genre, bpm,
                daypart_eligible, allow_back_to_back, is_new_release, active, weight,
                catalog_order
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                (SELECT COALESCE(MAX(catalog_order), -1) + 1 FROM media_item)
            )
            ON CONFLICT(item_id) DO UPDATE SET
                kind = excluded.kind,
                campaign_id = excluded.campaign_id,
                advertiser_id = excluded.advertiser_id,
                duration_secs = excluded.duration_secs,
                genre = excluded.genre,
                bpm = excluded.bpm,
                daypart_eligible = excluded.daypart_eligible,
                allow_back_to_back = excluded.allow_back_to_back,
                is_new_release = excluded.is_new_release,
                active = excluded.active,
                weight = excluded.weight
            "#,
            params![
                item.id,
                item.kind.to_db_str(),
                item.campaign_id,
                item.advertiser_id,
                item.duration_secs,
                item.genre,
                item.bpm,
                dayparts,
                item.allow_back_to_back,
                item.is_new_release,
                item.active,
                item.weight,
            ],
        )?;
        Ok(())
    }

    /// 按ID查询
    pub fn find_by_id(&self, item_id: &str) -> RepositoryResult<Option<MediaItem>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE item_id = ?1", SELECT_COLUMNS);
        let item = conn
            .query_row(&sql, params![item_id], Self::map_row)
            .optional()?;
        Ok(item)
    }

    /// 按目录顺序列出全部素材 (含停用)
    pub fn list_all(&self) -> RepositoryResult<Vec<MediaItem>> {
        let conn = self.get_conn()?;
        let sql = format!("{} ORDER BY catalog_order ASC", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// 启用/停用素材
    pub fn set_active(&self, item_id: &str, active: bool) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE media_item SET active = ?1 WHERE item_id = ?2",
            params![active, item_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "MediaItem".to_string(),
                id: item_id.to_string(),
            });
        }
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<MediaItem> {
        let dayparts_json: String = row.get(7)?;
        let daypart_eligible: BTreeSet<String> = serde_json::from_str(&dayparts_json)
            .map_err(|e| invalid_column(7, format!("daypart_eligible 解析失败: {}", e)))?;

        Ok(MediaItem {
            id: row.get(0)?,
            kind: MediaKind::from_str(&row.get::<_, String>(1)?),
            campaign_id: row.get(2)?,
            advertiser_id: row.get(3)?,
            duration_secs: row.get(4)?,
            genre: row.get(5)?,
            bpm: row.get(6)?,
            daypart_eligible,
            allow_back_to_back: row.get(8)?,
            is_new_release: row.get(9)?,
            active: row.get(10)?,
            weight: row.get(11)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_repo() -> MediaCatalogRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        MediaCatalogRepository::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_upsert_keeps_catalog_order() {
        let repo = setup_repo();
        repo.batch_upsert(&[
            MediaItem::new("B", MediaKind::Music, 200),
            MediaItem::new("A", MediaKind::Spot, 30).with_campaign("C1"),
        ])
        .unwrap();

        // 更新不改变顺序
        repo.upsert(&MediaItem::new("B", MediaKind::Music, 210).with_dayparts(["AM"]))
            .unwrap();

        let items = repo.list_all().unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert_eq!(items[0].duration_secs, 210);
        assert!(items[0].daypart_eligible.contains("AM"));
        assert_eq!(items[1].campaign_id.as_deref(), Some("C1"));
    }

    #[test]
    fn test_set_active() {
        let repo = setup_repo();
        repo.upsert(&MediaItem::new("M1", MediaKind::Music, 180)).unwrap();
        repo.set_active("M1", false).unwrap();

        assert!(!repo.find_by_id("M1").unwrap().unwrap().active);
        assert!(matches!(
            repo.set_active("NOPE", true),
            Err(RepositoryError::NotFound { .. })
        ));
    }
}
