// ==========================================
// 广播排播系统 - 运行快照
// ==========================================
// 职责: 单次排程运行使用的只读数据视图
// 输入: 素材目录 / 规则+时段 / 历史节目单
// 输出: CatalogSnapshot / RuleStoreSnapshot / HistorySeed
// 红线: 快照构造后不可变,运行期间规则表的修改不影响本次运行
// ==========================================

use crate::domain::media::MediaItem;
use crate::domain::rule::{Daypart, RotationRule};
use crate::domain::traffic_log::TrafficLog;
use crate::engine::error::{SchedulingError, SchedulingResult};
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};

// ==========================================
// CatalogSnapshot - 素材目录快照
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    items: Vec<MediaItem>,
    index: HashMap<String, usize>,
}

impl CatalogSnapshot {
    /// 创建目录快照 (保持入库顺序)
    ///
    /// # 返回
    /// - Err(Configuration): 素材ID重复
    pub fn new(items: Vec<MediaItem>) -> SchedulingResult<Self> {
        let mut index = HashMap::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if index.insert(item.id.clone(), i).is_some() {
                return Err(SchedulingError::configuration(format!(
                    "素材ID重复: {}",
                    item.id
                )));
            }
        }
        Ok(Self { items, index })
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn get(&self, item_id: &str) -> Option<&MediaItem> {
        self.index.get(item_id).map(|&i| &self.items[i])
    }

    /// 素材在目录中的顺序号 (用于平局裁决)
    pub fn order_of(&self, item_id: &str) -> usize {
        self.index.get(item_id).copied().unwrap_or(usize::MAX)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ==========================================
// RuleStoreSnapshot - 规则库快照
// ==========================================
#[derive(Debug, Clone)]
pub struct RuleStoreSnapshot {
    station_id: String,
    dayparts: HashMap<String, Daypart>,
    rules: Vec<RotationRule>, // 仅启用规则, 按 priority 降序、id 升序
}

impl RuleStoreSnapshot {
    /// 创建规则库快照
    ///
    /// 校验:
    /// 1) 时段ID唯一且 start_time < end_time
    /// 2) 规则ID唯一
    /// 3) 规则引用的时段必须存在
    ///
    /// # 参数
    /// - `station_id`: 电台ID
    /// - `dayparts`: 该电台的时段定义
    /// - `rules`: 规则列表 (停用规则会被过滤)
    pub fn new(
        station_id: impl Into<String>,
        dayparts: Vec<Daypart>,
        rules: Vec<RotationRule>,
    ) -> SchedulingResult<Self> {
        let station_id = station_id.into();

        let mut daypart_map = HashMap::with_capacity(dayparts.len());
        for dp in dayparts {
            if !dp.is_well_formed() {
                return Err(SchedulingError::configuration(format!(
                    "时段 {} 起止时间非法: {} >= {}",
                    dp.id, dp.start_time, dp.end_time
                )));
            }
            if daypart_map.contains_key(&dp.id) {
                return Err(SchedulingError::configuration(format!("时段ID重复: {}", dp.id)));
            }
            daypart_map.insert(dp.id.clone(), dp);
        }

        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(SchedulingError::configuration(format!("规则ID重复: {}", rule.id)));
            }
            if let Some(dp_id) = rule.daypart_id.as_deref() {
                if !daypart_map.contains_key(dp_id) {
                    return Err(SchedulingError::configuration(format!(
                        "规则 {} 引用了不存在的时段 {}",
                        rule.id, dp_id
                    )));
                }
            }
        }

        let mut rules: Vec<RotationRule> = rules.into_iter().filter(|r| r.active).collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        Ok(Self {
            station_id,
            dayparts: daypart_map,
            rules,
        })
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn daypart(&self, daypart_id: &str) -> Option<&Daypart> {
        self.dayparts.get(daypart_id)
    }

    /// 获取时段,不存在时返回配置错误
    pub fn require_daypart(&self, daypart_id: &str) -> SchedulingResult<&Daypart> {
        self.dayparts.get(daypart_id).ok_or_else(|| {
            SchedulingError::configuration(format!("未知时段: {}", daypart_id))
        })
    }

    /// 按开始时间排序的时段列表
    pub fn dayparts_sorted(&self) -> Vec<&Daypart> {
        let mut list: Vec<&Daypart> = self.dayparts.values().collect();
        list.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// 全部启用规则 (优先级降序)
    pub fn rules(&self) -> &[RotationRule] {
        &self.rules
    }

    pub fn rule(&self, rule_id: &str) -> Option<&RotationRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    /// 作用于指定时段的规则 (优先级降序)
    pub fn rules_for(&self, daypart_id: &str) -> Vec<&RotationRule> {
        self.rules
            .iter()
            .filter(|r| r.applies_to_daypart(daypart_id))
            .collect()
    }

    /// 最大每小时上限 (用于确定历史保留深度)
    pub fn max_hourly_cap(&self) -> Option<u32> {
        self.rules.iter().filter_map(|r| r.max_per_hour).max()
    }
}

// ==========================================
// HistorySeed - 历史播出种子
// ==========================================
// 位置约定: 新节目单第一个时段为 0,种子播出为负数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPlay {
    pub item_id: String,
    pub campaign_id: Option<String>,
    pub position: i64,
    pub start_time: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySeed {
    plays: Vec<SeedPlay>,
}

impl HistorySeed {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 追加一条种子播出
    pub fn with_play(
        mut self,
        item_id: impl Into<String>,
        campaign_id: Option<String>,
        position: i64,
        start_time: NaiveDateTime,
    ) -> Self {
        self.plays.push(SeedPlay {
            item_id: item_id.into(),
            campaign_id,
            position,
            start_time,
        });
        self
    }

    /// 从已播出节目单构建种子
    ///
    /// 节目单按日期升序拼接,最后一个节目单的最后一个时段位置为 -1
    ///
    /// # 参数
    /// - `prior_logs`: 历史节目单 (仅取已填充时段)
    /// - `catalog`: 素材目录 (用于补全广告活动ID)
    pub fn from_prior_logs(prior_logs: &[TrafficLog], catalog: &CatalogSnapshot) -> Self {
        let mut logs: Vec<&TrafficLog> = prior_logs.iter().collect();
        logs.sort_by_key(|l| l.log_date);

        let total: i64 = logs.iter().map(|l| l.slots.len() as i64).sum();
        let mut offset = -total;
        let mut plays = Vec::new();

        for log in logs {
            let mut slots: Vec<_> = log.slots.iter().collect();
            slots.sort_by_key(|s| s.position);
            for (idx, slot) in slots.iter().enumerate() {
                if let (true, Some(item_id)) = (slot.is_filled(), slot.assigned_item.as_ref()) {
                    plays.push(SeedPlay {
                        item_id: item_id.clone(),
                        campaign_id: catalog.get(item_id).and_then(|m| m.campaign_id.clone()),
                        position: offset + idx as i64,
                        start_time: slot.start_time,
                    });
                }
            }
            offset += slots.len() as i64;
        }

        Self { plays }
    }

    pub fn plays(&self) -> &[SeedPlay] {
        &self.plays
    }

    pub fn is_empty(&self) -> bool {
        self.plays.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traffic_log::Slot;
    use crate::domain::types::{LogState, MediaKind, RotationType};
    use chrono::{NaiveDate, NaiveTime};

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
    fn test_catalog_rejects_duplicate_ids() {
        let items = vec![
            MediaItem::new("M1", MediaKind::Music, 180),
            MediaItem::new("M1", MediaKind::Music, 200),
        ];
        assert!(matches!(
            CatalogSnapshot::new(items),
            Err(SchedulingError::Configuration(_))
        ));
    }

    #[test]
    fn test_rule_snapshot_orders_and_filters() {
        let mut inactive = RotationRule::new("R0", RotationType::Even, 100);
        inactive.active = false;
        let rules = vec![
            RotationRule::new("R2", RotationType::Sequential, 5),
            RotationRule::new("R1", RotationType::Random, 10).for_daypart("AM"),
            RotationRule::new("R3", RotationType::Weighted, 5),
            inactive,
        ];
        let snapshot =
            RuleStoreSnapshot::new("KXYZ", vec![daypart("AM", 6, 10), daypart("PM", 15, 19)], rules)
                .unwrap();

        let ids: Vec<&str> = snapshot.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["R1", "R2", "R3"]);

        let pm: Vec<&str> = snapshot.rules_for("PM").iter().map(|r| r.id.as_str()).collect();
        assert_eq!(pm, vec!["R2", "R3"]);
    }

    #[test]
    fn test_rule_snapshot_validation() {
        let bad_daypart = daypart("AM", 10, 6);
        assert!(RuleStoreSnapshot::new("KXYZ", vec![bad_daypart], vec![]).is_err());

        let dangling = RotationRule::new("R1", RotationType::Even, 1).for_daypart("NIGHT");
        assert!(RuleStoreSnapshot::new("KXYZ", vec![daypart("AM", 6, 10)], vec![dangling]).is_err());

        let snapshot = RuleStoreSnapshot::new("KXYZ", vec![daypart("AM", 6, 10)], vec![]).unwrap();
        assert!(snapshot.require_daypart("AM").is_ok());
        assert!(snapshot.require_daypart("PM").is_err());
    }

    #[test]
    fn test_seed_positions_are_negative() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 28).unwrap();
        let mut slots: Vec<Slot> = (0..3)
            .map(|i| Slot::new(i, date.and_hms_opt(21 + i, 0, 0).unwrap(), 60, "PM"))
            .collect();
        slots[0].fill("M1");
        slots[2].fill("S1");

        let now = date.and_hms_opt(0, 0, 0).unwrap();
        let prior = TrafficLog {
            log_id: "L0".to_string(),
            station_id: "KXYZ".to_string(),
            log_date: date,
            slots,
            state: LogState::Published,
            conflicts: vec![],
            revision: 1,
            created_at: now,
            updated_at: now,
        };
        let catalog = CatalogSnapshot::new(vec![
            MediaItem::new("M1", MediaKind::Music, 180),
            MediaItem::new("S1", MediaKind::Spot, 30).with_campaign("C1"),
        ])
        .unwrap();

        let seed = HistorySeed::from_prior_logs(&[prior], &catalog);
        let plays = seed.plays();
        assert_eq!(plays.len(), 2);
        assert_eq!(plays[0].position, -3);
        assert_eq!(plays[1].position, -1);
        assert_eq!(plays[1].campaign_id.as_deref(), Some("C1"));
    }
}
