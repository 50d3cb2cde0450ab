// ==========================================
// 广播排播系统 - 节目单领域模型
// ==========================================
// 职责: 定义 Slot / TrafficLog
// 红线: 状态迁移只能经由 LogBuilder,领域层不做状态校验
// ==========================================

use crate::domain::conflict::ConflictRecord;
use crate::domain::types::{LogState, MediaKind, SlotStatus};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Slot - 播出时段
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub position: u32,                  // 节目单内序号
    pub start_time: NaiveDateTime,      // 开始时间
    pub duration_secs: u32,             // 时长 (秒)
    pub daypart_id: String,             // 所属时段
    pub accepts_kind: Option<MediaKind>, // 限定素材类型 (None = 不限)
    pub assigned_item: Option<String>,  // 已排素材
    pub copy_id: Option<String>,        // 广告版本 (copy)
    pub status: SlotStatus,             // 状态
}

impl Slot {
    /// 创建待排时段
    pub fn new(
        position: u32,
        start_time: NaiveDateTime,
        duration_secs: u32,
        daypart_id: impl Into<String>,
    ) -> Self {
        Self {
            position,
            start_time,
            duration_secs,
            daypart_id: daypart_id.into(),
            accepts_kind: None,
            assigned_item: None,
            copy_id: None,
            status: SlotStatus::Unfilled,
        }
    }

    pub fn accepting(mut self, kind: MediaKind) -> Self {
        self.accepts_kind = Some(kind);
        self
    }

    pub fn is_filled(&self) -> bool {
        self.status == SlotStatus::Filled && self.assigned_item.is_some()
    }

    /// 是否需要(重新)排程
    pub fn needs_scheduling(&self) -> bool {
        matches!(self.status, SlotStatus::Unfilled | SlotStatus::Conflict)
    }

    /// 填充素材
    pub fn fill(&mut self, item_id: &str) {
        self.assigned_item = Some(item_id.to_string());
        self.status = SlotStatus::Filled;
    }

    /// 清空素材
    pub fn clear(&mut self) {
        self.assigned_item = None;
        self.copy_id = None;
        self.status = SlotStatus::Unfilled;
    }
}

// ==========================================
// TrafficLog - 节目单
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficLog {
    pub log_id: String,                 // 节目单ID
    pub station_id: String,             // 电台ID
    pub log_date: NaiveDate,            // 播出日期
    pub slots: Vec<Slot>,               // 时段序列 (按 position 升序)
    pub state: LogState,                // 状态
    #[serde(default)]
    pub conflicts: Vec<ConflictRecord>, // 冲突记录
    pub revision: i32,                  // 乐观锁: 修订号
    pub created_at: NaiveDateTime,      // 创建时间
    pub updated_at: NaiveDateTime,      // 更新时间
}

impl TrafficLog {
    /// 节目单键 (电台 + 日期)
    pub fn key(&self) -> LogKey {
        LogKey::new(&self.station_id, self.log_date)
    }

    pub fn is_draft(&self) -> bool {
        self.state == LogState::Draft
    }

    pub fn is_locked(&self) -> bool {
        self.state == LogState::Locked
    }

    pub fn is_published(&self) -> bool {
        self.state == LogState::Published
    }

    pub fn slot(&self, position: u32) -> Option<&Slot> {
        self.slots.iter().find(|s| s.position == position)
    }

    pub fn slot_mut(&mut self, position: u32) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.position == position)
    }

    /// 时段的冲突记录
    pub fn conflict_for(&self, position: u32) -> Option<&ConflictRecord> {
        self.conflicts.iter().find(|c| c.slot_position == position)
    }

    pub fn conflict_for_mut(&mut self, position: u32) -> Option<&mut ConflictRecord> {
        self.conflicts.iter_mut().find(|c| c.slot_position == position)
    }

    /// 未解决冲突数量
    pub fn unresolved_count(&self) -> usize {
        self.conflicts.iter().filter(|c| c.is_unresolved()).count()
    }

    /// 尚未填充的时段 (UNFILLED + CONFLICT)
    pub fn open_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.needs_scheduling()).count()
    }

    /// 已填充时段数
    pub fn filled_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_filled()).count()
    }

    /// 刷新更新时间
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().naive_utc();
    }

    /// 生成简短摘要文本
    pub fn summary_text(&self) -> String {
        format!(
            "{} {} [{}] 时段{}个, 已排{}个, 未解决冲突{}个",
            self.station_id,
            self.log_date,
            self.state,
            self.slots.len(),
            self.filled_count(),
            self.unresolved_count()
        )
    }
}

// ==========================================
// LogKey - 节目单唯一键
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogKey {
    pub station_id: String,
    pub log_date: NaiveDate,
}

impl LogKey {
    pub fn new(station_id: &str, log_date: NaiveDate) -> Self {
        Self {
            station_id: station_id.to_string(),
            log_date,
        }
    }
}

impl std::fmt::Display for LogKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.station_id, self.log_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_slot_fill_and_clear() {
        let mut slot = Slot::new(0, at(6), 60, "AM");
        assert!(slot.needs_scheduling());

        slot.fill("M1");
        assert!(slot.is_filled());
        assert_eq!(slot.assigned_item.as_deref(), Some("M1"));

        slot.copy_id = Some("COPY-A".to_string());
        slot.clear();
        assert!(!slot.is_filled());
        assert!(slot.copy_id.is_none());
        assert_eq!(slot.status, SlotStatus::Unfilled);
    }

    #[test]
    fn test_log_key_display() {
        let key = LogKey::new("KXYZ", NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(key.to_string(), "KXYZ@2025-03-01");
    }
}
