// ==========================================
// 广播排播系统 - 播出历史追踪
// ==========================================
// 职责: 记录单次运行中每个素材/广告活动的播出,回答间隔与频次查询
// 输入: HistorySeed + 节目单已填充时段
// 输出: 间隔/频次判定
// 红线: 每次运行独立构造,不得跨运行共享
// ==========================================

use crate::domain::conflict::FrequencyWindow;
use crate::domain::media::MediaItem;
use crate::domain::rule::RotationRule;
use crate::domain::traffic_log::{Slot, TrafficLog};
use crate::domain::types::SeparationMode;
use crate::engine::snapshot::{CatalogSnapshot, HistorySeed};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::{HashMap, VecDeque};

/// 频次窗口长度 (分钟)
pub const HOUR_WINDOW_MINUTES: i64 = 60;

// ==========================================
// HistoryKey - 历史记录键
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HistoryKey {
    Item(String),
    Campaign(String),
}

impl HistoryKey {
    /// 规则对该素材计数的键
    ///
    /// 活动规则按活动计数,且只约束该活动的素材;其他规则按素材计数
    pub fn for_rule(item: &MediaItem, rule: &RotationRule) -> Option<HistoryKey> {
        match rule.campaign_id.as_deref() {
            Some(campaign) => {
                if item.campaign_id.as_deref() == Some(campaign) {
                    Some(HistoryKey::Campaign(campaign.to_string()))
                } else {
                    None
                }
            }
            None => Some(HistoryKey::Item(item.id.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Play {
    pub position: i64,
    pub start_time: NaiveDateTime,
}

/// 回滚点
#[derive(Debug, Clone)]
pub struct HistoryCheckpoint {
    plays: HashMap<HistoryKey, VecDeque<Play>>,
    day_counts: HashMap<(HistoryKey, NaiveDate), u32>,
    log_counts: HashMap<String, u32>,
}

// ==========================================
// HistoryTracker - 播出历史追踪器
// ==========================================
#[derive(Debug, Clone)]
pub struct HistoryTracker {
    depth: usize,
    mode: SeparationMode,
    plays: HashMap<HistoryKey, VecDeque<Play>>, // 按 position 升序
    day_counts: HashMap<(HistoryKey, NaiveDate), u32>,
    log_counts: HashMap<String, u32>, // 当前节目单内素材播出次数
}

impl HistoryTracker {
    /// 创建空追踪器
    ///
    /// # 参数
    /// - `depth`: 每个键保留的往日播出次数 (当前节目单内不裁剪)
    /// - `mode`: 间隔计量方式
    pub fn new(depth: usize, mode: SeparationMode) -> Self {
        Self {
            depth: depth.max(1),
            mode,
            plays: HashMap::new(),
            day_counts: HashMap::new(),
            log_counts: HashMap::new(),
        }
    }

    /// 保证深度大于最大每小时上限
    pub fn ensure_depth_for_hourly_cap(&mut self, max_per_hour: Option<u32>) {
        if let Some(cap) = max_per_hour {
            self.depth = self.depth.max(cap as usize + 1);
        }
    }

    /// 从种子与节目单已填充时段构造
    ///
    /// 重排时已填充时段作为历史,前后两侧的播出均参与判定
    pub fn for_log(
        depth: usize,
        mode: SeparationMode,
        max_per_hour: Option<u32>,
        seed: &HistorySeed,
        log: &TrafficLog,
        catalog: &CatalogSnapshot,
    ) -> Self {
        let mut tracker = Self::new(depth, mode);
        tracker.ensure_depth_for_hourly_cap(max_per_hour);

        for play in seed.plays() {
            tracker.record(
                &play.item_id,
                play.campaign_id.as_deref(),
                play.position,
                play.start_time,
                false,
            );
        }

        for slot in log.slots.iter().filter(|s| s.is_filled()) {
            if let Some(item_id) = slot.assigned_item.as_deref() {
                let campaign = catalog.get(item_id).and_then(|m| m.campaign_id.as_deref());
                tracker.record(item_id, campaign, slot.position as i64, slot.start_time, true);
            }
        }

        tracker
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn mode(&self) -> SeparationMode {
        self.mode
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 放置该素材是否违反规则的最小间隔
    pub fn would_violate_separation(&self, item: &MediaItem, rule: &RotationRule, slot: &Slot) -> bool {
        if !rule.has_separation() {
            return false;
        }
        let key = match HistoryKey::for_rule(item, rule) {
            Some(key) => key,
            None => return false,
        };
        let plays = match self.plays.get(&key) {
            Some(plays) => plays,
            None => return false,
        };

        let position = slot.position as i64;
        let before = plays.iter().rev().find(|p| p.position <= position);
        let after = plays.iter().find(|p| p.position >= position);

        [before, after]
            .into_iter()
            .flatten()
            .any(|p| self.gap_between(p, position, slot.start_time) < rule.min_separation as i64)
    }

    /// 放置该素材是否触及规则的频次上限
    pub fn would_violate_frequency(&self, item: &MediaItem, rule: &RotationRule, slot: &Slot) -> bool {
        self.frequency_violation(item, rule, slot).is_some()
    }

    /// 触及的频次窗口 (小时优先)
    pub fn frequency_violation(
        &self,
        item: &MediaItem,
        rule: &RotationRule,
        slot: &Slot,
    ) -> Option<FrequencyWindow> {
        if !rule.has_frequency_cap() {
            return None;
        }
        let key = HistoryKey::for_rule(item, rule)?;

        if let Some(cap) = rule.max_per_hour {
            let times: Vec<NaiveDateTime> = self
                .plays
                .get(&key)
                .map(|plays| plays.iter().map(|p| p.start_time).collect())
                .unwrap_or_default();
            if max_hour_window_count(&times, slot.start_time) + 1 > cap as usize {
                return Some(FrequencyWindow::Hour);
            }
        }

        if let Some(cap) = rule.max_per_day {
            let count = self
                .day_counts
                .get(&(key, slot.start_time.date()))
                .copied()
                .unwrap_or(0);
            if count + 1 > cap {
                return Some(FrequencyWindow::Day);
            }
        }

        None
    }

    /// 素材在指定位置之前最近一次播出的位置
    pub fn last_play_before(&self, item_id: &str, position: i64) -> Option<i64> {
        self.plays
            .get(&HistoryKey::Item(item_id.to_string()))
            .and_then(|plays| plays.iter().rev().find(|p| p.position < position))
            .map(|p| p.position)
    }

    /// 当前节目单内素材播出次数
    pub fn log_play_count(&self, item_id: &str) -> u32 {
        self.log_counts.get(item_id).copied().unwrap_or(0)
    }

    fn gap_between(&self, play: &Play, position: i64, start_time: NaiveDateTime) -> i64 {
        match self.mode {
            SeparationMode::SlotCount => (position - play.position).abs() - 1,
            SeparationMode::WallClockMinutes => (start_time - play.start_time).num_minutes().abs(),
        }
    }

    // ==========================================
    // 写入与回滚
    // ==========================================

    /// 提交一次播出
    pub fn commit(&mut self, slot_position: u32, start_time: NaiveDateTime, item: &MediaItem) {
        self.record(
            &item.id,
            item.campaign_id.as_deref(),
            slot_position as i64,
            start_time,
            true,
        );
    }

    fn record(
        &mut self,
        item_id: &str,
        campaign_id: Option<&str>,
        position: i64,
        start_time: NaiveDateTime,
        in_log: bool,
    ) {
        let play = Play {
            position,
            start_time,
        };
        let mut keys = vec![HistoryKey::Item(item_id.to_string())];
        if let Some(campaign) = campaign_id {
            keys.push(HistoryKey::Campaign(campaign.to_string()));
        }

        for key in keys {
            *self
                .day_counts
                .entry((key.clone(), start_time.date()))
                .or_insert(0) += 1;

            let plays = self.plays.entry(key).or_default();
            let idx = plays.partition_point(|p| p.position <= position);
            plays.insert(idx, play);
            // 只裁剪种子播出 (负位置); 当前节目单内的播出全部保留
            while plays.len() > self.depth && plays.front().map_or(false, |p| p.position < 0) {
                plays.pop_front();
            }
        }

        if in_log {
            *self.log_counts.entry(item_id.to_string()).or_insert(0) += 1;
        }
    }

    pub fn checkpoint(&self) -> HistoryCheckpoint {
        HistoryCheckpoint {
            plays: self.plays.clone(),
            day_counts: self.day_counts.clone(),
            log_counts: self.log_counts.clone(),
        }
    }

    /// 回滚到检查点 (丢弃检查点之后的全部提交)
    pub fn rollback_to(&mut self, checkpoint: HistoryCheckpoint) {
        self.plays = checkpoint.plays;
        self.day_counts = checkpoint.day_counts;
        self.log_counts = checkpoint.log_counts;
    }
}

/// 包含 `at` 的任意60分钟窗口 [s, s+60) 内的最大播出数 (不含 `at` 本身)
///
/// 最大值总在窗口起点为某次播出时间或 `at` 时取得
pub fn max_hour_window_count(times: &[NaiveDateTime], at: NaiveDateTime) -> usize {
    let window = Duration::minutes(HOUR_WINDOW_MINUTES);
    let in_window = |start: NaiveDateTime| {
        times
            .iter()
            .filter(|&&t| t >= start && t < start + window)
            .count()
    };

    times
        .iter()
        .copied()
        .filter(|&t| t <= at && at - t < window)
        .chain(std::iter::once(at))
        .map(in_window)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{MediaKind, RotationType};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn slot(position: u32, h: u32, m: u32) -> Slot {
        Slot::new(position, at(h, m), 60, "AM")
    }

    #[test]
    fn test_slot_count_separation() {
        let item = MediaItem::new("M1", MediaKind::Music, 180);
        let rule = RotationRule::new("R1", RotationType::Sequential, 1).with_min_separation(2);
        let mut tracker = HistoryTracker::new(16, SeparationMode::SlotCount);

        tracker.commit(0, at(6, 0), &item);
        // 位置 1、2 与位置 0 之间间隔 0、1 个时段
        assert!(tracker.would_violate_separation(&item, &rule, &slot(1, 6, 5)));
        assert!(tracker.would_violate_separation(&item, &rule, &slot(2, 6, 10)));
        assert!(!tracker.would_violate_separation(&item, &rule, &slot(3, 6, 15)));
    }

    #[test]
    fn test_separation_checks_both_sides() {
        let item = MediaItem::new("M1", MediaKind::Music, 180);
        let rule = RotationRule::new("R1", RotationType::Sequential, 1).with_min_separation(1);
        let mut tracker = HistoryTracker::new(16, SeparationMode::SlotCount);

        tracker.commit(5, at(7, 0), &item);
        assert!(tracker.would_violate_separation(&item, &rule, &slot(4, 6, 55)));
        assert!(!tracker.would_violate_separation(&item, &rule, &slot(3, 6, 50)));
    }

    #[test]
    fn test_wall_clock_separation() {
        let item = MediaItem::new("M1", MediaKind::Music, 180);
        let rule = RotationRule::new("R1", RotationType::Sequential, 1).with_min_separation(30);
        let mut tracker = HistoryTracker::new(16, SeparationMode::WallClockMinutes);

        tracker.commit(0, at(6, 0), &item);
        assert!(tracker.would_violate_separation(&item, &rule, &slot(1, 6, 29)));
        assert!(!tracker.would_violate_separation(&item, &rule, &slot(1, 6, 30)));
    }

    #[test]
    fn test_campaign_scoped_rule_tracks_campaign() {
        let a = MediaItem::new("S1", MediaKind::Spot, 30).with_campaign("C1");
        let b = MediaItem::new("S2", MediaKind::Spot, 30).with_campaign("C1");
        let other = MediaItem::new("S3", MediaKind::Spot, 30).with_campaign("C2");
        let rule = RotationRule::new("R1", RotationType::Even, 1)
            .for_campaign("C1")
            .with_min_separation(3);
        let mut tracker = HistoryTracker::new(16, SeparationMode::SlotCount);

        tracker.commit(0, at(6, 0), &a);
        assert!(tracker.would_violate_separation(&b, &rule, &slot(2, 6, 10)));
        assert!(!tracker.would_violate_separation(&other, &rule, &slot(1, 6, 5)));
    }

    #[test]
    fn test_hour_window_is_sliding() {
        let item = MediaItem::new("M1", MediaKind::Music, 180);
        let rule = RotationRule::new("R1", RotationType::Sequential, 1).with_max_per_hour(2);
        let mut tracker = HistoryTracker::new(16, SeparationMode::SlotCount);

        tracker.commit(0, at(6, 40), &item);
        tracker.commit(1, at(7, 20), &item);
        // 06:40 与 07:20 同在 [06:40, 07:40) 内
        assert_eq!(
            tracker.frequency_violation(&item, &rule, &slot(2, 7, 30)),
            Some(FrequencyWindow::Hour)
        );
        assert_eq!(tracker.frequency_violation(&item, &rule, &slot(2, 7, 45)), None);
        // 整点相隔60分钟不在同一窗口
        assert_eq!(tracker.frequency_violation(&item, &rule, &slot(2, 8, 20)), None);
    }

    #[test]
    fn test_day_cap_ignores_other_dates() {
        let item = MediaItem::new("M1", MediaKind::Music, 180);
        let rule = RotationRule::new("R1", RotationType::Sequential, 1).with_max_per_day(1);
        let seed = HistorySeed::empty().with_play(
            "M1",
            None,
            -1,
            NaiveDate::from_ymd_opt(2025, 2, 28)
                .unwrap()
                .and_hms_opt(23, 0, 0)
                .unwrap(),
        );
        let log = TrafficLog {
            log_id: "L1".to_string(),
            station_id: "KXYZ".to_string(),
            log_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            slots: vec![],
            state: crate::domain::types::LogState::Draft,
            conflicts: vec![],
            revision: 0,
            created_at: at(0, 0),
            updated_at: at(0, 0),
        };
        let catalog = CatalogSnapshot::new(vec![item.clone()]).unwrap();
        let mut tracker =
            HistoryTracker::for_log(8, SeparationMode::SlotCount, None, &seed, &log, &catalog);

        assert!(!tracker.would_violate_frequency(&item, &rule, &slot(0, 6, 0)));
        tracker.commit(0, at(6, 0), &item);
        assert_eq!(
            tracker.frequency_violation(&item, &rule, &slot(5, 18, 0)),
            Some(FrequencyWindow::Day)
        );
        assert_eq!(tracker.log_play_count("M1"), 1);
        assert_eq!(tracker.last_play_before("M1", 3), Some(0));
    }

    #[test]
    fn test_checkpoint_rollback() {
        let item = MediaItem::new("M1", MediaKind::Music, 180);
        let mut tracker = HistoryTracker::new(4, SeparationMode::SlotCount);
        tracker.commit(0, at(6, 0), &item);

        let cp = tracker.checkpoint();
        tracker.commit(3, at(6, 15), &item);
        assert_eq!(tracker.log_play_count("M1"), 2);

        tracker.rollback_to(cp);
        assert_eq!(tracker.log_play_count("M1"), 1);
        assert_eq!(tracker.last_play_before("M1", 10), Some(0));
    }

    #[test]
    fn test_depth_raised_above_hourly_cap() {
        let mut tracker = HistoryTracker::new(2, SeparationMode::SlotCount);
        tracker.ensure_depth_for_hourly_cap(Some(6));
        assert_eq!(tracker.depth(), 7);
    }

    #[test]
    fn test_depth_trims_seed_plays_only() {
        let item = MediaItem::new("M1", MediaKind::Music, 180);
        let rule = RotationRule::new("R1", RotationType::Sequential, 1).with_min_separation(1);
        let mut tracker = HistoryTracker::new(2, SeparationMode::SlotCount);

        tracker.record("M1", None, -2, at(0, 0) - Duration::minutes(10), false);
        tracker.record("M1", None, -1, at(0, 0) - Duration::minutes(5), false);
        for position in [0u32, 2, 4, 6] {
            tracker.commit(position, at(6, position), &item);
        }

        // 种子被裁剪, 节目单内播出全部保留
        assert_eq!(tracker.last_play_before("M1", 0), None);
        assert!(tracker.would_violate_separation(&item, &rule, &slot(1, 6, 1)));
        assert!(tracker.would_violate_separation(&item, &rule, &slot(5, 6, 5)));
        assert_eq!(tracker.log_play_count("M1"), 4);
    }
}
