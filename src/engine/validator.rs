// ==========================================
// 广播排播系统 - 节目单校验
// ==========================================
// 职责: 发布前校验规则约束与时段准入
// 输入: 节目单 + 目录快照 + 规则快照 + 间隔计量方式
// 输出: ValidationReport
// ==========================================
// 判定口径:
// - 规则在某时段"生效": 作用于该时段 daypart、未被该时段放宽、该时段非人工处理
// - 间隔: 两端均生效且两端素材均不允许连播才计违规
// - 频次: 超限窗口内所有播出时段均生效才计违规
// ==========================================

use crate::domain::media::MediaItem;
use crate::domain::rule::RotationRule;
use crate::domain::traffic_log::{Slot, TrafficLog};
use crate::domain::types::{ConflictResolution, SeparationMode};
use crate::engine::history::{HistoryKey, HOUR_WINDOW_MINUTES};
use crate::engine::snapshot::{CatalogSnapshot, RuleStoreSnapshot};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

// ==========================================
// 违规类型
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogViolation {
    /// 素材不在目录中
    UnknownItem { position: u32, item_id: String },
    /// 素材不允许在该时段播出
    DaypartIneligible {
        position: u32,
        item_id: String,
        daypart_id: String,
    },
    /// 两次播出间隔不足
    Separation {
        rule_id: String,
        first_position: u32,
        second_position: u32,
    },
    /// 60分钟窗口内播出超限
    HourCapExceeded {
        rule_id: String,
        position: u32,
        count: usize,
        cap: u32,
    },
    /// 自然日内播出超限
    DayCapExceeded {
        rule_id: String,
        date: NaiveDate,
        count: usize,
        cap: u32,
    },
}

impl fmt::Display for LogViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogViolation::UnknownItem { position, item_id } => {
                write!(f, "时段 {}: 素材 {} 不在目录中", position, item_id)
            }
            LogViolation::DaypartIneligible {
                position,
                item_id,
                daypart_id,
            } => write!(
                f,
                "时段 {}: 素材 {} 不允许在 {} 播出",
                position, item_id, daypart_id
            ),
            LogViolation::Separation {
                rule_id,
                first_position,
                second_position,
            } => write!(
                f,
                "规则 {}: 时段 {} 与 {} 间隔不足",
                rule_id, first_position, second_position
            ),
            LogViolation::HourCapExceeded {
                rule_id,
                position,
                count,
                cap,
            } => write!(
                f,
                "规则 {}: 时段 {} 所在60分钟窗口播出 {} 次, 上限 {}",
                rule_id, position, count, cap
            ),
            LogViolation::DayCapExceeded {
                rule_id,
                date,
                count,
                cap,
            } => write!(f, "规则 {}: {} 播出 {} 次, 上限 {}", rule_id, date, count, cap),
        }
    }
}

/// 校验报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<LogViolation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// 同一键下的一次播出
struct KeyedPlay<'a> {
    slot: &'a Slot,
    item: &'a MediaItem,
}

// ==========================================
// LogValidator - 节目单校验器
// ==========================================
pub struct LogValidator;

impl LogValidator {
    /// 校验节目单
    ///
    /// # 参数
    /// - `log`: 节目单
    /// - `catalog`: 目录快照
    /// - `rules`: 规则快照
    /// - `mode`: 间隔计量方式
    pub fn validate(
        log: &TrafficLog,
        catalog: &CatalogSnapshot,
        rules: &RuleStoreSnapshot,
        mode: SeparationMode,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();

        let mut filled: Vec<(&Slot, &MediaItem)> = Vec::new();
        for slot in log.slots.iter().filter(|s| s.is_filled()) {
            let item_id = match slot.assigned_item.as_deref() {
                Some(id) => id,
                None => continue,
            };
            match catalog.get(item_id) {
                Some(item) => {
                    if !item.is_daypart_eligible(&slot.daypart_id) {
                        report.violations.push(LogViolation::DaypartIneligible {
                            position: slot.position,
                            item_id: item_id.to_string(),
                            daypart_id: slot.daypart_id.clone(),
                        });
                    }
                    filled.push((slot, item));
                }
                None => report.violations.push(LogViolation::UnknownItem {
                    position: slot.position,
                    item_id: item_id.to_string(),
                }),
            }
        }
        filled.sort_by_key(|(s, _)| s.position);

        for rule in rules.rules() {
            let mut by_key: BTreeMap<HistoryKey, Vec<KeyedPlay<'_>>> = BTreeMap::new();
            for &(slot, item) in &filled {
                if let Some(key) = HistoryKey::for_rule(item, rule) {
                    by_key.entry(key).or_default().push(KeyedPlay { slot, item });
                }
            }

            for plays in by_key.values() {
                Self::check_separation(log, rule, plays, mode, &mut report);
                Self::check_hour_cap(log, rule, plays, &mut report);
                Self::check_day_cap(log, rule, plays, &mut report);
            }
        }

        debug!(
            log_id = %log.log_id,
            violations = report.violations.len(),
            "节目单校验完成"
        );
        report
    }

    /// 规则在该时段是否生效
    fn enforced(log: &TrafficLog, rule: &RotationRule, slot: &Slot) -> bool {
        if !rule.applies_to_daypart(&slot.daypart_id) {
            return false;
        }
        match log.conflict_for(slot.position) {
            Some(record) => {
                record.resolution != ConflictResolution::Manual && !record.relaxed(&rule.id)
            }
            None => true,
        }
    }

    fn check_separation(
        log: &TrafficLog,
        rule: &RotationRule,
        plays: &[KeyedPlay<'_>],
        mode: SeparationMode,
        report: &mut ValidationReport,
    ) {
        if !rule.has_separation() {
            return;
        }
        let strict = |p: &KeyedPlay<'_>| Self::enforced(log, rule, p.slot) && !p.item.allow_back_to_back;
        let min = rule.min_separation as i64;

        for (i, first) in plays.iter().enumerate() {
            for second in &plays[i + 1..] {
                let gap = match mode {
                    SeparationMode::SlotCount => {
                        second.slot.position as i64 - first.slot.position as i64 - 1
                    }
                    SeparationMode::WallClockMinutes => {
                        (second.slot.start_time - first.slot.start_time).num_minutes().abs()
                    }
                };
                if gap >= min {
                    break;
                }
                if strict(first) && strict(second) {
                    report.violations.push(LogViolation::Separation {
                        rule_id: rule.id.clone(),
                        first_position: first.slot.position,
                        second_position: second.slot.position,
                    });
                }
            }
        }
    }

    fn check_hour_cap(
        log: &TrafficLog,
        rule: &RotationRule,
        plays: &[KeyedPlay<'_>],
        report: &mut ValidationReport,
    ) {
        let cap = match rule.max_per_hour {
            Some(cap) => cap,
            None => return,
        };
        let window = Duration::minutes(HOUR_WINDOW_MINUTES);

        let mut by_time: Vec<&KeyedPlay<'_>> = plays.iter().collect();
        by_time.sort_by_key(|p| p.slot.start_time);

        for (i, start) in by_time.iter().enumerate() {
            let end = start.slot.start_time + window;
            let in_window: Vec<&&KeyedPlay<'_>> = by_time[i..]
                .iter()
                .take_while(|p| p.slot.start_time < end)
                .collect();
            if in_window.len() > cap as usize
                && in_window.iter().all(|p| Self::enforced(log, rule, p.slot))
            {
                let last = in_window[in_window.len() - 1];
                report.violations.push(LogViolation::HourCapExceeded {
                    rule_id: rule.id.clone(),
                    position: last.slot.position,
                    count: in_window.len(),
                    cap,
                });
            }
        }
    }

    fn check_day_cap(
        log: &TrafficLog,
        rule: &RotationRule,
        plays: &[KeyedPlay<'_>],
        report: &mut ValidationReport,
    ) {
        let cap = match rule.max_per_day {
            Some(cap) => cap,
            None => return,
        };

        let mut by_date: BTreeMap<NaiveDate, Vec<&KeyedPlay<'_>>> = BTreeMap::new();
        for play in plays {
            by_date.entry(play.slot.start_time.date()).or_default().push(play);
        }

        for (date, day_plays) in by_date {
            if day_plays.len() > cap as usize
                && day_plays.iter().all(|p| Self::enforced(log, rule, p.slot))
            {
                report.violations.push(LogViolation::DayCapExceeded {
                    rule_id: rule.id.clone(),
                    date,
                    count: day_plays.len(),
                    cap,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conflict::{ConflictReason, ConflictRecord};
    use crate::domain::rule::Daypart;
    use crate::domain::types::{LogState, MediaKind, RotationType};
    use chrono::NaiveTime;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    fn snapshot(rules: Vec<RotationRule>) -> RuleStoreSnapshot {
        let dp = |id: &str, s: u32, e: u32| Daypart {
            id: id.to_string(),
            station_id: "KXYZ".to_string(),
            name: id.to_string(),
            start_time: NaiveTime::from_hms_opt(s, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(e, 0, 0).unwrap(),
            category: None,
        };
        RuleStoreSnapshot::new("KXYZ", vec![dp("AM", 0, 12), dp("PM", 12, 23)], rules).unwrap()
    }

    fn log_with(items: &[&str], minutes_apart: i64) -> TrafficLog {
        let base = date().and_hms_opt(6, 0, 0).unwrap();
        let slots = items
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let mut slot = Slot::new(
                    i as u32,
                    base + Duration::minutes(i as i64 * minutes_apart),
                    60,
                    "AM",
                );
                slot.fill(id);
                slot
            })
            .collect();
        TrafficLog {
            log_id: "LOG1".to_string(),
            station_id: "KXYZ".to_string(),
            log_date: date(),
            slots,
            state: LogState::Locked,
            conflicts: vec![],
            revision: 0,
            created_at: base,
            updated_at: base,
        }
    }

    #[test]
    fn test_clean_log_is_valid() {
        let catalog = CatalogSnapshot::new(vec![
            MediaItem::new("M1", MediaKind::Music, 180),
            MediaItem::new("M2", MediaKind::Music, 180),
        ])
        .unwrap();
        let rules = snapshot(vec![
            RotationRule::new("R1", RotationType::Sequential, 1).with_min_separation(1)
        ]);
        let log = log_with(&["M1", "M2", "M1", "M2"], 5);
        assert!(LogValidator::validate(&log, &catalog, &rules, SeparationMode::SlotCount).is_valid());
    }

    #[test]
    fn test_detects_separation_and_daypart() {
        let catalog = CatalogSnapshot::new(vec![
            MediaItem::new("M1", MediaKind::Music, 180),
            MediaItem::new("M2", MediaKind::Music, 180).with_dayparts(["PM"]),
        ])
        .unwrap();
        let rules = snapshot(vec![
            RotationRule::new("R1", RotationType::Sequential, 1).with_min_separation(2)
        ]);
        let log = log_with(&["M1", "M2", "M1"], 5);
        let report = LogValidator::validate(&log, &catalog, &rules, SeparationMode::SlotCount);

        assert_eq!(report.violations.len(), 2);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, LogViolation::DaypartIneligible { position: 1, .. })));
        assert!(report.violations.iter().any(|v| matches!(
            v,
            LogViolation::Separation {
                first_position: 0,
                second_position: 2,
                ..
            }
        )));
    }

    #[test]
    fn test_relaxed_rule_is_ignored() {
        let catalog = CatalogSnapshot::new(vec![MediaItem::new("M1", MediaKind::Music, 180)]).unwrap();
        let rules = snapshot(vec![
            RotationRule::new("R1", RotationType::Sequential, 1).with_max_per_hour(1)
        ]);
        let mut log = log_with(&["M1", "M1"], 10);
        let report = LogValidator::validate(&log, &catalog, &rules, SeparationMode::SlotCount);
        assert!(matches!(
            report.violations.as_slice(),
            [LogViolation::HourCapExceeded { count: 2, cap: 1, .. }]
        ));

        log.conflicts.push(ConflictRecord::auto_relaxed(
            1,
            ConflictReason::FrequencyCapExhausted {
                rule_id: "R1".to_string(),
                window: crate::domain::conflict::FrequencyWindow::Hour,
            },
            1,
            vec!["R1".to_string()],
            "M1".to_string(),
        ));
        assert!(LogValidator::validate(&log, &catalog, &rules, SeparationMode::SlotCount).is_valid());
    }

    #[test]
    fn test_day_cap() {
        let catalog = CatalogSnapshot::new(vec![
            MediaItem::new("S1", MediaKind::Spot, 30).with_campaign("C1"),
            MediaItem::new("S2", MediaKind::Spot, 30).with_campaign("C1"),
        ])
        .unwrap();
        let rules = snapshot(vec![RotationRule::new("R1", RotationType::Even, 1)
            .for_campaign("C1")
            .with_max_per_day(2)]);
        let log = log_with(&["S1", "S2", "S1"], 90);
        let report = LogValidator::validate(&log, &catalog, &rules, SeparationMode::SlotCount);
        assert!(matches!(
            report.violations.as_slice(),
            [LogViolation::DayCapExceeded { count: 3, cap: 2, .. }]
        ));
    }
}
