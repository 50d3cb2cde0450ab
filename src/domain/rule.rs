// ==========================================
// 广播排播系统 - 轮播规则与时段领域模型
// ==========================================
// 职责: 定义 Daypart / RotationRule
// 红线: 规则作用域缺省即全局
// ==========================================

use crate::domain::types::RotationType;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Daypart - 播出时段
// ==========================================
// 不变量: start_time < end_time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Daypart {
    pub id: String,               // 时段ID
    pub station_id: String,       // 电台ID
    pub name: String,             // 时段名称
    pub start_time: NaiveTime,    // 开始时间 (含)
    pub end_time: NaiveTime,      // 结束时间 (不含)
    pub category: Option<String>, // 时段类别
}

impl Daypart {
    /// 时间是否落在本时段内 [start, end)
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start_time <= time && time < self.end_time
    }

    /// 起止时间是否合法
    pub fn is_well_formed(&self) -> bool {
        self.start_time < self.end_time
    }
}

// ==========================================
// RotationRule - 轮播规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRule {
    pub id: String,                  // 规则ID
    pub name: String,                // 规则名称
    pub rotation_type: RotationType, // 轮播类型
    pub daypart_id: Option<String>,  // 作用时段 (None = 全时段)
    pub campaign_id: Option<String>, // 作用广告活动 (None = 按单个素材)
    pub min_separation: u32,         // 最小间隔
    pub max_per_hour: Option<u32>,   // 每小时上限
    pub max_per_day: Option<u32>,    // 每日上限
    pub priority: i32,               // 优先级 (越大越优先)
    pub active: bool,                // 是否启用
}

impl RotationRule {
    /// 创建全局规则 (无间隔/无上限)
    pub fn new(id: impl Into<String>, rotation_type: RotationType, priority: i32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            rotation_type,
            daypart_id: None,
            campaign_id: None,
            min_separation: 0,
            max_per_hour: None,
            max_per_day: None,
            priority,
            active: true,
        }
    }

    pub fn for_daypart(mut self, daypart_id: impl Into<String>) -> Self {
        self.daypart_id = Some(daypart_id.into());
        self
    }

    pub fn for_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn with_min_separation(mut self, min_separation: u32) -> Self {
        self.min_separation = min_separation;
        self
    }

    pub fn with_max_per_hour(mut self, max: u32) -> Self {
        self.max_per_hour = Some(max);
        self
    }

    pub fn with_max_per_day(mut self, max: u32) -> Self {
        self.max_per_day = Some(max);
        self
    }

    /// 规则是否作用于该时段 (仅判断时段作用域)
    pub fn applies_to_daypart(&self, daypart_id: &str) -> bool {
        self.active
            && self
                .daypart_id
                .as_deref()
                .map_or(true, |scoped| scoped == daypart_id)
    }

    /// 规则是否约束该素材 (活动作用域)
    pub fn applies_to_campaign(&self, campaign_id: Option<&str>) -> bool {
        match self.campaign_id.as_deref() {
            None => true,
            Some(scoped) => campaign_id == Some(scoped),
        }
    }

    /// 是否为间隔类规则
    pub fn has_separation(&self) -> bool {
        self.min_separation > 0
    }

    /// 是否为频次类规则
    pub fn has_frequency_cap(&self) -> bool {
        self.max_per_hour.is_some() || self.max_per_day.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daypart_contains() {
        let dp = Daypart {
            id: "AM".to_string(),
            station_id: "KXYZ".to_string(),
            name: "Morning Drive".to_string(),
            start_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            category: None,
        };
        assert!(dp.contains(NaiveTime::from_hms_opt(6, 0, 0).unwrap()));
        assert!(dp.contains(NaiveTime::from_hms_opt(9, 59, 59).unwrap()));
        assert!(!dp.contains(NaiveTime::from_hms_opt(10, 0, 0).unwrap()));
        assert!(dp.is_well_formed());
    }

    #[test]
    fn test_rule_scope() {
        let rule = RotationRule::new("R1", RotationType::Even, 10)
            .for_daypart("AM")
            .for_campaign("C1");

        assert!(rule.applies_to_daypart("AM"));
        assert!(!rule.applies_to_daypart("PM"));
        assert!(rule.applies_to_campaign(Some("C1")));
        assert!(!rule.applies_to_campaign(Some("C2")));
        assert!(!rule.applies_to_campaign(None));

        let global = RotationRule::new("R2", RotationType::Sequential, 1);
        assert!(global.applies_to_daypart("ANY"));
        assert!(global.applies_to_campaign(None));
    }

    #[test]
    fn test_inactive_rule_never_applies() {
        let mut rule = RotationRule::new("R1", RotationType::Even, 10);
        rule.active = false;
        assert!(!rule.applies_to_daypart("AM"));
    }
}
