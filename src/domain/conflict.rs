// ==========================================
// 广播排播系统 - 冲突记录领域模型
// ==========================================
// 用途: 记录无法在规则约束下填充的时段
// ==========================================

use crate::domain::types::ConflictResolution;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// FrequencyWindow - 频次窗口
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrequencyWindow {
    Hour, // 任意60分钟窗口
    Day,  // 自然日
}

// ==========================================
// ConflictReason - 冲突原因 (带标签变体)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictReason {
    /// 时段准入后无可用素材
    NoEligibleItem,
    /// 所有候选均违反该规则的最小间隔
    SeparationExhausted { rule_id: String },
    /// 所有候选均触及该规则的频次上限
    FrequencyCapExhausted {
        rule_id: String,
        window: FrequencyWindow,
    },
    /// 两条规则各自可满足,但无法同时满足
    RulePriorityConflict {
        higher_rule_id: String,
        lower_rule_id: String,
    },
}

impl ConflictReason {
    /// 原因代码 (与审计日志展示一致)
    pub fn code(&self) -> &'static str {
        match self {
            ConflictReason::NoEligibleItem => "NO_ELIGIBLE_ITEM",
            ConflictReason::SeparationExhausted { .. } => "SEPARATION_EXHAUSTED",
            ConflictReason::FrequencyCapExhausted { .. } => "FREQUENCY_CAP_EXHAUSTED",
            ConflictReason::RulePriorityConflict { .. } => "RULE_PRIORITY_CONFLICT",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::NoEligibleItem => write!(f, "NO_ELIGIBLE_ITEM"),
            ConflictReason::SeparationExhausted { rule_id } => {
                write!(f, "SEPARATION_EXHAUSTED: rule={}", rule_id)
            }
            ConflictReason::FrequencyCapExhausted { rule_id, window } => {
                write!(f, "FREQUENCY_CAP_EXHAUSTED: rule={}, window={:?}", rule_id, window)
            }
            ConflictReason::RulePriorityConflict {
                higher_rule_id,
                lower_rule_id,
            } => write!(
                f,
                "RULE_PRIORITY_CONFLICT: higher={}, lower={}",
                higher_rule_id, lower_rule_id
            ),
        }
    }
}

// ==========================================
// ConflictRecord - 冲突记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub slot_position: u32,             // 时段序号
    pub reason: ConflictReason,         // 冲突原因
    pub candidates_considered: usize,   // 参与评估的候选数
    pub resolution: ConflictResolution, // 处理结果
    #[serde(default)]
    pub relaxed_rules: Vec<String>,     // 放宽的规则 (按放宽顺序)
    pub resolved_item: Option<String>,  // 最终填充素材
}

impl ConflictRecord {
    /// 未解决冲突
    pub fn unresolved(slot_position: u32, reason: ConflictReason, candidates_considered: usize) -> Self {
        Self {
            slot_position,
            reason,
            candidates_considered,
            resolution: ConflictResolution::Unresolved,
            relaxed_rules: Vec::new(),
            resolved_item: None,
        }
    }

    /// 放宽规则后自动解决的冲突
    pub fn auto_relaxed(
        slot_position: u32,
        reason: ConflictReason,
        candidates_considered: usize,
        relaxed_rules: Vec<String>,
        item_id: String,
    ) -> Self {
        Self {
            slot_position,
            reason,
            candidates_considered,
            resolution: ConflictResolution::AutoRelaxed,
            relaxed_rules,
            resolved_item: Some(item_id),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.resolution == ConflictResolution::Unresolved
    }

    /// 该时段是否放宽了指定规则
    pub fn relaxed(&self, rule_id: &str) -> bool {
        self.resolution != ConflictResolution::Unresolved
            && self.relaxed_rules.iter().any(|r| r == rule_id)
    }
}
