// ==========================================
// 广播排播系统 - 冲突识别与放宽
// ==========================================
// 职责: 时段无合法候选时归类冲突原因,选择放宽的规则
// 输入: 准入候选数 + 被拒明细 + 作用规则 (优先级降序)
// 输出: ConflictReason / 待放宽规则
// ==========================================

use crate::domain::conflict::{ConflictReason, FrequencyWindow};
use crate::domain::rule::RotationRule;
use crate::engine::ranker::Rejection;

// ==========================================
// ConflictDetector - 冲突识别器
// ==========================================
pub struct ConflictDetector;

impl ConflictDetector {
    /// 归类冲突原因
    ///
    /// 规则:
    /// 1) 准入后无素材 -> NO_ELIGIBLE_ITEM
    /// 2) 存在全部候选都违反的规则: 取其中优先级最高者,
    ///    全部候选都触及其频次上限 -> FREQUENCY_CAP_EXHAUSTED, 否则 SEPARATION_EXHAUSTED
    /// 3) 否则 -> RULE_PRIORITY_CONFLICT (违反的最高/最低优先级规则)
    ///
    /// # 参数
    /// - `eligible_count`: 时段准入后的候选数
    /// - `rejections`: 被拒候选 (排序结果为空时即全部候选)
    /// - `rules`: 作用规则 (优先级降序)
    pub fn classify(
        eligible_count: usize,
        rejections: &[Rejection],
        rules: &[&RotationRule],
    ) -> ConflictReason {
        if eligible_count == 0 || rejections.is_empty() {
            return ConflictReason::NoEligibleItem;
        }

        let exhausting = rules
            .iter()
            .find(|rule| rejections.iter().all(|r| r.violates(&rule.id)));

        if let Some(rule) = exhausting {
            let windows: Vec<Option<FrequencyWindow>> = rejections
                .iter()
                .map(|r| r.frequency_window(&rule.id))
                .collect();
            if windows.iter().all(Option::is_some) {
                let window = if windows.iter().all(|w| *w == Some(FrequencyWindow::Day)) {
                    FrequencyWindow::Day
                } else {
                    FrequencyWindow::Hour
                };
                return ConflictReason::FrequencyCapExhausted {
                    rule_id: rule.id.clone(),
                    window,
                };
            }
            return ConflictReason::SeparationExhausted {
                rule_id: rule.id.clone(),
            };
        }

        let violated: Vec<&&RotationRule> = rules
            .iter()
            .filter(|rule| rejections.iter().any(|r| r.violates(&rule.id)))
            .collect();

        match (violated.first(), violated.last()) {
            (Some(higher), Some(lower)) => ConflictReason::RulePriorityConflict {
                higher_rule_id: higher.id.clone(),
                lower_rule_id: lower.id.clone(),
            },
            _ => ConflictReason::NoEligibleItem,
        }
    }

    /// 选择下一条放宽的规则: 至少一个候选违反的规则中优先级最低者
    ///
    /// # 返回
    /// - Some(index): 规则在 `rules` 中的下标
    /// - None: 无可放宽规则
    pub fn next_relaxation(rejections: &[Rejection], rules: &[&RotationRule]) -> Option<usize> {
        rules
            .iter()
            .rposition(|rule| rejections.iter().any(|r| r.violates(&rule.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::RotationType;
    use crate::engine::ranker::{RuleViolation, ViolationKind};

    fn violation(rule: &RotationRule, kind: ViolationKind) -> RuleViolation {
        RuleViolation {
            rule_id: rule.id.clone(),
            priority: rule.priority,
            kind,
        }
    }

    fn rejection(item: &str, violations: Vec<RuleViolation>) -> Rejection {
        Rejection {
            item_id: item.to_string(),
            violations,
        }
    }

    #[test]
    fn test_no_eligible_item() {
        assert_eq!(ConflictDetector::classify(0, &[], &[]), ConflictReason::NoEligibleItem);
    }

    #[test]
    fn test_frequency_cap_exhausted() {
        let rule = RotationRule::new("R1", RotationType::Even, 10).with_max_per_hour(1);
        let hour = ViolationKind::Frequency(FrequencyWindow::Hour);
        let rejections = vec![
            rejection("S1", vec![violation(&rule, hour)]),
            rejection(
                "S2",
                vec![violation(&rule, ViolationKind::Separation), violation(&rule, hour)],
            ),
        ];
        assert_eq!(
            ConflictDetector::classify(2, &rejections, &[&rule]),
            ConflictReason::FrequencyCapExhausted {
                rule_id: "R1".to_string(),
                window: FrequencyWindow::Hour
            }
        );
    }

    #[test]
    fn test_separation_exhausted_uses_highest_priority_rule() {
        let high = RotationRule::new("HIGH", RotationType::Even, 10).with_min_separation(4);
        let low = RotationRule::new("LOW", RotationType::Even, 1).with_max_per_day(1);
        let day = ViolationKind::Frequency(FrequencyWindow::Day);
        let rejections = vec![
            rejection(
                "M1",
                vec![violation(&high, ViolationKind::Separation), violation(&low, day)],
            ),
            rejection(
                "M2",
                vec![violation(&high, ViolationKind::Separation), violation(&low, day)],
            ),
        ];
        assert_eq!(
            ConflictDetector::classify(2, &rejections, &[&high, &low]),
            ConflictReason::SeparationExhausted {
                rule_id: "HIGH".to_string()
            }
        );
        assert_eq!(ConflictDetector::next_relaxation(&rejections, &[&high, &low]), Some(1));
    }

    #[test]
    fn test_rule_priority_conflict() {
        let high = RotationRule::new("HIGH", RotationType::Even, 10).with_min_separation(4);
        let mid = RotationRule::new("MID", RotationType::Even, 5).with_min_separation(1);
        let low = RotationRule::new("LOW", RotationType::Even, 1).with_max_per_day(1);
        let rejections = vec![
            rejection("M1", vec![violation(&high, ViolationKind::Separation)]),
            rejection(
                "M2",
                vec![violation(&low, ViolationKind::Frequency(FrequencyWindow::Day))],
            ),
        ];
        let rules = [&high, &mid, &low];
        assert_eq!(
            ConflictDetector::classify(2, &rejections, &rules),
            ConflictReason::RulePriorityConflict {
                higher_rule_id: "HIGH".to_string(),
                lower_rule_id: "LOW".to_string()
            }
        );
        // MID 无候选违反,不作为放宽对象
        assert_eq!(ConflictDetector::next_relaxation(&rejections, &rules), Some(2));
    }
}
