// ==========================================
// 广播排播系统 - 候选素材排序
// ==========================================
// 职责: 规则约束过滤 + 按轮播类型排序
// 输入: 可用素材 + 作用规则 (优先级降序) + HistoryTracker
// 输出: 合法候选 (有序) + 被拒候选及违规明细
// ==========================================

use crate::config::WeightProfile;
use crate::domain::conflict::FrequencyWindow;
use crate::domain::media::MediaItem;
use crate::domain::rule::RotationRule;
use crate::domain::traffic_log::Slot;
use crate::domain::types::RotationType;
use crate::engine::history::HistoryTracker;
use crate::engine::snapshot::CatalogSnapshot;
use chrono::NaiveDate;
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

// ==========================================
// 违规明细
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Separation,
    Frequency(FrequencyWindow),
}

impl ViolationKind {
    pub fn is_separation(&self) -> bool {
        matches!(self, ViolationKind::Separation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleViolation {
    pub rule_id: String,
    pub priority: i32,
    pub kind: ViolationKind,
}

/// 被拒候选
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub item_id: String,
    pub violations: Vec<RuleViolation>,
}

impl Rejection {
    pub fn violates(&self, rule_id: &str) -> bool {
        self.violations.iter().any(|v| v.rule_id == rule_id)
    }

    /// 该候选对指定规则的违规是否包含频次类
    pub fn frequency_window(&self, rule_id: &str) -> Option<FrequencyWindow> {
        self.violations.iter().find_map(|v| match v.kind {
            ViolationKind::Frequency(window) if v.rule_id == rule_id => Some(window),
            _ => None,
        })
    }
}

/// 排序结果
#[derive(Debug, Clone)]
pub struct RankedCandidates<'a> {
    pub ordered: Vec<&'a MediaItem>,
    pub rejections: Vec<Rejection>,
}

impl<'a> RankedCandidates<'a> {
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn top(&self) -> Option<&'a MediaItem> {
        self.ordered.first().copied()
    }
}

/// 单个时段的排序上下文
pub struct RankingContext<'r> {
    pub station_id: &'r str,
    pub log_date: NaiveDate,
    pub slot: &'r Slot,
    pub rotation: RotationType,
}

// ==========================================
// CandidateRanker - 候选排序器
// ==========================================
pub struct CandidateRanker {
    weight_profile: WeightProfile,
}

impl CandidateRanker {
    pub fn new(weight_profile: WeightProfile) -> Self {
        Self { weight_profile }
    }

    /// 本时段使用的轮播类型
    ///
    /// 取约束至少一个候选的最高优先级规则; 只作用于其他活动的规则不参与
    pub fn rotation_for(
        rules: &[&RotationRule],
        candidates: &[&MediaItem],
        default: RotationType,
    ) -> RotationType {
        rules
            .iter()
            .find(|r| {
                candidates
                    .iter()
                    .any(|c| r.applies_to_campaign(c.campaign_id.as_deref()))
            })
            .map_or(default, |r| r.rotation_type)
    }

    /// 评估单个候选对作用规则的违规
    pub fn violations(
        item: &MediaItem,
        rules: &[&RotationRule],
        slot: &Slot,
        history: &HistoryTracker,
    ) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for rule in rules {
            if !rule.applies_to_campaign(item.campaign_id.as_deref()) {
                continue;
            }
            if history.would_violate_separation(item, rule, slot) {
                violations.push(RuleViolation {
                    rule_id: rule.id.clone(),
                    priority: rule.priority,
                    kind: ViolationKind::Separation,
                });
            }
            if let Some(window) = history.frequency_violation(item, rule, slot) {
                violations.push(RuleViolation {
                    rule_id: rule.id.clone(),
                    priority: rule.priority,
                    kind: ViolationKind::Frequency(window),
                });
            }
        }
        violations
    }

    /// 连播豁免只覆盖间隔类违规
    fn is_legal(item: &MediaItem, violations: &[RuleViolation]) -> bool {
        violations.is_empty()
            || (item.allow_back_to_back && violations.iter().all(|v| v.kind.is_separation()))
    }

    /// 过滤并排序候选
    ///
    /// # 参数
    /// - `candidates`: 时段准入后的素材 (目录顺序)
    /// - `rules`: 作用规则 (优先级降序)
    /// - `ctx`: 时段与轮播类型
    /// - `history`: 播出历史
    /// - `catalog`: 目录 (平局裁决)
    pub fn rank<'a>(
        &self,
        candidates: &[&'a MediaItem],
        rules: &[&RotationRule],
        ctx: &RankingContext<'_>,
        history: &HistoryTracker,
        catalog: &CatalogSnapshot,
    ) -> RankedCandidates<'a> {
        let mut legal = Vec::with_capacity(candidates.len());
        let mut rejections = Vec::new();

        for &item in candidates {
            let violations = Self::violations(item, rules, ctx.slot, history);
            if Self::is_legal(item, &violations) {
                legal.push(item);
            } else {
                rejections.push(Rejection {
                    item_id: item.id.clone(),
                    violations,
                });
            }
        }

        let ordered = self.order(legal, ctx, history, catalog);
        RankedCandidates {
            ordered,
            rejections,
        }
    }

    fn order<'a>(
        &self,
        mut items: Vec<&'a MediaItem>,
        ctx: &RankingContext<'_>,
        history: &HistoryTracker,
        catalog: &CatalogSnapshot,
    ) -> Vec<&'a MediaItem> {
        let position = ctx.slot.position as i64;
        let round_robin = |a: &MediaItem, b: &MediaItem| -> Ordering {
            // 从未播出优先, 其次最久未播优先, 再按目录顺序
            let la = history.last_play_before(&a.id, position);
            let lb = history.last_play_before(&b.id, position);
            let by_recency = match (la, lb) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(&y),
            };
            by_recency.then_with(|| catalog.order_of(&a.id).cmp(&catalog.order_of(&b.id)))
        };

        match ctx.rotation {
            RotationType::Sequential => {
                items.sort_by(|a, b| round_robin(*a, *b));
            }
            RotationType::Random => {
                items.sort_by_key(|m| catalog.order_of(&m.id));
                let mut rng = ChaCha8Rng::seed_from_u64(random_seed(
                    ctx.log_date,
                    ctx.station_id,
                    ctx.slot.position,
                ));
                items.shuffle(&mut rng);
            }
            RotationType::Weighted => {
                items.sort_by(|a, b| {
                    let wa = self.weight_profile.effective_weight(a);
                    let wb = self.weight_profile.effective_weight(b);
                    wb.total_cmp(&wa).then_with(|| round_robin(*a, *b))
                });
            }
            RotationType::Even => {
                items.sort_by(|a, b| {
                    history
                        .log_play_count(&a.id)
                        .cmp(&history.log_play_count(&b.id))
                        .then_with(|| round_robin(*a, *b))
                });
            }
        }
        items
    }
}

/// RANDOM 轮播种子: SHA-256(log_date, station_id, position) 前8字节
pub fn random_seed(log_date: NaiveDate, station_id: &str, position: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(log_date.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(station_id.as_bytes());
    hasher.update(b"|");
    hasher.update(position.to_be_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
