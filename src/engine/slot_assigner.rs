// ==========================================
// 广播排播系统 - 时段填充引擎
// ==========================================
// 红线: 严格按时间顺序单向推进, 时段准入永不放宽
// ==========================================
// 职责: 逐时段选择素材,失败时逐级放宽规则
// 输入: 草稿节目单 + 目录快照 + 规则快照 + HistoryTracker
// 输出: PassResult (时段副本 + 冲突记录 + 待发布事件)
// ==========================================

use crate::config::SchedulerConfig;
use crate::domain::audit::AuditEvent;
use crate::domain::conflict::{ConflictReason, ConflictRecord};
use crate::domain::media::MediaItem;
use crate::domain::rule::RotationRule;
use crate::domain::traffic_log::{Slot, TrafficLog};
use crate::domain::types::{AuditEventType, ConflictResolution, SlotStatus};
use crate::engine::conflict::ConflictDetector;
use crate::engine::eligibility::EligibilityFilter;
use crate::engine::error::{SchedulingError, SchedulingResult};
use crate::engine::history::HistoryTracker;
use crate::engine::ranker::{CandidateRanker, RankingContext};
use crate::engine::snapshot::{CatalogSnapshot, RuleStoreSnapshot};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// 自动排程的操作人
pub const SCHEDULER_ACTOR: &str = "scheduler";

// ==========================================
// RunControl - 运行控制 (取消/超时)
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置超时 (None = 不限)
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deadline = timeout.map(|t| Instant::now() + t);
        self
    }

    /// 请求取消 (所有克隆共享同一标志)
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.is_timed_out()
    }

    pub fn is_timed_out(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

// ==========================================
// SlotOutcome - 单个时段的处理结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    Filled {
        position: u32,
        item_id: String,
    },
    Relaxed {
        position: u32,
        item_id: String,
        reason: ConflictReason,
        relaxed_rules: Vec<String>,
    },
    Unresolved {
        position: u32,
        reason: ConflictReason,
    },
}

impl SlotOutcome {
    pub fn position(&self) -> u32 {
        match self {
            SlotOutcome::Filled { position, .. }
            | SlotOutcome::Relaxed { position, .. }
            | SlotOutcome::Unresolved { position, .. } => *position,
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            SlotOutcome::Filled { item_id, .. } | SlotOutcome::Relaxed { item_id, .. } => {
                Some(item_id)
            }
            SlotOutcome::Unresolved { .. } => None,
        }
    }
}

/// 一次填充的结果 (尚未写回节目单)
#[derive(Debug, Clone)]
pub struct PassResult {
    pub slots: Vec<Slot>,
    pub conflicts: Vec<ConflictRecord>,
    pub outcomes: Vec<SlotOutcome>,
    pub events: Vec<AuditEvent>,
}

impl PassResult {
    pub fn filled_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SlotOutcome::Filled { .. }))
            .count()
    }

    pub fn relaxed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SlotOutcome::Relaxed { .. }))
            .count()
    }

    pub fn unresolved_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SlotOutcome::Unresolved { .. }))
            .count()
    }
}

/// 单时段决策
enum SlotDecision<'c> {
    Filled(&'c MediaItem),
    Relaxed {
        item: &'c MediaItem,
        reason: ConflictReason,
        relaxed_rules: Vec<String>,
        considered: usize,
    },
    Unresolved {
        reason: ConflictReason,
        considered: usize,
    },
}

// ==========================================
// SlotAssigner - 时段填充引擎
// ==========================================
pub struct SlotAssigner {
    config: SchedulerConfig,
    ranker: CandidateRanker,
}

impl SlotAssigner {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            ranker: CandidateRanker::new(config.weight_profile.clone()),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // ==========================================
    // 核心方法
    // ==========================================

    /// 填充节目单中所有待排时段 (UNFILLED / CONFLICT)
    ///
    /// 在节目单副本上执行; 取消时回滚 HistoryTracker 并返回 Cancelled,
    /// 原节目单保持不变
    ///
    /// # 参数
    /// - `log`: 草稿节目单
    /// - `catalog`: 目录快照
    /// - `rules`: 规则快照
    /// - `history`: 播出历史 (会被修改)
    /// - `control`: 取消/超时控制
    ///
    /// # 返回
    /// - Err(LogState): 节目单非草稿
    /// - Err(Configuration): 时段引用未知 daypart 或时段序号重复
    /// - Err(Cancelled): 运行被取消
    #[instrument(skip_all, fields(
        log_id = %log.log_id,
        station_id = %log.station_id,
        log_date = %log.log_date,
        slots = log.slots.len()
    ))]
    pub fn assign(
        &self,
        log: &TrafficLog,
        catalog: &CatalogSnapshot,
        rules: &RuleStoreSnapshot,
        history: &mut HistoryTracker,
        control: &RunControl,
    ) -> SchedulingResult<PassResult> {
        if !log.is_draft() {
            return Err(SchedulingError::log_state(log.state, "只有草稿节目单可以排程"));
        }
        Self::validate_slots(log, rules)?;

        let mut slots = log.slots.clone();
        slots.sort_by_key(|s| s.position);
        let mut conflicts = log.conflicts.clone();
        let mut outcomes = Vec::new();
        let mut events = Vec::new();

        let checkpoint = history.checkpoint();
        let filter = EligibilityFilter::new(rules);

        info!(
            open_slots = slots.iter().filter(|s| s.needs_scheduling()).count(),
            relaxation_enabled = self.config.relaxation_enabled,
            "开始时段填充"
        );

        for slot in slots.iter_mut() {
            if !slot.needs_scheduling() {
                continue;
            }
            if control.is_cancelled() {
                history.rollback_to(checkpoint);
                warn!(position = slot.position, "排程已取消, 回滚本次运行");
                return Err(SchedulingError::Cancelled(format!(
                    "{} 在时段 {} 处中止",
                    log.key(),
                    slot.position
                )));
            }

            let previously_unresolved = conflicts
                .iter()
                .any(|c| c.slot_position == slot.position && c.is_unresolved());
            conflicts.retain(|c| c.slot_position != slot.position);

            let decision = self.decide(slot, log, &filter, catalog, rules, history)?;
            let outcome = match decision {
                SlotDecision::Filled(item) => {
                    Self::commit(slot, item, history);
                    events.push(Self::scheduled_event(log, slot, item));
                    SlotOutcome::Filled {
                        position: slot.position,
                        item_id: item.id.clone(),
                    }
                }
                SlotDecision::Relaxed {
                    item,
                    reason,
                    relaxed_rules,
                    considered,
                } => {
                    Self::commit(slot, item, history);
                    let record = ConflictRecord::auto_relaxed(
                        slot.position,
                        reason.clone(),
                        considered,
                        relaxed_rules.clone(),
                        item.id.clone(),
                    );
                    events.push(Self::detected_event(log, &record));
                    events.push(Self::scheduled_event(log, slot, item));
                    conflicts.push(record);
                    SlotOutcome::Relaxed {
                        position: slot.position,
                        item_id: item.id.clone(),
                        reason,
                        relaxed_rules,
                    }
                }
                SlotDecision::Unresolved { reason, considered } => {
                    slot.clear();
                    slot.status = SlotStatus::Conflict;
                    let record = ConflictRecord::unresolved(slot.position, reason.clone(), considered);
                    events.push(Self::detected_event(log, &record));
                    conflicts.push(record);
                    SlotOutcome::Unresolved {
                        position: slot.position,
                        reason,
                    }
                }
            };

            if previously_unresolved {
                if let Some(item_id) = outcome.item_id() {
                    events.push(
                        AuditEvent::new(
                            &log.log_id,
                            AuditEventType::ConflictResolved,
                            SCHEDULER_ACTOR,
                            format!("重排解决冲突: 时段 {} 排入 {}", slot.position, item_id),
                        )
                        .at_slot(slot.position)
                        .with_metadata(&json!({ "item_id": item_id, "resolution": "RERUN" })),
                    );
                }
            }
            outcomes.push(outcome);
        }

        conflicts.sort_by_key(|c| c.slot_position);
        let result = PassResult {
            slots,
            conflicts,
            outcomes,
            events,
        };
        info!(
            filled = result.filled_count(),
            relaxed = result.relaxed_count(),
            unresolved = result.unresolved_count(),
            "时段填充完成"
        );
        Ok(result)
    }

    /// 仅重排未解决/未填充时段
    ///
    /// 已填充时段作为历史参与间隔与频次判定 (需由调用方写入 HistoryTracker)
    pub fn rerun_unresolved(
        &self,
        log: &TrafficLog,
        catalog: &CatalogSnapshot,
        rules: &RuleStoreSnapshot,
        history: &mut HistoryTracker,
        control: &RunControl,
    ) -> SchedulingResult<PassResult> {
        debug!(
            log_id = %log.log_id,
            open_slots = log.open_slots(),
            unresolved = log.unresolved_count(),
            "重排未解决时段"
        );
        self.assign(log, catalog, rules, history, control)
    }

    // ==========================================
    // 内部方法
    // ==========================================

    fn validate_slots(log: &TrafficLog, rules: &RuleStoreSnapshot) -> SchedulingResult<()> {
        let mut positions = HashSet::with_capacity(log.slots.len());
        for slot in &log.slots {
            if !positions.insert(slot.position) {
                return Err(SchedulingError::configuration(format!(
                    "时段序号重复: {}",
                    slot.position
                )));
            }
            rules.require_daypart(&slot.daypart_id)?;
        }
        Ok(())
    }

    fn decide<'c>(
        &self,
        slot: &Slot,
        log: &TrafficLog,
        filter: &EligibilityFilter<'_>,
        catalog: &'c CatalogSnapshot,
        rules: &RuleStoreSnapshot,
        history: &HistoryTracker,
    ) -> SchedulingResult<SlotDecision<'c>> {
        let eligible = filter.eligible(slot, catalog)?;
        let in_scope = rules.rules_for(&slot.daypart_id);
        let ctx = RankingContext {
            station_id: &log.station_id,
            log_date: log.log_date,
            slot,
            rotation: CandidateRanker::rotation_for(
                &in_scope,
                &eligible,
                self.config.default_rotation_type,
            ),
        };

        let ranked = self.ranker.rank(&eligible, &in_scope, &ctx, history, catalog);
        if let Some(item) = ranked.top() {
            return Ok(SlotDecision::Filled(item));
        }

        let considered = eligible.len();
        let reason = ConflictDetector::classify(considered, &ranked.rejections, &in_scope);
        debug!(position = slot.position, reason = %reason, "时段无合法候选");

        if !self.config.relaxation_enabled || eligible.is_empty() {
            return Ok(SlotDecision::Unresolved { reason, considered });
        }

        // 放宽层级: 每次去掉被违反的最低优先级规则
        let mut active: Vec<&RotationRule> = in_scope;
        let mut rejections = ranked.rejections;
        let mut relaxed_rules = Vec::new();
        while let Some(idx) = ConflictDetector::next_relaxation(&rejections, &active) {
            let dropped = active.remove(idx);
            relaxed_rules.push(dropped.id.clone());

            let ranked = self.ranker.rank(&eligible, &active, &ctx, history, catalog);
            if let Some(item) = ranked.top() {
                debug!(
                    position = slot.position,
                    item_id = %item.id,
                    relaxed = ?relaxed_rules,
                    "放宽规则后填充"
                );
                return Ok(SlotDecision::Relaxed {
                    item,
                    reason,
                    relaxed_rules,
                    considered,
                });
            }
            rejections = ranked.rejections;
        }

        Ok(SlotDecision::Unresolved { reason, considered })
    }

    fn commit(slot: &mut Slot, item: &MediaItem, history: &mut HistoryTracker) {
        slot.fill(&item.id);
        history.commit(slot.position, slot.start_time, item);
    }

    fn scheduled_event(log: &TrafficLog, slot: &Slot, item: &MediaItem) -> AuditEvent {
        AuditEvent::new(
            &log.log_id,
            AuditEventType::SpotScheduled,
            SCHEDULER_ACTOR,
            format!("时段 {} 排入 {}", slot.position, item.id),
        )
        .at_slot(slot.position)
        .with_metadata(&json!({
            "item_id": item.id,
            "kind": item.kind,
            "start_time": slot.start_time,
        }))
    }

    fn detected_event(log: &TrafficLog, record: &ConflictRecord) -> AuditEvent {
        let message = match record.resolution {
            ConflictResolution::AutoRelaxed => format!(
                "时段 {} 冲突 ({}), 放宽规则 {:?} 后填充",
                record.slot_position, record.reason, record.relaxed_rules
            ),
            _ => format!("时段 {} 冲突未解决 ({})", record.slot_position, record.reason),
        };
        AuditEvent::new(&log.log_id, AuditEventType::ConflictDetected, SCHEDULER_ACTOR, message)
            .at_slot(record.slot_position)
            .with_metadata(record)
    }
}
