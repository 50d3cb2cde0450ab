// ==========================================
// 广播排播系统 - 节目单生命周期
// ==========================================
// 状态机: DRAFT -> LOCKED -> PUBLISHED, LOCKED -> DRAFT
// 红线: 非草稿节目单不得修改任何时段; 每次写入必须产生审计事件
// ==========================================
// 职责: 创建草稿、写回填充结果、状态迁移、人工编辑
// 输出: 审计事件 (由调用方统一发布)
// ==========================================

use crate::domain::audit::AuditEvent;
use crate::domain::traffic_log::{Slot, TrafficLog};
use crate::domain::types::{AuditEventType, ConflictResolution, LogState, SeparationMode};
use crate::engine::eligibility::EligibilityFilter;
use crate::engine::error::{SchedulingError, SchedulingResult};
use crate::engine::slot_assigner::PassResult;
use crate::engine::snapshot::{CatalogSnapshot, RuleStoreSnapshot};
use crate::engine::validator::LogValidator;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::json;
use tracing::{info, instrument};

// ==========================================
// LogBuilder - 节目单构建器
// ==========================================
pub struct LogBuilder {
    // 无状态,不需要注入依赖
}

impl Default for LogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuilder {
    pub fn new() -> Self {
        Self {}
    }

    // ==========================================
    // 创建
    // ==========================================

    /// 创建空草稿节目单
    pub fn create_draft(&self, station_id: &str, log_date: NaiveDate, mut slots: Vec<Slot>) -> TrafficLog {
        slots.sort_by_key(|s| s.position);
        let now = Utc::now().naive_utc();
        TrafficLog {
            log_id: uuid::Uuid::new_v4().to_string(),
            station_id: station_id.to_string(),
            log_date,
            slots,
            state: LogState::Draft,
            conflicts: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 按时段定义生成等间隔时段
    ///
    /// # 参数
    /// - `interval_minutes`: 时段间隔 (分钟, >0)
    /// - `duration_secs`: 单个时段时长
    pub fn slots_from_dayparts(
        rules: &RuleStoreSnapshot,
        log_date: NaiveDate,
        interval_minutes: u32,
        duration_secs: u32,
    ) -> SchedulingResult<Vec<Slot>> {
        if interval_minutes == 0 {
            return Err(SchedulingError::configuration("时段间隔必须大于0"));
        }
        let step = Duration::minutes(interval_minutes as i64);

        let mut slots = Vec::new();
        let mut position = 0u32;
        for daypart in rules.dayparts_sorted() {
            let end = log_date.and_time(daypart.end_time);
            let mut t = log_date.and_time(daypart.start_time);
            while t < end {
                slots.push(Slot::new(position, t, duration_secs, daypart.id.clone()));
                position += 1;
                t += step;
            }
        }
        Ok(slots)
    }

    /// 写回一次填充结果
    pub fn apply_pass(&self, log: &mut TrafficLog, pass: PassResult) -> SchedulingResult<Vec<AuditEvent>> {
        Self::ensure_editable(log)?;
        log.slots = pass.slots;
        log.conflicts = pass.conflicts;
        log.touch();
        Ok(pass.events)
    }

    // ==========================================
    // 状态迁移
    // ==========================================

    /// 锁定 (DRAFT -> LOCKED)
    ///
    /// # 参数
    /// - `accept_open`: 是否接受仍有未填充/冲突时段 (人工确认)
    #[instrument(skip(self, log), fields(log_id = %log.log_id))]
    pub fn lock(&self, log: &mut TrafficLog, actor: &str, accept_open: bool) -> SchedulingResult<AuditEvent> {
        Self::check_transition(log, LogState::Locked)?;
        let open = log.open_slots();
        if open > 0 && !accept_open {
            return Err(SchedulingError::log_state(
                log.state,
                format!("仍有 {} 个未填充或冲突时段, 需人工确认后锁定", open),
            ));
        }

        log.state = LogState::Locked;
        log.touch();
        info!(open_slots = open, "节目单已锁定");
        Ok(AuditEvent::new(&log.log_id, AuditEventType::LogLocked, actor, "锁定节目单")
            .with_metadata(&json!({ "open_slots": open, "accepted_open": accept_open })))
    }

    /// 解锁 (LOCKED -> DRAFT)
    #[instrument(skip(self, log), fields(log_id = %log.log_id))]
    pub fn unlock(&self, log: &mut TrafficLog, actor: &str) -> SchedulingResult<AuditEvent> {
        Self::check_transition(log, LogState::Draft)?;
        log.state = LogState::Draft;
        log.touch();
        info!("节目单已解锁");
        Ok(AuditEvent::new(&log.log_id, AuditEventType::LogUnlocked, actor, "解锁节目单"))
    }

    /// 发布 (LOCKED -> PUBLISHED), 发布前执行校验
    #[instrument(skip(self, log, catalog, rules), fields(log_id = %log.log_id))]
    pub fn publish(
        &self,
        log: &mut TrafficLog,
        catalog: &CatalogSnapshot,
        rules: &RuleStoreSnapshot,
        mode: SeparationMode,
        actor: &str,
    ) -> SchedulingResult<AuditEvent> {
        Self::check_transition(log, LogState::Published)?;

        let report = LogValidator::validate(log, catalog, rules, mode);
        if let Some(first) = report.violations.first() {
            return Err(SchedulingError::InvariantViolation {
                violations: report.violations.len(),
                first: first.to_string(),
            });
        }

        log.state = LogState::Published;
        log.touch();
        info!(filled = log.filled_count(), "节目单已发布");
        Ok(
            AuditEvent::new(&log.log_id, AuditEventType::LogPublished, actor, "发布节目单")
                .with_metadata(&json!({ "filled": log.filled_count(), "slots": log.slots.len() })),
        )
    }

    // ==========================================
    // 人工编辑 (仅草稿)
    // ==========================================

    /// 人工排入素材
    ///
    /// # 返回
    /// SPOT_SCHEDULED, 时段原有冲突时追加 CONFLICT_RESOLVED
    pub fn schedule_spot(
        &self,
        log: &mut TrafficLog,
        position: u32,
        item_id: &str,
        catalog: &CatalogSnapshot,
        actor: &str,
    ) -> SchedulingResult<Vec<AuditEvent>> {
        Self::ensure_editable(log)?;
        let slot = Self::slot_ref(log, position)?;
        Self::check_admits(slot, item_id, catalog)?;
        let previous = slot.assigned_item.clone();

        if let Some(slot) = log.slot_mut(position) {
            slot.fill(item_id);
            slot.copy_id = None;
        }

        let mut events = vec![AuditEvent::new(
            &log.log_id,
            AuditEventType::SpotScheduled,
            actor,
            format!("人工排入: 时段 {} -> {}", position, item_id),
        )
        .at_slot(position)
        .with_metadata(&json!({ "item_id": item_id, "previous_item": previous }))];
        events.extend(Self::resolve_manually(log, position, item_id, actor));
        log.touch();
        Ok(events)
    }

    /// 移动素材到另一个空时段
    pub fn move_spot(
        &self,
        log: &mut TrafficLog,
        from: u32,
        to: u32,
        catalog: &CatalogSnapshot,
        actor: &str,
    ) -> SchedulingResult<Vec<AuditEvent>> {
        Self::ensure_editable(log)?;
        let source = Self::slot_ref(log, from)?;
        let item_id = match (source.is_filled(), source.assigned_item.clone()) {
            (true, Some(id)) => id,
            _ => return Err(SchedulingError::edit_rejected(format!("时段 {} 没有可移动的素材", from))),
        };
        let copy_id = source.copy_id.clone();

        let target = Self::slot_ref(log, to)?;
        if target.is_filled() {
            return Err(SchedulingError::edit_rejected(format!("目标时段 {} 已被占用", to)));
        }
        Self::check_admits(target, &item_id, catalog)?;

        if let Some(slot) = log.slot_mut(from) {
            slot.clear();
        }
        if let Some(slot) = log.slot_mut(to) {
            slot.fill(&item_id);
            slot.copy_id = copy_id;
        }
        Self::drop_settled_record(log, from);

        let mut events = vec![AuditEvent::new(
            &log.log_id,
            AuditEventType::SpotMoved,
            actor,
            format!("移动 {}: 时段 {} -> {}", item_id, from, to),
        )
        .at_slot(to)
        .with_metadata(&json!({ "item_id": item_id, "from": from, "to": to }))];
        events.extend(Self::resolve_manually(log, to, &item_id, actor));
        log.touch();
        Ok(events)
    }

    /// 删除时段素材
    pub fn delete_spot(&self, log: &mut TrafficLog, position: u32, actor: &str) -> SchedulingResult<AuditEvent> {
        Self::ensure_editable(log)?;
        let slot = Self::slot_ref(log, position)?;
        let item_id = match slot.assigned_item.clone() {
            Some(id) => id,
            None => return Err(SchedulingError::edit_rejected(format!("时段 {} 没有素材", position))),
        };

        if let Some(slot) = log.slot_mut(position) {
            slot.clear();
        }
        Self::drop_settled_record(log, position);
        log.touch();

        Ok(AuditEvent::new(
            &log.log_id,
            AuditEventType::SpotDeleted,
            actor,
            format!("删除: 时段 {} 的 {}", position, item_id),
        )
        .at_slot(position)
        .with_metadata(&json!({ "item_id": item_id })))
    }

    /// 为已排广告指定版本
    pub fn assign_copy(
        &self,
        log: &mut TrafficLog,
        position: u32,
        copy_id: &str,
        actor: &str,
    ) -> SchedulingResult<AuditEvent> {
        Self::ensure_editable(log)?;
        let slot = Self::slot_ref(log, position)?;
        if !slot.is_filled() {
            return Err(SchedulingError::edit_rejected(format!(
                "时段 {} 未排素材, 不能指定版本",
                position
            )));
        }
        let item_id = slot.assigned_item.clone();

        if let Some(slot) = log.slot_mut(position) {
            slot.copy_id = Some(copy_id.to_string());
        }
        log.touch();

        Ok(AuditEvent::new(
            &log.log_id,
            AuditEventType::CopyAssigned,
            actor,
            format!("时段 {} 指定版本 {}", position, copy_id),
        )
        .at_slot(position)
        .with_metadata(&json!({ "item_id": item_id, "copy_id": copy_id })))
    }

    /// 取消广告版本
    pub fn unassign_copy(&self, log: &mut TrafficLog, position: u32, actor: &str) -> SchedulingResult<AuditEvent> {
        Self::ensure_editable(log)?;
        let slot = Self::slot_ref(log, position)?;
        let copy_id = match slot.copy_id.clone() {
            Some(id) => id,
            None => return Err(SchedulingError::edit_rejected(format!("时段 {} 未指定版本", position))),
        };

        if let Some(slot) = log.slot_mut(position) {
            slot.copy_id = None;
        }
        log.touch();

        Ok(AuditEvent::new(
            &log.log_id,
            AuditEventType::CopyUnassigned,
            actor,
            format!("时段 {} 取消版本 {}", position, copy_id),
        )
        .at_slot(position)
        .with_metadata(&json!({ "copy_id": copy_id })))
    }

    // ==========================================
    // 内部方法
    // ==========================================

    fn ensure_editable(log: &TrafficLog) -> SchedulingResult<()> {
        if log.is_draft() {
            Ok(())
        } else {
            Err(SchedulingError::log_state(log.state, "只有草稿节目单可以修改"))
        }
    }

    fn check_transition(log: &TrafficLog, next: LogState) -> SchedulingResult<()> {
        if log.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(SchedulingError::log_state(
                log.state,
                format!("不允许的状态迁移: {} -> {}", log.state, next),
            ))
        }
    }

    fn slot_ref(log: &TrafficLog, position: u32) -> SchedulingResult<&Slot> {
        log.slot(position)
            .ok_or_else(|| SchedulingError::edit_rejected(format!("时段 {} 不存在", position)))
    }

    /// 时段准入校验 (人工编辑同样不得跳过)
    fn check_admits(slot: &Slot, item_id: &str, catalog: &CatalogSnapshot) -> SchedulingResult<()> {
        let item = catalog
            .get(item_id)
            .ok_or_else(|| SchedulingError::edit_rejected(format!("素材 {} 不存在", item_id)))?;
        if !EligibilityFilter::admits(slot, item) {
            return Err(SchedulingError::edit_rejected(format!(
                "素材 {} 不可在时段 {} ({}) 播出",
                item_id, slot.position, slot.daypart_id
            )));
        }
        Ok(())
    }

    /// 人工处理时段冲突记录, 原为未解决时返回 CONFLICT_RESOLVED
    fn resolve_manually(
        log: &mut TrafficLog,
        position: u32,
        item_id: &str,
        actor: &str,
    ) -> Option<AuditEvent> {
        let log_id = log.log_id.clone();
        let record = log.conflict_for_mut(position)?;
        let was_unresolved = record.is_unresolved();
        record.resolution = ConflictResolution::Manual;
        record.resolved_item = Some(item_id.to_string());

        if was_unresolved {
            Some(
                AuditEvent::new(
                    &log_id,
                    AuditEventType::ConflictResolved,
                    actor,
                    format!("人工解决冲突: 时段 {}", position),
                )
                .at_slot(position)
                .with_metadata(&json!({ "item_id": item_id, "resolution": "MANUAL" })),
            )
        } else {
            None
        }
    }

    /// 时段素材移除后,已处理的冲突记录不再适用
    fn drop_settled_record(log: &mut TrafficLog, position: u32) {
        log.conflicts
            .retain(|c| c.slot_position != position || c.is_unresolved());
    }
}
