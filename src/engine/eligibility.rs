// ==========================================
// 广播排播系统 - 时段准入过滤
// ==========================================
// 红线: 时段准入为硬约束,放宽层级不得跳过
// ==========================================
// 职责: 启用状态 + 时段准入 + 素材类型过滤
// 输入: Slot + CatalogSnapshot
// 输出: 可用素材列表 (保持目录顺序)
// ==========================================

use crate::domain::media::MediaItem;
use crate::domain::traffic_log::Slot;
use crate::engine::error::SchedulingResult;
use crate::engine::snapshot::{CatalogSnapshot, RuleStoreSnapshot};

// ==========================================
// EligibilityFilter - 时段准入过滤器
// ==========================================
// 无副作用,不依赖播出历史
pub struct EligibilityFilter<'a> {
    rules: &'a RuleStoreSnapshot,
}

impl<'a> EligibilityFilter<'a> {
    pub fn new(rules: &'a RuleStoreSnapshot) -> Self {
        Self { rules }
    }

    /// 计算时段的可用素材
    ///
    /// # 返回
    /// - Ok(Vec): 可用素材 (目录顺序,可能为空)
    /// - Err(Configuration): 时段引用了未知 daypart
    pub fn eligible<'c>(
        &self,
        slot: &Slot,
        catalog: &'c CatalogSnapshot,
    ) -> SchedulingResult<Vec<&'c MediaItem>> {
        self.rules.require_daypart(&slot.daypart_id)?;

        Ok(catalog
            .items()
            .iter()
            .filter(|item| Self::admits(slot, item))
            .collect())
    }

    /// 单个素材是否可进入该时段
    pub fn admits(slot: &Slot, item: &MediaItem) -> bool {
        item.active
            && item.is_daypart_eligible(&slot.daypart_id)
            && slot.accepts_kind.map_or(true, |kind| kind == item.kind)
    }
}
