// ==========================================
// 广播排播系统 - 领域类型定义
// ==========================================
// 职责: 定义排播引擎使用的枚举类型
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 媒体类型 (Media Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    Music, // 音乐
    Spot,  // 广告
    Liner, // 台呼/串词
    Promo, // 节目宣传
    Other, // 其他
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl MediaKind {
    /// 从字符串解析 (未知值归为 OTHER)
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "MUSIC" => MediaKind::Music,
            "SPOT" => MediaKind::Spot,
            "LINER" => MediaKind::Liner,
            "PROMO" => MediaKind::Promo,
            _ => MediaKind::Other,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            MediaKind::Music => "MUSIC",
            MediaKind::Spot => "SPOT",
            MediaKind::Liner => "LINER",
            MediaKind::Promo => "PROMO",
            MediaKind::Other => "OTHER",
        }
    }
}

// ==========================================
// 轮播类型 (Rotation Type)
// ==========================================
// 红线: 穷举匹配,不允许字符串分派
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationType {
    Sequential, // 顺序轮播 (最久未播优先)
    Random,     // 确定性随机
    Weighted,   // 按权重
    Even,       // 均衡播出
}

impl Default for RotationType {
    fn default() -> Self {
        RotationType::Sequential
    }
}

impl fmt::Display for RotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl RotationType {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            RotationType::Sequential => "SEQUENTIAL",
            RotationType::Random => "RANDOM",
            RotationType::Weighted => "WEIGHTED",
            RotationType::Even => "EVEN",
        }
    }

    /// 中文名称 (用于日志展示)
    pub fn title_cn(&self) -> &'static str {
        match self {
            RotationType::Sequential => "顺序轮播",
            RotationType::Random => "随机轮播",
            RotationType::Weighted => "权重轮播",
            RotationType::Even => "均衡轮播",
        }
    }
}

impl std::str::FromStr for RotationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SEQUENTIAL" => Ok(RotationType::Sequential),
            "RANDOM" => Ok(RotationType::Random),
            "WEIGHTED" => Ok(RotationType::Weighted),
            "EVEN" => Ok(RotationType::Even),
            other => Err(format!("未知轮播类型: {}", other)),
        }
    }
}

// ==========================================
// 时段状态 (Slot Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Filled,   // 已排
    Unfilled, // 待排
    Conflict, // 冲突未解决
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl SlotStatus {
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "FILLED" => SlotStatus::Filled,
            "CONFLICT" => SlotStatus::Conflict,
            _ => SlotStatus::Unfilled,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SlotStatus::Filled => "FILLED",
            SlotStatus::Unfilled => "UNFILLED",
            SlotStatus::Conflict => "CONFLICT",
        }
    }
}

// ==========================================
// 节目单状态 (Log State)
// ==========================================
// 状态机: DRAFT -> LOCKED -> PUBLISHED, LOCKED -> DRAFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogState {
    Draft,     // 草稿 (可编辑)
    Locked,    // 锁定 (待审批)
    Published, // 已发布 (终态,不可变)
}

impl fmt::Display for LogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl LogState {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Some(LogState::Draft),
            "LOCKED" => Some(LogState::Locked),
            "PUBLISHED" => Some(LogState::Published),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            LogState::Draft => "DRAFT",
            LogState::Locked => "LOCKED",
            LogState::Published => "PUBLISHED",
        }
    }

    /// 是否允许状态迁移
    pub fn can_transition_to(&self, next: LogState) -> bool {
        matches!(
            (self, next),
            (LogState::Draft, LogState::Locked)
                | (LogState::Locked, LogState::Draft)
                | (LogState::Locked, LogState::Published)
        )
    }
}

// ==========================================
// 冲突处理结果 (Conflict Resolution)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolution {
    AutoRelaxed, // 自动放宽规则后填充
    Unresolved,  // 未解决
    Manual,      // 人工处理
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl ConflictResolution {
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "AUTO_RELAXED" => ConflictResolution::AutoRelaxed,
            "MANUAL" => ConflictResolution::Manual,
            _ => ConflictResolution::Unresolved,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConflictResolution::AutoRelaxed => "AUTO_RELAXED",
            ConflictResolution::Unresolved => "UNRESOLVED",
            ConflictResolution::Manual => "MANUAL",
        }
    }
}

// ==========================================
// 审计事件类型 (Audit Event Type)
// ==========================================
// 红线: 类型集合与前端审计日志展示保持一致,不得增减
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    SpotScheduled,
    SpotMoved,
    SpotDeleted,
    LogLocked,
    LogUnlocked,
    LogPublished,
    ConflictDetected,
    ConflictResolved,
    CopyAssigned,
    CopyUnassigned,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AuditEventType {
    /// 全部事件类型
    pub fn all() -> [AuditEventType; 10] {
        [
            AuditEventType::SpotScheduled,
            AuditEventType::SpotMoved,
            AuditEventType::SpotDeleted,
            AuditEventType::LogLocked,
            AuditEventType::LogUnlocked,
            AuditEventType::LogPublished,
            AuditEventType::ConflictDetected,
            AuditEventType::ConflictResolved,
            AuditEventType::CopyAssigned,
            AuditEventType::CopyUnassigned,
        ]
    }

    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::SpotScheduled => "SPOT_SCHEDULED",
            AuditEventType::SpotMoved => "SPOT_MOVED",
            AuditEventType::SpotDeleted => "SPOT_DELETED",
            AuditEventType::LogLocked => "LOG_LOCKED",
            AuditEventType::LogUnlocked => "LOG_UNLOCKED",
            AuditEventType::LogPublished => "LOG_PUBLISHED",
            AuditEventType::ConflictDetected => "CONFLICT_DETECTED",
            AuditEventType::ConflictResolved => "CONFLICT_RESOLVED",
            AuditEventType::CopyAssigned => "COPY_ASSIGNED",
            AuditEventType::CopyUnassigned => "COPY_UNASSIGNED",
        }
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        AuditEventType::all().into_iter().find(|t| t.as_str() == s)
    }
}

// ==========================================
// 间隔计量方式 (Separation Mode)
// ==========================================
// SLOT_COUNT: min_separation 为间隔时段数
// WALL_CLOCK_MINUTES: min_separation 为间隔分钟数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeparationMode {
    SlotCount,
    WallClockMinutes,
}

impl Default for SeparationMode {
    fn default() -> Self {
        SeparationMode::SlotCount
    }
}

impl fmt::Display for SeparationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl SeparationMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "SLOT_COUNT" => Some(SeparationMode::SlotCount),
            "WALL_CLOCK_MINUTES" | "WALL_CLOCK" => Some(SeparationMode::WallClockMinutes),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SeparationMode::SlotCount => "SLOT_COUNT",
            SeparationMode::WallClockMinutes => "WALL_CLOCK_MINUTES",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_state_transitions() {
        assert!(LogState::Draft.can_transition_to(LogState::Locked));
        assert!(LogState::Locked.can_transition_to(LogState::Draft));
        assert!(LogState::Locked.can_transition_to(LogState::Published));

        assert!(!LogState::Draft.can_transition_to(LogState::Published));
        assert!(!LogState::Published.can_transition_to(LogState::Draft));
        assert!(!LogState::Published.can_transition_to(LogState::Locked));
    }

    #[test]
    fn test_audit_event_type_parse() {
        for t in AuditEventType::all() {
            assert_eq!(AuditEventType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(AuditEventType::from_str("PLAN_CREATED"), None);
    }

    #[test]
    fn test_rotation_type_from_str() {
        assert_eq!("weighted".parse::<RotationType>(), Ok(RotationType::Weighted));
        assert!("shuffle".parse::<RotationType>().is_err());
    }
}
