// ==========================================
// 广播排播系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod audit;
pub mod conflict;
pub mod media;
pub mod rule;
pub mod traffic_log;
pub mod types;

// 重导出核心类型
pub use audit::AuditEvent;
pub use conflict::{ConflictReason, ConflictRecord, FrequencyWindow};
pub use media::MediaItem;
pub use rule::{Daypart, RotationRule};
pub use traffic_log::{LogKey, Slot, TrafficLog};
pub use types::{
    AuditEventType, ConflictResolution, LogState, MediaKind, RotationType, SeparationMode,
    SlotStatus,
};
