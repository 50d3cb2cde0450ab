// ==========================================
// 广播排播系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 轮播规则求值与节目单排程 (人工最终控制权)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 轮播与排程
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施(连接初始化/PRAGMA 统一/建表)
pub mod db;

// 日志系统
pub mod logging;

// SQL 性能统计
pub mod perf;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AuditEventType, ConflictResolution, LogState, MediaKind, RotationType, SeparationMode,
    SlotStatus,
};

// 领域实体
pub use domain::{
    AuditEvent, ConflictReason, ConflictRecord, Daypart, FrequencyWindow, LogKey, MediaItem,
    RotationRule, Slot, TrafficLog,
};

// 引擎
pub use engine::{
    CatalogSnapshot, HistorySeed, LogBuilder, LogValidator, RuleStoreSnapshot, RunControl,
    RunOutcome, ScheduleJob, ScheduleOrchestrator, ScheduleRequest, SchedulingError,
    SchedulingResult, SlotAssigner, SlotOutcome,
};

// 配置
pub use config::{ConfigManager, SchedulerConfig, WeightProfile};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "广播排播系统";
