// ==========================================
// 广播排播系统 - 引擎层
// ==========================================
// 职责: 轮播规则求值、时段填充、冲突分类、节目单状态机
// 红线: Engine 不拼 SQL; 每个无法正常填充的时段必须留下冲突原因
// ==========================================

pub mod conflict;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod history;
pub mod lock;
pub mod log_builder;
pub mod orchestrator;
pub mod ranker;
pub mod slot_assigner;
pub mod snapshot;
pub mod validator;

// 重导出核心引擎
pub use conflict::ConflictDetector;
pub use eligibility::EligibilityFilter;
pub use error::{SchedulingError, SchedulingResult};
pub use events::{
    AuditEventPublisher, InMemoryEventPublisher, NoOpEventPublisher, OptionalEventPublisher,
};
pub use history::{HistoryKey, HistoryTracker};
pub use lock::{LogLockGuard, LogLockRegistry};
pub use log_builder::LogBuilder;
pub use orchestrator::{RunOutcome, ScheduleJob, ScheduleOrchestrator, ScheduleRequest};
pub use ranker::{CandidateRanker, RankedCandidates, Rejection, RuleViolation, ViolationKind};
pub use slot_assigner::{PassResult, RunControl, SlotAssigner, SlotOutcome, SCHEDULER_ACTOR};
pub use snapshot::{CatalogSnapshot, HistorySeed, RuleStoreSnapshot, SeedPlay};
pub use validator::{LogValidator, LogViolation, ValidationReport};
