// ==========================================
// 广播排播系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod audit_event_repo;
pub mod error;
pub mod media_catalog_repo;
pub mod rotation_rule_repo;
pub mod traffic_log_repo;

// 重导出核心仓储
pub use audit_event_repo::AuditEventRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use media_catalog_repo::MediaCatalogRepository;
pub use rotation_rule_repo::{RotationRuleRepository, StationRules};
pub use traffic_log_repo::TrafficLogRepository;

/// 文本列无法解析为枚举/JSON 时的行映射错误
pub(crate) fn invalid_column(idx: usize, message: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        message.into().into(),
    )
}
