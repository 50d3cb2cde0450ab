// ==========================================
// 广播排播系统 - 配置层
// ==========================================
// 职责: 排程配置读取与覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod scheduler_config;
pub mod scheduler_config_trait;
pub mod weight_profile;

// 重导出核心配置类型
pub use config_manager::{config_keys, ConfigManager};
pub use scheduler_config::SchedulerConfig;
pub use scheduler_config_trait::{ConfigReadError, SchedulerConfigReader};
pub use weight_profile::WeightProfile;
