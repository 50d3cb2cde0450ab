// ==========================================
// 广播排播系统 - 排程配置读取 Trait
// ==========================================
// 职责: 定义排程引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::weight_profile::WeightProfile;
use crate::domain::types::{RotationType, SeparationMode};
use async_trait::async_trait;
use std::error::Error;

/// 配置读取错误
pub type ConfigReadError = Box<dyn Error + Send + Sync>;

// ==========================================
// SchedulerConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait SchedulerConfigReader: Send + Sync {
    // ===== 约束计量 =====

    /// 获取最小间隔的计量方式
    ///
    /// # 默认值
    /// - SLOT_COUNT（按间隔时段数计）
    async fn get_separation_mode(&self) -> Result<SeparationMode, ConfigReadError>;

    /// 是否启用规则放宽层级
    ///
    /// # 默认值
    /// - true
    ///
    /// # 说明
    /// - false 时无候选的时段直接记为 UNRESOLVED 冲突
    async fn get_relaxation_enabled(&self) -> Result<bool, ConfigReadError>;

    /// 获取播出历史保留深度（每个素材/活动保留最近 N 次播出）
    ///
    /// # 默认值
    /// - 64
    async fn get_history_depth(&self) -> Result<usize, ConfigReadError>;

    // ===== 运行控制 =====

    /// 获取单次排程运行超时（秒，0 表示不限）
    ///
    /// # 默认值
    /// - 30
    async fn get_run_timeout_secs(&self) -> Result<u64, ConfigReadError>;

    /// 排程完成且无未解决冲突时是否自动锁定
    ///
    /// # 默认值
    /// - true
    async fn get_auto_lock_on_complete(&self) -> Result<bool, ConfigReadError>;

    // ===== 轮播 =====

    /// 获取时段内无规则时的缺省轮播类型
    ///
    /// # 默认值
    /// - SEQUENTIAL
    async fn get_default_rotation_type(&self) -> Result<RotationType, ConfigReadError>;

    /// 获取权重配置（WEIGHTED 轮播使用）
    ///
    /// # 默认值
    /// - WeightProfile::default()
    async fn get_weight_profile(&self) -> Result<WeightProfile, ConfigReadError>;
}
