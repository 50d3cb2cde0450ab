// ==========================================
// 广播排播系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 红线: 时段级失败是 SlotOutcome,不是错误
// ==========================================

use crate::config::ConfigReadError;
use crate::domain::types::LogState;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 排程引擎错误类型
#[derive(Error, Debug)]
pub enum SchedulingError {
    /// 时段/规则引用缺失或格式错误 (在任何提交之前终止)
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 非法状态迁移、非草稿状态下的修改或节目单被占用
    #[error("节目单状态错误 (state={state}): {message}")]
    LogState { state: LogState, message: String },

    /// 节目单正被其他运行或编辑占用 (属于状态类错误,不重试)
    #[error("节目单状态错误: {key} 正在被其他运行占用")]
    LogBusy { key: String },

    /// 人工编辑被拒绝 (素材停用/时段不准入/目标时段已占用等)
    #[error("编辑被拒绝: {0}")]
    EditRejected(String),

    /// 发布前校验不通过
    #[error("不变量校验失败: {violations} 处违规, 首条: {first}")]
    InvariantViolation { violations: usize, first: String },

    /// 运行被取消 (人工中止或超时),未提交任何结果
    #[error("排程已取消: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("配置读取失败: {0}")]
    ConfigRead(String),
}

impl SchedulingError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SchedulingError::Configuration(message.into())
    }

    pub fn log_state(state: LogState, message: impl Into<String>) -> Self {
        SchedulingError::LogState {
            state,
            message: message.into(),
        }
    }

    pub fn edit_rejected(message: impl Into<String>) -> Self {
        SchedulingError::EditRejected(message.into())
    }

    /// 状态类错误 (非法迁移/非草稿修改/节目单占用)
    pub fn is_log_state_error(&self) -> bool {
        matches!(self, SchedulingError::LogState { .. } | SchedulingError::LogBusy { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SchedulingError::Cancelled(_))
    }
}

impl From<ConfigReadError> for SchedulingError {
    fn from(err: ConfigReadError) -> Self {
        SchedulingError::ConfigRead(err.to_string())
    }
}

/// Result 类型别名
pub type SchedulingResult<T> = Result<T, SchedulingError>;
