// ==========================================
// 广播排播系统 - 排程运行配置快照
// ==========================================
// 职责: 运行开始时一次性读取配置,排程循环内只读纯值
// ==========================================

use crate::config::scheduler_config_trait::{ConfigReadError, SchedulerConfigReader};
use crate::config::weight_profile::WeightProfile;
use crate::domain::types::{RotationType, SeparationMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 单次排程运行使用的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub separation_mode: SeparationMode,
    pub relaxation_enabled: bool,
    pub history_depth: usize,
    pub run_timeout_secs: u64,
    pub auto_lock_on_complete: bool,
    pub default_rotation_type: RotationType,
    pub weight_profile: WeightProfile,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            separation_mode: SeparationMode::SlotCount,
            relaxation_enabled: true,
            history_depth: 64,
            run_timeout_secs: 30,
            auto_lock_on_complete: true,
            default_rotation_type: RotationType::Sequential,
            weight_profile: WeightProfile::default(),
        }
    }
}

impl SchedulerConfig {
    /// 从配置读取器加载
    pub async fn load<C>(reader: &C) -> Result<Self, ConfigReadError>
    where
        C: SchedulerConfigReader + ?Sized,
    {
        Ok(Self {
            separation_mode: reader.get_separation_mode().await?,
            relaxation_enabled: reader.get_relaxation_enabled().await?,
            history_depth: reader.get_history_depth().await?,
            run_timeout_secs: reader.get_run_timeout_secs().await?,
            auto_lock_on_complete: reader.get_auto_lock_on_complete().await?,
            default_rotation_type: reader.get_default_rotation_type().await?,
            weight_profile: reader.get_weight_profile().await?,
        })
    }

    /// 运行超时 (None = 不限)
    pub fn run_timeout(&self) -> Option<Duration> {
        if self.run_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.run_timeout_secs))
        }
    }

    pub fn with_separation_mode(mut self, mode: SeparationMode) -> Self {
        self.separation_mode = mode;
        self
    }

    pub fn with_relaxation(mut self, enabled: bool) -> Self {
        self.relaxation_enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_timeout() {
        let mut config = SchedulerConfig::default();
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(30)));

        config.run_timeout_secs = 0;
        assert_eq!(config.run_timeout(), None);
    }
}
