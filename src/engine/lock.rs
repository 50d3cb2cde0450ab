// ==========================================
// 广播排播系统 - 节目单运行锁
// ==========================================
// 职责: 同一 (station_id, log_date) 同时只允许一个排程运行或人工编辑
// 红线: 冲突时立即失败,不排队等待
// ==========================================

use crate::domain::traffic_log::LogKey;
use crate::engine::error::{SchedulingError, SchedulingResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// 节目单锁注册表
#[derive(Debug, Default)]
pub struct LogLockRegistry {
    held: Mutex<HashSet<LogKey>>,
}

impl LogLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取节目单锁
    ///
    /// # 返回
    /// - Ok(guard): 离开作用域时自动释放
    /// - Err(LogBusy): 节目单正被其他运行占用
    pub fn try_acquire(self: &Arc<Self>, key: &LogKey) -> SchedulingResult<LogLockGuard> {
        // 中毒不影响集合内容
        let mut held = self.held.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(log_key = %key, "节目单锁注册表中毒, 继续使用");
            poisoned.into_inner()
        });
        if !held.insert(key.clone()) {
            return Err(SchedulingError::LogBusy {
                key: key.to_string(),
            });
        }
        tracing::debug!(log_key = %key, "获取节目单锁");
        Ok(LogLockGuard {
            registry: Arc::clone(self),
            key: key.clone(),
        })
    }

    pub fn is_held(&self, key: &LogKey) -> bool {
        match self.held.lock() {
            Ok(held) => held.contains(key),
            Err(poisoned) => poisoned.into_inner().contains(key),
        }
    }

    fn release(&self, key: &LogKey) {
        // 中毒时仍需释放,否则该节目单永久不可用
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(key);
        tracing::debug!(log_key = %key, "释放节目单锁");
    }
}

/// 节目单锁 (RAII)
#[derive(Debug)]
pub struct LogLockGuard {
    registry: Arc<LogLockRegistry>,
    key: LogKey,
}

impl LogLockGuard {
    pub fn key(&self) -> &LogKey {
        &self.key
    }
}

impl Drop for LogLockGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_second_acquire_fails_fast() {
        let registry = Arc::new(LogLockRegistry::new());
        let key = LogKey::new("KXYZ", NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        let other = LogKey::new("KXYZ", NaiveDate::from_ymd_opt(2025, 3, 2).unwrap());

        let guard = registry.try_acquire(&key).unwrap();
        let err = registry.try_acquire(&key).unwrap_err();
        assert!(err.is_log_state_error());
        assert!(registry.try_acquire(&other).is_ok());

        drop(guard);
        assert!(!registry.is_held(&key));
        assert!(registry.try_acquire(&key).is_ok());
    }

    #[test]
    fn test_poisoned_registry_still_serves_locks() {
        let registry = Arc::new(LogLockRegistry::new());
        let key = LogKey::new("KXYZ", NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());

        let poisoner = Arc::clone(&registry);
        let _ = std::thread::spawn(move || {
            let _held = poisoner.held.lock().unwrap();
            panic!("持锁线程崩溃");
        })
        .join();
        assert!(registry.held.is_poisoned());

        let guard = registry.try_acquire(&key).unwrap();
        assert!(matches!(
            registry.try_acquire(&key),
            Err(SchedulingError::LogBusy { .. })
        ));
        drop(guard);
        assert!(registry.try_acquire(&key).is_ok());
    }
}
