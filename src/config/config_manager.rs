// ==========================================
// 广播排播系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::scheduler_config_trait::{ConfigReadError, SchedulerConfigReader};
use crate::config::weight_profile::WeightProfile;
use crate::db::open_sqlite_connection;
use crate::domain::types::{RotationType, SeparationMode};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, ConfigReadError> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, ConfigReadError> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, ConfigReadError> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    /// 读取 global scope 的配置值（公开方法，供 CLI 展示复用）
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, ConfigReadError> {
        self.get_config_value(key)
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, ConfigReadError> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), ConfigReadError> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 排程运行时记录配置快照，保证结果可复现
    pub fn get_config_snapshot(&self) -> Result<String, ConfigReadError> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 从配置快照恢复配置
    ///
    /// # 返回
    /// - Ok(usize): 恢复的配置项数量
    ///
    /// # 注意
    /// - 此方法会覆盖现有的global配置
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> Result<usize, ConfigReadError> {
        let config_map: HashMap<String, String> = serde_json::from_str(snapshot_json)?;

        let mut conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let tx = conn.transaction()?;

        let mut count = 0;
        for (key, value) in config_map.iter() {
            count += tx.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

// ==========================================
// SchedulerConfigReader Trait 实现
// ==========================================
#[async_trait]
impl SchedulerConfigReader for ConfigManager {
    async fn get_separation_mode(&self) -> Result<SeparationMode, ConfigReadError> {
        let value = self.get_config_or_default(config_keys::SEPARATION_MODE, "SLOT_COUNT")?;
        Ok(SeparationMode::from_str(&value).unwrap_or_else(|| {
            tracing::warn!(
                config_key = config_keys::SEPARATION_MODE,
                raw_value = %value,
                "间隔计量方式配置无法识别，使用 SLOT_COUNT"
            );
            SeparationMode::SlotCount
        }))
    }

    async fn get_relaxation_enabled(&self) -> Result<bool, ConfigReadError> {
        let value = self.get_config_or_default(config_keys::RELAXATION_ENABLED, "true")?;
        Ok(parse_bool(&value, true))
    }

    async fn get_history_depth(&self) -> Result<usize, ConfigReadError> {
        let value = self.get_config_or_default(config_keys::HISTORY_DEPTH, "64")?;
        Ok(value.trim().parse::<usize>().ok().filter(|d| *d > 0).unwrap_or(64))
    }

    async fn get_run_timeout_secs(&self) -> Result<u64, ConfigReadError> {
        let value = self.get_config_or_default(config_keys::RUN_TIMEOUT_SECS, "30")?;
        Ok(value.trim().parse::<u64>().unwrap_or(30))
    }

    async fn get_auto_lock_on_complete(&self) -> Result<bool, ConfigReadError> {
        let value = self.get_config_or_default(config_keys::AUTO_LOCK_ON_COMPLETE, "true")?;
        Ok(parse_bool(&value, true))
    }

    async fn get_default_rotation_type(&self) -> Result<RotationType, ConfigReadError> {
        let value = self.get_config_or_default(config_keys::DEFAULT_ROTATION_TYPE, "SEQUENTIAL")?;
        Ok(value.parse::<RotationType>().unwrap_or_default())
    }

    async fn get_weight_profile(&self) -> Result<WeightProfile, ConfigReadError> {
        let value = match self.get_config_value(config_keys::WEIGHT_PROFILE)? {
            Some(v) => v,
            None => return Ok(WeightProfile::default()),
        };
        Ok(serde_json::from_str(&value).unwrap_or_else(|_| {
            tracing::warn!(
                config_key = config_keys::WEIGHT_PROFILE,
                raw_value = %value,
                "权重配置格式错误，使用默认配置"
            );
            WeightProfile::default()
        }))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 约束计量
    pub const SEPARATION_MODE: &str = "separation_mode";
    pub const RELAXATION_ENABLED: &str = "relaxation_enabled";
    pub const HISTORY_DEPTH: &str = "history_depth";

    // 运行控制
    pub const RUN_TIMEOUT_SECS: &str = "run_timeout_secs";
    pub const AUTO_LOCK_ON_COMPLETE: &str = "auto_lock_on_complete";

    // 轮播
    pub const DEFAULT_ROTATION_TYPE: &str = "default_rotation_type";
    pub const WEIGHT_PROFILE: &str = "weight_profile"; // JSON
}
