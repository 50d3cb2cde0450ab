// ==========================================
// 广播排播系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为,避免部分模块外键未开启
// - 统一 busy_timeout,减少并发写入时的偶发 busy 错误
// - 提供建表脚本 (init-db 与测试共用)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout(毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
///
/// 版本号仅用于提示/告警(不做自动迁移),避免静默在旧库上运行
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明:
/// - foreign_keys 需要每个连接单独开启
/// - busy_timeout 需要每个连接单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    crate::perf::install_sqlite_tracing(&mut conn);
    Ok(conn)
}

/// 读取 schema_version(若表不存在则返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 建表 (幂等)
///
/// 表:
/// - config_kv: 配置 (scope + key)
/// - media_item / daypart / rotation_rule: 素材目录与规则库
/// - traffic_log / log_slot / conflict_record: 节目单
/// - audit_event: 审计日志 (仅追加)
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 打开数据库时检查 schema 版本,不一致仅告警
pub fn warn_if_schema_outdated(conn: &Connection) -> rusqlite::Result<()> {
    match read_schema_version(conn)? {
        Some(v) if v == CURRENT_SCHEMA_VERSION => {}
        Some(v) => tracing::warn!(
            found = v,
            expected = CURRENT_SCHEMA_VERSION,
            "数据库 schema 版本不一致"
        ),
        None => tracing::warn!("数据库未初始化 (缺少 schema_version 表)"),
    }
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id    TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (scope_id, key)
);

CREATE TABLE IF NOT EXISTS media_item (
    item_id            TEXT PRIMARY KEY,
    kind               TEXT NOT NULL,
    campaign_id        TEXT,
    advertiser_id      TEXT,
    duration_secs      INTEGER NOT NULL,
    genre              TEXT,
    bpm                INTEGER,
    daypart_eligible   TEXT NOT NULL DEFAULT '[]',
    allow_back_to_back INTEGER NOT NULL DEFAULT 0,
    is_new_release     INTEGER NOT NULL DEFAULT 0,
    active             INTEGER NOT NULL DEFAULT 1,
    weight             REAL NOT NULL DEFAULT 1.0,
    catalog_order      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS daypart (
    station_id  TEXT NOT NULL,
    daypart_id  TEXT NOT NULL,
    name        TEXT NOT NULL,
    start_time  TEXT NOT NULL,
    end_time    TEXT NOT NULL,
    category    TEXT,
    PRIMARY KEY (station_id, daypart_id)
);

CREATE TABLE IF NOT EXISTS rotation_rule (
    station_id      TEXT NOT NULL,
    rule_id         TEXT NOT NULL,
    name            TEXT NOT NULL,
    rotation_type   TEXT NOT NULL,
    daypart_id      TEXT,
    campaign_id     TEXT,
    min_separation  INTEGER NOT NULL DEFAULT 0,
    max_per_hour    INTEGER,
    max_per_day     INTEGER,
    priority        INTEGER NOT NULL,
    active          INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (station_id, rule_id)
);

CREATE TABLE IF NOT EXISTS traffic_log (
    log_id      TEXT PRIMARY KEY,
    station_id  TEXT NOT NULL,
    log_date    TEXT NOT NULL,
    state       TEXT NOT NULL,
    revision    INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (station_id, log_date)
);

CREATE TABLE IF NOT EXISTS log_slot (
    log_id         TEXT NOT NULL REFERENCES traffic_log(log_id) ON DELETE CASCADE,
    position       INTEGER NOT NULL,
    start_time     TEXT NOT NULL,
    duration_secs  INTEGER NOT NULL,
    daypart_id     TEXT NOT NULL,
    accepts_kind   TEXT,
    assigned_item  TEXT,
    copy_id        TEXT,
    status         TEXT NOT NULL,
    PRIMARY KEY (log_id, position)
);

CREATE TABLE IF NOT EXISTS conflict_record (
    log_id                 TEXT NOT NULL REFERENCES traffic_log(log_id) ON DELETE CASCADE,
    slot_position          INTEGER NOT NULL,
    reason_json            TEXT NOT NULL,
    candidates_considered  INTEGER NOT NULL,
    resolution             TEXT NOT NULL,
    relaxed_rules_json     TEXT NOT NULL DEFAULT '[]',
    resolved_item          TEXT,
    PRIMARY KEY (log_id, slot_position)
);

CREATE TABLE IF NOT EXISTS audit_event (
    event_id       TEXT PRIMARY KEY,
    log_id         TEXT NOT NULL,
    event_type     TEXT NOT NULL,
    slot_position  INTEGER,
    actor          TEXT NOT NULL,
    event_ts       TEXT NOT NULL,
    message        TEXT NOT NULL,
    metadata_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_event_log ON audit_event (log_id, event_ts);
CREATE INDEX IF NOT EXISTS idx_traffic_log_station ON traffic_log (station_id, log_date);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);

        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }
}
