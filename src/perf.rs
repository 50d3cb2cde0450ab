// ==========================================
// 广播排播系统 - SQL 性能统计
// ==========================================
// 职责: 统计一次 CLI 操作 (排程/重排) 内的 SQL 数量与慢查询
// 开关:
// - Debug 默认开启, Release 默认关闭
// - TRAFFIC_ENGINE_PERF_SQL=1 强制开启
// - TRAFFIC_ENGINE_SLOW_SQL_MS=50 慢 SQL 阈值(毫秒)
// ==========================================

use crate::domain::LogKey;
use rusqlite::Connection;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const ENV_PERF_SQL: &str = "TRAFFIC_ENGINE_PERF_SQL";
const ENV_SLOW_SQL_MS: &str = "TRAFFIC_ENGINE_SLOW_SQL_MS";
const SLOW_SQL_LOG_WIDTH: usize = 420;

static ENABLED: AtomicBool = AtomicBool::new(false);
static SLOW_THRESHOLD_MS: AtomicU64 = AtomicU64::new(0);

/// 当前线程的计数器 (仅在有 PerfGuard 存活时累加)
#[derive(Default)]
struct Counters {
    depth: Cell<u32>,
    statements: Cell<u64>,
    slow: Cell<u64>,
}

thread_local! {
    static COUNTERS: Counters = Counters::default();
}

/// SQL 统计开关与阈值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfSettings {
    pub enabled: bool,
    pub slow_threshold_ms: u64,
}

impl PerfSettings {
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var(ENV_PERF_SQL).ok().as_deref(),
            std::env::var(ENV_SLOW_SQL_MS).ok().as_deref(),
        )
    }

    /// 由环境变量原始值解析; 缺省值随构建类型变化
    pub fn from_values(perf_sql: Option<&str>, slow_ms: Option<&str>) -> Self {
        let enabled = perf_sql.map_or(cfg!(debug_assertions), parse_switch);
        let slow_threshold_ms = slow_ms
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(if cfg!(debug_assertions) { 50 } else { 200 });
        Self {
            enabled,
            slow_threshold_ms,
        }
    }
}

fn parse_switch(v: &str) -> bool {
    matches!(
        v.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn shorten_sql(sql: &str, max_len: usize) -> String {
    let s = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// 在连接上安装 trace/profile 回调
pub fn install_sqlite_tracing(conn: &mut Connection) {
    let settings = PerfSettings::from_env();
    ENABLED.store(settings.enabled, Ordering::Relaxed);
    SLOW_THRESHOLD_MS.store(settings.slow_threshold_ms, Ordering::Relaxed);

    if settings.enabled {
        conn.trace(Some(on_statement));
        conn.profile(Some(on_profile));
    } else {
        conn.trace(None);
        conn.profile(None);
    }
}

fn on_statement(_sql: &str) {
    if !ENABLED.load(Ordering::Relaxed) {
        return;
    }
    COUNTERS.with(|c| {
        if c.depth.get() > 0 {
            c.statements.set(c.statements.get().saturating_add(1));
        }
    });
}

fn on_profile(sql: &str, duration: Duration) {
    if !ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let ms = duration.as_millis() as u64;
    let threshold = SLOW_THRESHOLD_MS.load(Ordering::Relaxed);
    if threshold == 0 || ms < threshold {
        return;
    }

    tracing::warn!(
        target: "slow_sql",
        duration_ms = ms,
        sql = %shorten_sql(sql, SLOW_SQL_LOG_WIDTH),
        "慢 SQL"
    );
    COUNTERS.with(|c| {
        if c.depth.get() > 0 {
            c.slow.set(c.slow.get().saturating_add(1));
        }
    });
}

/// 一次操作的统计结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfReport {
    pub op: &'static str,
    pub log_key: Option<String>,
    pub elapsed_ms: u64,
    pub sql_count: u64,
    pub slow_sql_count: u64,
}

/// 离开作用域时输出本次操作的耗时与 SQL 统计
///
/// ```ignore
/// let _perf = traffic_engine::perf::PerfGuard::for_log("cli_run", &key);
/// ```
pub struct PerfGuard {
    op: &'static str,
    log_key: Option<String>,
    start: Instant,
    statements_at_start: u64,
    slow_at_start: u64,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        let (statements_at_start, slow_at_start) = COUNTERS.with(|c| {
            c.depth.set(c.depth.get().saturating_add(1));
            (c.statements.get(), c.slow.get())
        });
        Self {
            op,
            log_key: None,
            start: Instant::now(),
            statements_at_start,
            slow_at_start,
        }
    }

    /// 针对某一节目单的操作
    pub fn for_log(op: &'static str, key: &LogKey) -> Self {
        let mut guard = Self::new(op);
        guard.log_key = Some(key.to_string());
        guard
    }

    /// 截至当前的统计
    pub fn report(&self) -> PerfReport {
        let (statements, slow) = COUNTERS.with(|c| (c.statements.get(), c.slow.get()));
        PerfReport {
            op: self.op,
            log_key: self.log_key.clone(),
            elapsed_ms: self.start.elapsed().as_millis() as u64,
            sql_count: statements.saturating_sub(self.statements_at_start),
            slow_sql_count: slow.saturating_sub(self.slow_at_start),
        }
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let report = self.report();
        tracing::info!(
            target: "perf",
            op = report.op,
            log_key = report.log_key.as_deref().unwrap_or("-"),
            elapsed_ms = report.elapsed_ms,
            sql_count = report.sql_count,
            slow_sql_count = report.slow_sql_count,
            "操作完成"
        );
        COUNTERS.with(|c| c.depth.set(c.depth.get().saturating_sub(1)));
    }
}
