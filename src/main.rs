// ==========================================
// 广播排播系统 - 命令行入口
// ==========================================
// 职责: 建库、导入目录/规则、排程运行、节目单状态迁移
// 数据库路径: --db > TRAFFIC_ENGINE_DB_PATH > 用户数据目录
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use traffic_engine::config::ConfigManager;
use traffic_engine::db;
use traffic_engine::domain::{AuditEvent, Daypart, LogKey, MediaItem, RotationRule, TrafficLog};
use traffic_engine::engine::{
    AuditEventPublisher, CatalogSnapshot, HistorySeed, LogBuilder, OptionalEventPublisher,
    RuleStoreSnapshot, RunControl, ScheduleJob, ScheduleOrchestrator, ScheduleRequest,
};
use traffic_engine::perf::PerfGuard;
use traffic_engine::repository::{
    AuditEventRepository, MediaCatalogRepository, RotationRuleRepository, TrafficLogRepository,
};

#[derive(Parser)]
#[command(
    name = "traffic-engine",
    version,
    about = "广播排播系统 - 轮播规则与节目单排程",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 数据库文件路径
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// 日志格式 (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 初始化数据库
    InitDb,

    /// 导入素材目录 (JSON 数组)
    ImportCatalog {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// 导入电台时段与规则 (JSON)
    ImportRules {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// 生成并排程新的节目单
    Run {
        #[arg(short, long)]
        station: String,

        #[arg(short, long)]
        date: NaiveDate,

        /// 时段间隔 (分钟)
        #[arg(long, default_value = "4")]
        interval_minutes: u32,

        /// 单个时段时长 (秒)
        #[arg(long, default_value = "240")]
        slot_secs: u32,

        /// 用作播出历史的前序节目单天数
        #[arg(long, default_value = "1")]
        prior_days: usize,
    },

    /// 重排草稿节目单中未解决的时段
    Rerun {
        #[arg(short, long)]
        station: String,

        #[arg(short, long)]
        date: NaiveDate,

        #[arg(long, default_value = "1")]
        prior_days: usize,
    },

    /// 锁定节目单
    Lock {
        #[arg(short, long)]
        station: String,

        #[arg(short, long)]
        date: NaiveDate,

        #[arg(long, default_value = "operator")]
        actor: String,

        /// 接受仍有未填充/冲突的时段
        #[arg(long)]
        accept_open: bool,
    },

    /// 解锁节目单 (回到草稿)
    Unlock {
        #[arg(short, long)]
        station: String,

        #[arg(short, long)]
        date: NaiveDate,

        #[arg(long, default_value = "operator")]
        actor: String,
    },

    /// 校验并发布节目单
    Publish {
        #[arg(short, long)]
        station: String,

        #[arg(short, long)]
        date: NaiveDate,

        #[arg(long, default_value = "operator")]
        actor: String,
    },

    /// 输出节目单 (JSON)
    Show {
        #[arg(short, long)]
        station: String,

        #[arg(short, long)]
        date: NaiveDate,

        /// 同时输出审计事件
        #[arg(long)]
        with_events: bool,
    },
}

/// 规则导入文件格式
#[derive(Debug, Deserialize)]
struct StationRulesFile {
    station_id: String,
    #[serde(default)]
    dayparts: Vec<Daypart>,
    #[serde(default)]
    rules: Vec<RotationRule>,
}

struct App {
    conn: Arc<Mutex<Connection>>,
    catalog: MediaCatalogRepository,
    rules: RotationRuleRepository,
    logs: TrafficLogRepository,
    audit: Arc<AuditEventRepository>,
}

impl App {
    fn open(db_path: &str) -> Result<Self> {
        let conn = db::open_sqlite_connection(db_path)
            .with_context(|| format!("无法打开数据库: {}", db_path))?;
        db::warn_if_schema_outdated(&conn)?;
        let conn = Arc::new(Mutex::new(conn));

        Ok(Self {
            catalog: MediaCatalogRepository::new(conn.clone()),
            rules: RotationRuleRepository::new(conn.clone()),
            logs: TrafficLogRepository::new(conn.clone()),
            audit: Arc::new(AuditEventRepository::new(conn.clone())),
            conn,
        })
    }

    async fn orchestrator(&self) -> Result<Arc<ScheduleOrchestrator>> {
        let manager = ConfigManager::from_connection(self.conn.clone())
            .map_err(|e| anyhow!("配置加载失败: {}", e))?;
        Ok(Arc::new(ScheduleOrchestrator::from_reader(&manager).await?))
    }

    fn publisher(&self) -> OptionalEventPublisher {
        let audit: Arc<dyn AuditEventPublisher> = self.audit.clone();
        OptionalEventPublisher::with_publisher(audit)
    }

    /// 写入节目单的审计事件 (节目单已保存; 任一失败则命令以错误退出)
    fn record_events(&self, log: &TrafficLog, events: &[AuditEvent]) -> Result<()> {
        self.publisher()
            .publish_all_required(events)
            .map_err(|e| anyhow!("{} 已保存, 但{}", log.key(), e))
    }

    fn snapshots(
        &self,
        station_id: &str,
        date: NaiveDate,
        prior_days: usize,
    ) -> Result<(CatalogSnapshot, RuleStoreSnapshot, HistorySeed)> {
        let catalog = CatalogSnapshot::new(self.catalog.list_all()?)?;
        let station = self.rules.load_station(station_id)?;
        let rules = RuleStoreSnapshot::new(station_id, station.dayparts, station.rules)?;
        let prior = self.logs.find_prior_logs(station_id, date, prior_days)?;
        let seed = HistorySeed::from_prior_logs(&prior, &catalog);
        Ok((catalog, rules, seed))
    }

    fn require_log(&self, station_id: &str, date: NaiveDate) -> Result<TrafficLog> {
        self.logs
            .find_by_key(station_id, date)?
            .ok_or_else(|| anyhow!("节目单不存在: {}@{}", station_id, date))
    }
}

fn default_db_path() -> String {
    if let Ok(path) = std::env::var("TRAFFIC_ENGINE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./traffic_engine.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("traffic-engine");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("traffic_engine.db");
        }
    }
    path.to_string_lossy().to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.log_format.as_str() {
        "json" => traffic_engine::logging::init_json(),
        _ => traffic_engine::logging::init(),
    }

    let db_path = cli
        .db
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(default_db_path);
    tracing::info!(version = traffic_engine::VERSION, db_path = %db_path, "{}", traffic_engine::APP_NAME);

    if let Commands::InitDb = cli.command {
        let conn = db::open_sqlite_connection(&db_path)?;
        db::init_schema(&conn)?;
        println!("数据库已初始化: {}", db_path);
        return Ok(());
    }

    let app = App::open(&db_path)?;

    match cli.command {
        Commands::InitDb => {}

        Commands::ImportCatalog { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("无法读取 {}", file.display()))?;
            let items: Vec<MediaItem> = serde_json::from_str(&text)?;
            let count = app.catalog.batch_upsert(&items)?;
            println!("已导入素材 {} 条", count);
        }

        Commands::ImportRules { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("无法读取 {}", file.display()))?;
            let parsed: StationRulesFile = serde_json::from_str(&text)?;
            // 先校验再写入
            RuleStoreSnapshot::new(&parsed.station_id, parsed.dayparts.clone(), parsed.rules.clone())?;
            for daypart in &parsed.dayparts {
                app.rules.upsert_daypart(daypart)?;
            }
            for rule in &parsed.rules {
                app.rules.upsert_rule(&parsed.station_id, rule)?;
            }
            println!(
                "已导入 {} 时段 {} 个, 规则 {} 条",
                parsed.station_id,
                parsed.dayparts.len(),
                parsed.rules.len()
            );
        }

        Commands::Run {
            station,
            date,
            interval_minutes,
            slot_secs,
            prior_days,
        } => {
            let _perf = PerfGuard::for_log("cli_run", &LogKey::new(&station, date));
            if app.logs.find_by_key(&station, date)?.is_some() {
                bail!("{}@{} 已有节目单, 请使用 rerun", station, date);
            }

            let (catalog, rules, seed) = app.snapshots(&station, date, prior_days)?;
            let slots = LogBuilder::slots_from_dayparts(&rules, date, interval_minutes, slot_secs)?;
            let job = ScheduleJob {
                request: ScheduleRequest {
                    station_id: station,
                    log_date: date,
                    slots,
                },
                catalog: Arc::new(catalog),
                rules: Arc::new(rules),
                seed,
            };

            let orchestrator = app.orchestrator().await?;
            let outcome = orchestrator.run_with_timeout(job, RunControl::new()).await?;
            app.logs.insert(&outcome.log)?;
            app.record_events(&outcome.log, &outcome.events)?;
            println!("{}", outcome.log.summary_text());
        }

        Commands::Rerun {
            station,
            date,
            prior_days,
        } => {
            let _perf = PerfGuard::for_log("cli_rerun", &LogKey::new(&station, date));
            let existing = app.require_log(&station, date)?;
            let (catalog, rules, seed) = app.snapshots(&station, date, prior_days)?;

            let orchestrator = app.orchestrator().await?;
            let control = RunControl::new().with_timeout(orchestrator.config().run_timeout());
            let mut outcome = orchestrator.rerun(&existing, &catalog, &rules, &seed, &control)?;
            app.logs.update(&mut outcome.log)?;
            app.record_events(&outcome.log, &outcome.events)?;
            println!("{}", outcome.log.summary_text());
        }

        Commands::Lock {
            station,
            date,
            actor,
            accept_open,
        } => {
            let mut log = app.require_log(&station, date)?;
            let orchestrator = app.orchestrator().await?;
            let event = orchestrator.with_log_lock(&log.key(), || {
                orchestrator.builder().lock(&mut log, &actor, accept_open)
            })?;
            app.logs.update(&mut log)?;
            app.record_events(&log, &[event])?;
            println!("{}", log.summary_text());
        }

        Commands::Unlock { station, date, actor } => {
            let mut log = app.require_log(&station, date)?;
            let orchestrator = app.orchestrator().await?;
            let event = orchestrator
                .with_log_lock(&log.key(), || orchestrator.builder().unlock(&mut log, &actor))?;
            app.logs.update(&mut log)?;
            app.record_events(&log, &[event])?;
            println!("{}", log.summary_text());
        }

        Commands::Publish { station, date, actor } => {
            let mut log = app.require_log(&station, date)?;
            let (catalog, rules, _) = app.snapshots(&station, date, 0)?;
            let orchestrator = app.orchestrator().await?;
            let mode = orchestrator.config().separation_mode;
            let event = orchestrator.with_log_lock(&log.key(), || {
                orchestrator
                    .builder()
                    .publish(&mut log, &catalog, &rules, mode, &actor)
            })?;
            app.logs.update(&mut log)?;
            app.record_events(&log, &[event])?;
            println!("{}", log.summary_text());
        }

        Commands::Show {
            station,
            date,
            with_events,
        } => {
            let log = app.require_log(&station, date)?;
            println!("{}", serde_json::to_string_pretty(&log)?);
            if with_events {
                let events = app.audit.list_by_log(&log.log_id)?;
                println!("{}", serde_json::to_string_pretty(&events)?);
            }
        }
    }

    Ok(())
}
