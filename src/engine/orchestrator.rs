// ==========================================
// 广播排播系统 - 排程编排器
// ==========================================
// 用途: 协调 快照 -> 时段填充 -> 节目单写回 -> 事件发布
// 红线: 同一节目单同时只允许一个运行; 事件只在填充结果写回后发布
// ==========================================

use crate::config::{SchedulerConfig, SchedulerConfigReader};
use crate::domain::audit::AuditEvent;
use crate::domain::traffic_log::{LogKey, Slot, TrafficLog};
use crate::engine::error::{SchedulingError, SchedulingResult};
use crate::engine::events::{AuditEventPublisher, OptionalEventPublisher};
use crate::engine::history::HistoryTracker;
use crate::engine::lock::LogLockRegistry;
use crate::engine::log_builder::LogBuilder;
use crate::engine::slot_assigner::{RunControl, SlotAssigner, SlotOutcome, SCHEDULER_ACTOR};
use crate::engine::snapshot::{CatalogSnapshot, HistorySeed, RuleStoreSnapshot};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ==========================================
// 请求与结果
// ==========================================

/// 单个节目单的排程请求
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub station_id: String,
    pub log_date: NaiveDate,
    pub slots: Vec<Slot>,
}

impl ScheduleRequest {
    pub fn key(&self) -> LogKey {
        LogKey::new(&self.station_id, self.log_date)
    }
}

/// 批量/异步运行的独立任务 (各自持有快照)
#[derive(Debug, Clone)]
pub struct ScheduleJob {
    pub request: ScheduleRequest,
    pub catalog: Arc<CatalogSnapshot>,
    pub rules: Arc<RuleStoreSnapshot>,
    pub seed: HistorySeed,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub log: TrafficLog,
    pub outcomes: Vec<SlotOutcome>,
    pub events: Vec<AuditEvent>,
    pub auto_locked: bool,
    pub publish_failures: usize,
}

// ==========================================
// ScheduleOrchestrator - 排程编排器
// ==========================================

pub struct ScheduleOrchestrator {
    config: SchedulerConfig,
    assigner: SlotAssigner,
    builder: LogBuilder,
    publisher: OptionalEventPublisher,
    locks: Arc<LogLockRegistry>,
}

impl ScheduleOrchestrator {
    /// 创建新的编排器实例
    ///
    /// # 参数
    /// - config: 本次会话使用的排程配置
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            assigner: SlotAssigner::new(config.clone()),
            builder: LogBuilder::new(),
            publisher: OptionalEventPublisher::none(),
            locks: Arc::new(LogLockRegistry::new()),
            config,
        }
    }

    /// 从配置读取器加载配置后创建
    pub async fn from_reader<C>(reader: &C) -> SchedulingResult<Self>
    where
        C: SchedulerConfigReader + ?Sized,
    {
        let config = SchedulerConfig::load(reader).await?;
        Ok(Self::new(config))
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn AuditEventPublisher>) -> Self {
        self.publisher = OptionalEventPublisher::with_publisher(publisher);
        self
    }

    /// 共享锁注册表 (多个编排器实例协同时使用)
    pub fn with_lock_registry(mut self, locks: Arc<LogLockRegistry>) -> Self {
        self.locks = locks;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn builder(&self) -> &LogBuilder {
        &self.builder
    }

    pub fn locks(&self) -> &Arc<LogLockRegistry> {
        &self.locks
    }

    // ==========================================
    // 排程运行
    // ==========================================

    /// 执行完整排程 (新建草稿节目单)
    ///
    /// # 返回
    /// - Err(LogBusy): 同一节目单正在运行
    /// - Err(Configuration): 快照与请求不匹配或时段引用错误
    /// - Err(Cancelled): 运行被取消, 无任何结果提交
    #[instrument(skip_all, fields(
        station_id = %request.station_id,
        log_date = %request.log_date,
        slots = request.slots.len()
    ))]
    pub fn run(
        &self,
        request: ScheduleRequest,
        catalog: &CatalogSnapshot,
        rules: &RuleStoreSnapshot,
        seed: &HistorySeed,
        control: &RunControl,
    ) -> SchedulingResult<RunOutcome> {
        Self::check_station(&request.station_id, rules)?;
        let _guard = self.locks.try_acquire(&request.key())?;

        info!(catalog_items = catalog.len(), rules = rules.rules().len(), "开始执行排程");
        let log = self
            .builder
            .create_draft(&request.station_id, request.log_date, request.slots);
        self.execute(log, catalog, rules, seed, control)
    }

    /// 重排已有草稿节目单的未解决/未填充时段
    #[instrument(skip_all, fields(log_id = %log.log_id))]
    pub fn rerun(
        &self,
        log: &TrafficLog,
        catalog: &CatalogSnapshot,
        rules: &RuleStoreSnapshot,
        seed: &HistorySeed,
        control: &RunControl,
    ) -> SchedulingResult<RunOutcome> {
        Self::check_station(&log.station_id, rules)?;
        let _guard = self.locks.try_acquire(&log.key())?;

        info!(open_slots = log.open_slots(), "开始重排未解决时段");
        self.execute(log.clone(), catalog, rules, seed, control)
    }

    /// 在阻塞线程池中执行排程, 超时取自配置
    pub async fn run_with_timeout(
        self: &Arc<Self>,
        job: ScheduleJob,
        control: RunControl,
    ) -> SchedulingResult<RunOutcome> {
        let control = control.with_timeout(self.config.run_timeout());
        let this = Arc::clone(self);
        let key = job.request.key();

        let result = tokio::task::spawn_blocking(move || {
            this.run(job.request, &job.catalog, &job.rules, &job.seed, &control)
        })
        .await
        .map_err(|e| SchedulingError::Cancelled(format!("{} 排程任务异常终止: {}", key, e)))?;

        if let Err(e) = &result {
            if e.is_cancelled() {
                warn!(log_key = %key, error = %e, "排程超时或被取消");
            }
        }
        result
    }

    /// 并行执行多个独立节目单的排程
    ///
    /// # 返回
    /// 与输入顺序一致的结果列表
    pub async fn run_batch(self: &Arc<Self>, jobs: Vec<ScheduleJob>) -> Vec<SchedulingResult<RunOutcome>> {
        use futures::future::join_all;

        info!(count = jobs.len(), "开始批量排程");
        let tasks = jobs
            .into_iter()
            .map(|job| self.run_with_timeout(job, RunControl::new()));
        let results = join_all(tasks).await;

        info!(
            total = results.len(),
            success = results.iter().filter(|r| r.is_ok()).count(),
            failed = results.iter().filter(|r| r.is_err()).count(),
            "批量排程完成"
        );
        results
    }

    // ==========================================
    // 人工操作
    // ==========================================

    /// 在节目单锁内执行操作 (人工编辑与排程运行互斥)
    pub fn with_log_lock<R, F>(&self, key: &LogKey, f: F) -> SchedulingResult<R>
    where
        F: FnOnce() -> SchedulingResult<R>,
    {
        let _guard = self.locks.try_acquire(key)?;
        f()
    }

    /// 发布一组人工操作产生的事件
    pub fn publish_events(&self, events: &[AuditEvent]) -> usize {
        self.publisher.publish_all(events)
    }

    // ==========================================
    // 内部方法
    // ==========================================

    fn check_station(station_id: &str, rules: &RuleStoreSnapshot) -> SchedulingResult<()> {
        if rules.station_id() != station_id {
            return Err(SchedulingError::configuration(format!(
                "规则快照属于电台 {}, 请求电台 {}",
                rules.station_id(),
                station_id
            )));
        }
        Ok(())
    }

    fn execute(
        &self,
        mut log: TrafficLog,
        catalog: &CatalogSnapshot,
        rules: &RuleStoreSnapshot,
        seed: &HistorySeed,
        control: &RunControl,
    ) -> SchedulingResult<RunOutcome> {
        // 步骤1: 构造播出历史
        let mut history = HistoryTracker::for_log(
            self.config.history_depth,
            self.config.separation_mode,
            rules.max_hourly_cap(),
            seed,
            &log,
            catalog,
        );
        debug!(
            history_depth = history.depth(),
            seed_plays = seed.plays().len(),
            "步骤1: 播出历史就绪"
        );

        // 步骤2: 时段填充
        let pass = self.assigner.assign(&log, catalog, rules, &mut history, control)?;
        let outcomes = pass.outcomes.clone();

        // 步骤3: 写回节目单
        let mut events = self.builder.apply_pass(&mut log, pass)?;

        // 步骤4: 无未解决冲突时自动锁定
        let mut auto_locked = false;
        if self.config.auto_lock_on_complete && log.open_slots() == 0 && log.unresolved_count() == 0 {
            events.push(self.builder.lock(&mut log, SCHEDULER_ACTOR, false)?);
            auto_locked = true;
        }

        // 步骤5: 发布事件
        let publish_failures = self.publisher.publish_all(&events);

        info!(
            log_id = %log.log_id,
            filled = log.filled_count(),
            unresolved = log.unresolved_count(),
            auto_locked,
            events = events.len(),
            "排程完成"
        );

        Ok(RunOutcome {
            log,
            outcomes,
            events,
            auto_locked,
            publish_failures,
        })
    }
}
