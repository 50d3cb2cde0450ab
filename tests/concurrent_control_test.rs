// ==========================================
// 并发控制测试
// ==========================================
// 测试范围:
// 1. 同一节目单的并发运行立即失败 (不排队)
// 2. 取消/超时的运行不留下任何结果
// 3. 不同电台/日期的节目单并行排程
// ==========================================


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::*;
use traffic_engine::config::SchedulerConfig;
use traffic_engine::domain::{LogKey, MediaItem, MediaKind, RotationRule, RotationType};
use traffic_engine::engine::{
    CatalogSnapshot, HistorySeed, InMemoryEventPublisher, RuleStoreSnapshot, RunControl,
    ScheduleJob, ScheduleOrchestrator, ScheduleRequest, SchedulingError,
};

fn shared_inputs() -> (Arc<CatalogSnapshot>, Arc<RuleStoreSnapshot>) {
    let catalog = catalog(vec![
        MediaItem::new("M1", MediaKind::Music, 200),
        MediaItem::new("M2", MediaKind::Music, 200),
        MediaItem::new("M3", MediaKind::Music, 200),
    ]);
    let rules = rule_store(
        vec![full_day()],
        vec![RotationRule::new("R", RotationType::Even, 1).with_min_separation(1)],
    );
    (Arc::new(catalog), Arc::new(rules))
}

fn job(day: u32, catalog: &Arc<CatalogSnapshot>, rules: &Arc<RuleStoreSnapshot>) -> ScheduleJob {
    let date = chrono::NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
    ScheduleJob {
        request: ScheduleRequest {
            station_id: STATION.to_string(),
            log_date: date,
            slots: slots_every(date, "ALL", time(0, 0), 24, 60),
        },
        catalog: catalog.clone(),
        rules: rules.clone(),
        seed: HistorySeed::empty(),
    }
}

#[test]
fn test_concurrent_run_on_same_log_fails_fast() {
    println!("\n=== 测试: 同一节目单正在编辑时排程立即失败 ===");

    let orchestrator = ScheduleOrchestrator::new(SchedulerConfig::default());
    let (catalog, rules) = shared_inputs();
    let key = LogKey::new(STATION, test_date());

    let result = orchestrator.with_log_lock(&key, || {
        let job = job(1, &catalog, &rules);
        orchestrator.run(job.request, &catalog, &rules, &job.seed, &RunControl::new())
    });
    let err = result.unwrap_err();
    assert!(matches!(err, SchedulingError::LogBusy { .. }));
    assert!(err.is_log_state_error());

    // 释放后可以运行
    let job = job(1, &catalog, &rules);
    assert!(orchestrator
        .run(job.request, &catalog, &rules, &job.seed, &RunControl::new())
        .is_ok());
    println!("✓ 占用期间失败, 释放后成功");
}

#[test]
fn test_cancelled_run_leaves_no_trace() {
    println!("\n=== 测试: 取消的运行不发布任何事件 ===");

    let memory = Arc::new(InMemoryEventPublisher::new());
    let orchestrator =
        ScheduleOrchestrator::new(SchedulerConfig::default()).with_publisher(memory.clone());
    let (catalog, rules) = shared_inputs();
    let job = job(1, &catalog, &rules);

    let control = RunControl::new();
    control.cancel();
    let err = orchestrator
        .run(job.request, &catalog, &rules, &job.seed, &control)
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(memory.is_empty());
    assert!(!orchestrator.locks().is_held(&LogKey::new(STATION, test_date())));
    println!("✓ {}", err);
}

#[test]
fn test_expired_deadline_cancels_run() {
    let (catalog, rules) = shared_inputs();
    let orchestrator = ScheduleOrchestrator::new(SchedulerConfig::default());
    let job = job(1, &catalog, &rules);

    let control = RunControl::new().with_timeout(Some(Duration::from_millis(0)));
    std::thread::sleep(Duration::from_millis(5));
    assert!(control.is_timed_out());

    let result = orchestrator.run(job.request, &catalog, &rules, &job.seed, &control);
    assert!(matches!(result, Err(SchedulingError::Cancelled(_))));
}

#[test]
fn test_operator_abort_from_another_thread() {
    println!("\n=== 测试: 其他线程中止运行 ===");

    let (catalog, rules) = shared_inputs();
    let orchestrator = Arc::new(ScheduleOrchestrator::new(SchedulerConfig::default()));
    let control = RunControl::new();
    let aborted = Arc::new(AtomicBool::new(false));

    let handle = {
        let control = control.clone();
        let aborted = aborted.clone();
        std::thread::spawn(move || {
            control.cancel();
            aborted.store(true, Ordering::SeqCst);
        })
    };
    handle.join().unwrap();
    assert!(aborted.load(Ordering::SeqCst));

    let job = job(2, &catalog, &rules);
    let result = orchestrator.run(job.request, &catalog, &rules, &job.seed, &control);
    assert!(result.unwrap_err().is_cancelled());
    println!("✓ 克隆的 RunControl 共享取消标记");
}

#[tokio::test]
async fn test_batch_runs_independent_logs_in_parallel() {
    println!("\n=== 测试: 批量并行排程 ===");

    let memory = Arc::new(InMemoryEventPublisher::new());
    let orchestrator = Arc::new(
        ScheduleOrchestrator::new(SchedulerConfig::default()).with_publisher(memory.clone()),
    );
    let (catalog, rules) = shared_inputs();
    let jobs: Vec<ScheduleJob> = (1..=5).map(|day| job(day, &catalog, &rules)).collect();

    let results = orchestrator.run_batch(jobs).await;
    assert_eq!(results.len(), 5);

    let mut dates = Vec::new();
    for result in results {
        let outcome = result.expect("批量排程失败");
        assert_eq!(outcome.log.filled_count(), 24);
        assert!(outcome.auto_locked);
        dates.push(outcome.log.log_date);
    }
    // 结果顺序与输入一致
    let expected: Vec<_> = (1..=5)
        .map(|d| chrono::NaiveDate::from_ymd_opt(2025, 3, d).unwrap())
        .collect();
    assert_eq!(dates, expected);

    // 每份节目单 24 条排入 + 1 条锁定
    assert_eq!(memory.len(), 5 * 25);
    println!("✓ 5 份节目单并行完成");
}

#[tokio::test]
async fn test_run_with_timeout_completes_within_budget() {
    let (catalog, rules) = shared_inputs();
    let orchestrator = Arc::new(ScheduleOrchestrator::new(SchedulerConfig::default()));

    let outcome = orchestrator
        .run_with_timeout(job(3, &catalog, &rules), RunControl::new())
        .await
        .unwrap();
    assert_eq!(outcome.log.filled_count(), 24);
}
