//! Scheduler runs against mock sources: ordering, dedup of job identities,
//! requeueing, panic isolation, hot reload and cancellation.

use std::sync::Arc;
use std::time::Duration;

use ripple_common::JobSpec;
use ripple_scout::testing::{items, job_from, query_for, spec, MockSource, StaticJobSource, TestHarness};
use ripple_scout::{Orchestrator, RunSummary, Scheduler, SchedulerConfig};
use tokio_util::sync::CancellationToken;

fn quiet(label: &str) -> JobSpec {
    let mut s = spec(label);
    s.params.enable_network_expansion = Some(false);
    s
}

fn query(spec: &JobSpec) -> String {
    query_for(&job_from(spec))
}

fn config(workers: usize, hot_reload: bool) -> SchedulerConfig {
    SchedulerConfig {
        workers,
        hot_reload,
        reload_interval: Duration::from_millis(20),
        grace_window: Duration::from_millis(300),
        queue_wait: Duration::from_millis(20),
        max_requeues: 1,
        worker_id_prefix: "test".to_string(),
        shuffle: false,
    }
}

async fn run(h: &TestHarness, jobs: Arc<StaticJobSource>, config: SchedulerConfig) -> RunSummary {
    let scheduler = Scheduler::new(Orchestrator::new(h.deps()), jobs, config);
    tokio::time::timeout(Duration::from_secs(10), scheduler.run(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn drains_initial_queue_and_stops() {
    let specs = vec![quiet("#a"), quiet("#b"), quiet("#c")];
    let mut source = MockSource::new();
    for (i, s) in specs.iter().enumerate() {
        source = source.on_pages(&query(s), vec![items(&format!("j{i}"), 2, "text")]);
    }
    let h = TestHarness::new(source).await.unwrap();

    let summary = run(&h, Arc::new(StaticJobSource::new(specs)), config(2, false)).await;

    assert_eq!(summary.jobs_loaded, 3);
    assert_eq!(summary.jobs_completed, 3);
    assert_eq!(summary.jobs_finished(), 3);
    assert_eq!(summary.stored, 6);
    assert_eq!(h.sink.count(), 6);
}

#[tokio::test]
async fn new_jobs_run_first_then_by_weight() {
    let mut light = quiet("#light");
    light.weight = Some(1.0);
    let mut heavy = quiet("#heavy");
    heavy.weight = Some(5.0);
    let mut fresh = quiet("#fresh");
    fresh.is_new = true;

    let expected: Vec<String> = [&fresh, &heavy, &light]
        .iter()
        .map(|s| format!("search:{}:-", query(s)))
        .collect();

    let h = TestHarness::new(MockSource::new()).await.unwrap();
    let jobs = Arc::new(StaticJobSource::new(vec![light, heavy, fresh]));
    run(&h, jobs, config(1, false)).await;

    assert_eq!(h.source.calls_with_prefix("search:"), expected);
}

#[tokio::test]
async fn invalid_and_repeated_jobs_are_dropped_at_load() {
    let mut empty = quiet("#x");
    empty.params.label = None;
    let specs = vec![quiet("#a"), quiet("#a"), empty];

    let h = TestHarness::new(MockSource::new()).await.unwrap();
    let summary = run(&h, Arc::new(StaticJobSource::new(specs)), config(2, false)).await;

    assert_eq!(summary.jobs_loaded, 1);
    assert_eq!(summary.jobs_rejected, 1);
    assert_eq!(summary.jobs_finished(), 1);
}

#[tokio::test]
async fn panicking_job_does_not_stop_the_pool() {
    let boom = quiet("#boom");
    let fine = quiet("#fine");
    let source = MockSource::new()
        .panic_on(&query(&boom))
        .on_pages(&query(&fine), vec![items("f", 1, "fine")]);
    let h = TestHarness::new(source).await.unwrap();

    let summary = run(&h, Arc::new(StaticJobSource::new(vec![boom, fine])), config(1, false)).await;

    assert_eq!(summary.jobs_failed, 1);
    assert_eq!(summary.jobs_completed, 1);
    assert!(h.sink.contains("f-0"));
}

#[tokio::test]
async fn exhausted_job_is_requeued_once() {
    let flaky = quiet("#flaky");
    let q = query(&flaky);
    let source = MockSource::new()
        .on_pages(&q, vec![items("f", 2, "flaky")])
        .exhausted(&q, None, 1);
    let h = TestHarness::new(source).await.unwrap();

    let summary = run(&h, Arc::new(StaticJobSource::new(vec![flaky])), config(1, false)).await;

    assert_eq!(summary.jobs_exhausted, 1);
    assert_eq!(summary.jobs_requeued, 1);
    assert_eq!(summary.jobs_completed, 1);
    assert_eq!(h.sink.count(), 2);
}

#[tokio::test]
async fn requeues_are_bounded() {
    let flaky = quiet("#flaky");
    let q = query(&flaky);
    let h = TestHarness::new(MockSource::new().exhausted(&q, None, 5))
        .await
        .unwrap();

    let summary = run(&h, Arc::new(StaticJobSource::new(vec![flaky])), config(1, false)).await;

    assert_eq!(summary.jobs_exhausted, 2);
    assert_eq!(summary.jobs_requeued, 1);
    assert_eq!(summary.jobs_completed, 0);
}

#[tokio::test]
async fn hot_reload_picks_up_new_jobs() {
    let first = quiet("#first");
    let mut late = quiet("#late");
    late.is_new = true;
    let source = MockSource::new()
        .on_pages(&query(&first), vec![items("a", 1, "first")])
        .on_pages(&query(&late), vec![items("b", 1, "late")]);
    let h = TestHarness::new(source).await.unwrap();
    let jobs = Arc::new(StaticJobSource::new(vec![first]));

    let scheduler = Scheduler::new(Orchestrator::new(h.deps()), jobs.clone(), config(2, true));
    let running = tokio::spawn(async move { scheduler.run(CancellationToken::new()).await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    jobs.push(late);

    let summary = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(summary.jobs_loaded, 1);
    assert_eq!(summary.jobs_added_by_reload, 1);
    assert_eq!(summary.jobs_completed, 2);
    assert!(h.sink.contains("b-0"));
}

#[tokio::test]
async fn reload_ignores_known_identities() {
    let a = quiet("#a");
    let h = TestHarness::new(MockSource::new()).await.unwrap();
    let jobs = Arc::new(StaticJobSource::new(vec![a.clone()]));

    let scheduler = Scheduler::new(Orchestrator::new(h.deps()), jobs.clone(), config(1, true));
    let running = tokio::spawn(async move { scheduler.run(CancellationToken::new()).await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    // Same identity, different filters.
    let mut changed = a;
    changed.params.language = Some("de".to_string());
    jobs.replace(vec![changed]);

    let summary = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(summary.jobs_added_by_reload, 0);
    assert_eq!(summary.jobs_finished(), 1);
}

#[tokio::test]
async fn cancellation_stops_workers_and_monitor() {
    let stuck = quiet("#stuck");
    let h = TestHarness::new(MockSource::new().hang_on(&query(&stuck)))
        .await
        .unwrap();
    let scheduler = Scheduler::new(
        Orchestrator::new(h.deps()),
        Arc::new(StaticJobSource::new(vec![stuck])),
        config(2, true),
    );
    let cancel = CancellationToken::new();

    let running = {
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(summary.jobs_interrupted, 1);
    assert_eq!(summary.jobs_requeued, 0);
}
