//! Coordination edge cases: fail-fast barriers, lock release, interruption and
//! rollback across several concurrent units.

use futures::FutureExt;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vdcmig_core::application::{
    shutdown_channel, ConcurrencyCoordinator, Pipeline, ResourceLock, StepExecutor,
    ThreadedBatchRunner, UnitStatus,
};
use vdcmig_core::domain::{ContextUpdate, MigrationUnit};
use vdcmig_core::error::AppError;
use vdcmig_core::port::checkpoint_store::mocks::InMemoryCheckpointStore;
use vdcmig_core::port::id_provider::mocks::SequentialIdProvider;
use vdcmig_core::port::time_provider::mocks::FixedTimeProvider;
use vdcmig_core::port::{FnStep, Step};

type Log = Arc<Mutex<Vec<String>>>;

fn coordinator(store: Arc<InMemoryCheckpointStore>) -> ConcurrencyCoordinator {
    let executor = Arc::new(StepExecutor::new(store, Arc::new(FixedTimeProvider::new(1_000)), 4));
    ConcurrencyCoordinator::new(executor, Arc::new(SequentialIdProvider::default()))
}

fn units(n: usize) -> Vec<MigrationUnit> {
    (1..=n)
        .map(|i| MigrationUnit::new(format!("vdc-{i}"), format!("Org {i}")))
        .collect()
}

/// Logs `unit:name`, sleeps `delay`, fails for `fail_for`; reverse logs `unit:undo:name`
fn step(name: &'static str, log: &Log, delay: Duration, fail_for: Option<&'static str>) -> Arc<dyn Step> {
    let forward_log = log.clone();
    let reverse_log = log.clone();
    Arc::new(
        FnStep::new(name, move |unit| {
            let log = forward_log.clone();
            let id = unit.id.clone();
            async move {
                tokio::time::sleep(delay).await;
                if fail_for == Some(id.as_str()) {
                    return Err(AppError::RemoteOperationFailed(format!("{name} rejected")));
                }
                log.lock().unwrap().push(format!("{id}:{name}"));
                Ok(ContextUpdate::new().set_value(format!("{name}_done"), json!(true)))
            }
            .boxed()
        })
        .with_reverse(move |unit| {
            let log = reverse_log.clone();
            let id = unit.id.clone();
            async move {
                log.lock().unwrap().push(format!("{id}:undo:{name}"));
                Ok(())
            }
            .boxed()
        }),
    )
}

fn entries(log: &Log, suffix: &str) -> usize {
    log.lock().unwrap().iter().filter(|l| l.ends_with(suffix)).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_failure_releases_every_waiting_unit() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let log = Log::default();
    let pipeline = Arc::new(
        Pipeline::builder()
            .step(step("createEdgeGateway", &log, Duration::ZERO, None))
            .step(step("createOrgVdcNetworks", &log, Duration::from_millis(100), Some("vdc-4")))
            .barrier("networksCreated")
            .gated_step(step("connectUplinks", &log, Duration::ZERO, None))
            .build()
            .unwrap(),
    );

    let report = tokio::time::timeout(Duration::from_secs(5), coordinator(store.clone()).run(units(6), pipeline))
        .await
        .expect("waiting units must be released")
        .unwrap();

    assert_eq!(report.failures().count(), 1);
    for outcome in &report.outcomes {
        match outcome.unit_id.as_str() {
            "vdc-4" => assert!(matches!(outcome.status, UnitStatus::Failed { .. })),
            _ => assert!(
                matches!(outcome.status, UnitStatus::Aborted { ref reason } if reason.contains("sibling")),
                "{}: {}",
                outcome.unit_id,
                outcome.status
            ),
        }
    }
    assert_eq!(entries(&log, ":connectUplinks"), 0);
    assert_eq!(entries(&log, ":createOrgVdcNetworks"), 5);

    // The failed unit's earlier work stays checkpointed
    let record = store.get("vdc-4").unwrap();
    assert!(record.is_done("createEdgeGateway"));
    assert!(!record.is_done("createOrgVdcNetworks"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_survives_panicking_holder() {
    let lock = Arc::new(ResourceLock::new(Duration::from_millis(200)));

    let holder = lock.clone();
    let crashed = tokio::spawn(async move {
        let _token = holder.acquire("edge-gw-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        panic!("driver crashed while holding the lock");
    })
    .await;
    assert!(crashed.is_err());

    let value = lock
        .with_lock_on("edge-gw-1", || async { Ok::<_, AppError>(42) })
        .await
        .unwrap();
    assert_eq!(value, 42);

    // While held, a second acquirer times out instead of waiting forever
    let _held = lock.acquire("edge-gw-1").await.unwrap();
    let err = lock.acquire("edge-gw-1").await.unwrap_err();
    assert!(matches!(err, AppError::LockTimeout { ref resource, .. } if resource == "edge-gw-1"));
}

#[tokio::test]
async fn test_interrupted_run_resumes_where_it_stopped() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let log = Log::default();
    let pipeline = Arc::new(
        Pipeline::builder()
            .step(step("createEdgeGateway", &log, Duration::from_millis(100), None))
            .step(step("createOrgVdcNetworks", &log, Duration::ZERO, None))
            .build()
            .unwrap(),
    );

    let (tx, token) = shutdown_channel();
    let run = {
        let coordinator = coordinator(store.clone()).with_shutdown(token);
        let pipeline = pipeline.clone();
        tokio::spawn(async move { coordinator.run(units(3), pipeline).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    tx.shutdown();
    let report = run.await.unwrap().unwrap();

    for outcome in &report.outcomes {
        assert!(
            matches!(outcome.status, UnitStatus::Interrupted { ref before } if before == "createOrgVdcNetworks"),
            "{}: {}",
            outcome.unit_id,
            outcome.status
        );
    }
    assert_eq!(entries(&log, ":createOrgVdcNetworks"), 0);

    let report = coordinator(store).run(units(3), pipeline).await.unwrap();
    assert!(report.is_success());
    assert_eq!(entries(&log, ":createEdgeGateway"), 3);
    assert_eq!(entries(&log, ":createOrgVdcNetworks"), 3);
}

#[tokio::test]
async fn test_rollback_after_partial_failure() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let log = Log::default();
    let pipeline = Arc::new(
        Pipeline::builder()
            .step(step("createEdgeGateway", &log, Duration::ZERO, None))
            .step(step("createOrgVdcNetworks", &log, Duration::ZERO, Some("vdc-2")))
            .build()
            .unwrap(),
    );

    let report = coordinator(store.clone()).run(units(2), pipeline.clone()).await.unwrap();
    assert!(!report.is_success());

    let rollback = coordinator(store.clone()).rollback(units(2), pipeline).await.unwrap();
    assert!(rollback.is_success());

    let ok = rollback.outcome("vdc-1").unwrap();
    assert_eq!(ok.executed, vec!["createOrgVdcNetworks", "createEdgeGateway"]);
    let partial = rollback.outcome("vdc-2").unwrap();
    assert_eq!(partial.executed, vec!["createEdgeGateway"]);
    assert_eq!(partial.skipped, vec!["createOrgVdcNetworks"]);

    assert_eq!(entries(&log, "vdc-2:undo:createOrgVdcNetworks"), 0);
    for id in ["vdc-1", "vdc-2"] {
        assert!(store.get(id).unwrap().completed.completed().is_empty());
    }
}

#[tokio::test]
async fn test_batch_runner_bounds_concurrency_across_many_items() {
    let runner = ThreadedBatchRunner::new(3);
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let items = (0..20).map(|i| (format!("disk-{i:02}"), i)).collect();
    let report = {
        let inside = inside.clone();
        let peak = peak.clone();
        runner
            .run(items, move |i: usize| {
                let inside = inside.clone();
                let peak = peak.clone();
                async move {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    if i % 7 == 3 {
                        return Err(AppError::RemoteOperationFailed("datastore full".to_string()));
                    }
                    Ok(())
                }
            })
            .await
    };

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(report.total(), 20);
    let failed: Vec<&str> = report.failed.iter().map(|f| f.item.as_str()).collect();
    assert_eq!(failed, vec!["disk-03", "disk-10", "disk-17"]);
}
