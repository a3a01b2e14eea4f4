//! End-to-end migration runs against a SQLite checkpoint file
//!
//! Three units share an uplink address pool, meet at a barrier, move disks on a
//! bounded pool and configure firewalls. One unit fails on its first attempt;
//! a second process-like run resumes it from the persisted checkpoints.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vdcmig_core::application::{
    ConcurrencyCoordinator, Pipeline, ResourceLock, StepExecutor, UnitStatus,
};
use vdcmig_core::domain::{ContextUpdate, IpPool, IpRange, MigrationUnit, UnitPhase};
use vdcmig_core::error::{AppError, Result};
use vdcmig_core::port::id_provider::UuidProvider;
use vdcmig_core::port::time_provider::SystemTimeProvider;
use vdcmig_core::port::{BatchItem, BatchStep, CheckpointStore, Step};
use vdcmig_infra_sqlite::{create_pool, run_migrations, SqliteCheckpointStore};

const UNITS: [&str; 3] = ["vdc-a", "vdc-b", "vdc-c"];

#[derive(Default)]
struct Calls {
    gateways: AtomicUsize,
    firewalls: AtomicUsize,
    disks: Mutex<BTreeMap<String, usize>>,
}

struct CreateEdgeGateway {
    calls: Arc<Calls>,
}

#[async_trait]
impl Step for CreateEdgeGateway {
    fn name(&self) -> &str {
        "createEdgeGateway"
    }

    async fn forward(&self, unit: &MigrationUnit) -> Result<ContextUpdate> {
        self.calls.gateways.fetch_add(1, Ordering::SeqCst);
        Ok(ContextUpdate::new().set("edge_gateway_id", &format!("gw-{}", unit.id))?)
    }
}

/// Takes the lowest free address from a pool shared by all units
struct AllocateUplinkIp {
    pool: Arc<Mutex<IpPool>>,
    lock: Arc<ResourceLock>,
}

#[async_trait]
impl Step for AllocateUplinkIp {
    fn name(&self) -> &str {
        "allocateUplinkIp"
    }

    async fn forward(&self, _unit: &MigrationUnit) -> Result<ContextUpdate> {
        let addr = self
            .lock
            .with_lock_on("uplink-pool", || async {
                let mut pool = self.pool.lock().unwrap();
                let addr = pool
                    .ranges()
                    .first()
                    .map(IpRange::start)
                    .ok_or_else(|| AppError::Validation("uplink pool exhausted".to_string()))?;
                *pool = pool.subtract(&[addr]);
                Ok(addr)
            })
            .await?;
        Ok(ContextUpdate::new().set("uplink_ip", &addr.to_string())?)
    }
}

struct MoveNamedDisks {
    calls: Arc<Calls>,
}

#[async_trait]
impl BatchStep for MoveNamedDisks {
    fn name(&self) -> &str {
        "moveNamedDisks"
    }

    async fn items(&self, unit: &MigrationUnit) -> Result<Vec<BatchItem>> {
        Ok((1..=2)
            .map(|n| BatchItem::new(format!("{}-disk-{}", unit.id, n), serde_json::json!({ "size_gb": n * 10 })))
            .collect())
    }

    async fn process(&self, _unit_id: &str, item: BatchItem) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        *self.calls.disks.lock().unwrap().entry(item.id).or_default() += 1;
        Ok(())
    }
}

/// Fails once for `flaky_unit`, then succeeds
struct ConfigureFirewall {
    calls: Arc<Calls>,
    flaky_unit: &'static str,
    armed: AtomicBool,
}

#[async_trait]
impl Step for ConfigureFirewall {
    fn name(&self) -> &str {
        "configureFirewall"
    }

    async fn forward(&self, unit: &MigrationUnit) -> Result<ContextUpdate> {
        if unit.id == self.flaky_unit && self.armed.swap(false, Ordering::SeqCst) {
            return Err(AppError::RemoteOperationFailed("edge gateway busy".to_string()));
        }
        let peers = unit
            .context
            .shared("uplink_ip")
            .map(|m| m.len())
            .unwrap_or_default();
        self.calls.firewalls.fetch_add(1, Ordering::SeqCst);
        Ok(ContextUpdate::new().set_value("firewall_peers", serde_json::json!(peers)))
    }
}

fn pipeline(calls: &Arc<Calls>, pool: &Arc<Mutex<IpPool>>, firewall: Arc<ConfigureFirewall>) -> Arc<Pipeline> {
    Arc::new(
        Pipeline::builder()
            .step(Arc::new(CreateEdgeGateway { calls: calls.clone() }))
            .step(Arc::new(AllocateUplinkIp {
                pool: pool.clone(),
                lock: Arc::new(ResourceLock::new(Duration::from_secs(5))),
            }))
            .barrier_sharing("uplinksAllocated", &["uplink_ip"])
            .gated_batch(Arc::new(MoveNamedDisks { calls: calls.clone() }))
            .gated_step(firewall)
            .build()
            .unwrap(),
    )
}

async fn open(url: &str) -> Arc<SqliteCheckpointStore> {
    let pool = create_pool(url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteCheckpointStore::new(pool))
}

fn coordinator(store: Arc<SqliteCheckpointStore>) -> ConcurrencyCoordinator {
    let executor = Arc::new(StepExecutor::new(store, Arc::new(SystemTimeProvider), 2));
    ConcurrencyCoordinator::new(executor, Arc::new(UuidProvider))
}

fn units() -> Vec<MigrationUnit> {
    UNITS.iter().map(|id| MigrationUnit::new(*id, format!("org-{id}"))).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_unit_resumes_from_checkpoint() {
    let path = std::env::temp_dir().join(format!("vdcmig-e2e-{}.db", uuid::Uuid::new_v4()));
    let url = path.to_str().unwrap().to_string();

    let calls = Arc::new(Calls::default());
    let uplinks: IpRange = "192.0.2.10-192.0.2.20".parse().unwrap();
    let pool = Arc::new(Mutex::new(IpPool::from_ranges(vec![uplinks]).unwrap()));
    let firewall = Arc::new(ConfigureFirewall {
        calls: calls.clone(),
        flaky_unit: "vdc-c",
        armed: AtomicBool::new(true),
    });

    // First run: vdc-c fails at the last step
    let store = open(&url).await;
    let first = tokio::time::timeout(
        Duration::from_secs(10),
        coordinator(store.clone()).run(units(), pipeline(&calls, &pool, firewall.clone())),
    )
    .await
    .expect("first run must not hang")
    .unwrap();

    assert!(!first.is_success());
    let failed = first.outcome("vdc-c").unwrap();
    assert!(
        matches!(failed.status, UnitStatus::Failed { ref step, .. } if step == "configureFirewall"),
        "{:?}",
        failed.status
    );
    let record = store.load("vdc-c").await.unwrap().unwrap();
    assert!(record.is_done("moveNamedDisks"));
    assert!(!record.is_done("configureFirewall"));
    drop(store);

    // Second run on a fresh connection, as after a restart
    let store = open(&url).await;
    let second = coordinator(store.clone())
        .run(units(), pipeline(&calls, &pool, firewall))
        .await
        .unwrap();

    assert!(second.is_success(), "{:?}", second.outcomes);
    let resumed = second.outcome("vdc-c").unwrap();
    assert!(resumed.skipped.iter().any(|s| s == "createEdgeGateway"));
    assert!(resumed.skipped.iter().any(|s| s == "allocateUplinkIp"));
    assert_eq!(resumed.executed, vec!["configureFirewall".to_string()]);

    // Work done exactly once per unit across both runs
    assert_eq!(calls.gateways.load(Ordering::SeqCst), 3);
    assert_eq!(calls.firewalls.load(Ordering::SeqCst), 3);
    let disks = calls.disks.lock().unwrap().clone();
    assert_eq!(disks.len(), 6);
    assert!(disks.values().all(|n| *n == 1), "{disks:?}");

    // Every unit got its own uplink and saw all three at the barrier
    let mut seen = BTreeSet::new();
    for id in UNITS {
        let unit = second.outcome(id).unwrap().unit.as_ref().unwrap();
        assert_eq!(unit.phase, UnitPhase::Completed);
        let ip: String = unit.context.get("uplink_ip").unwrap().unwrap();
        let ip: IpAddr = ip.parse().unwrap();
        assert!(uplinks.contains(&ip));
        seen.insert(ip);
        assert_eq!(unit.context.shared("uplink_ip").unwrap().len(), 3);
        assert_eq!(unit.context.get_value("firewall_peers"), Some(&serde_json::json!(3)));
    }
    assert_eq!(seen.len(), 3);
    assert_eq!(pool.lock().unwrap().len(), 11 - 3);

    for record in store.list().await.unwrap() {
        assert!(record.batch_progress.is_empty());
        assert_eq!(record.completed.completed().len(), 4);
    }

    let _ = std::fs::remove_file(&path);
    println!("✅ Failed unit resumed without repeating completed work");
}

#[tokio::test]
async fn test_rerun_of_finished_migration_is_a_no_op() {
    let path = std::env::temp_dir().join(format!("vdcmig-e2e-{}.db", uuid::Uuid::new_v4()));
    let url = path.to_str().unwrap().to_string();

    let calls = Arc::new(Calls::default());
    let pool = Arc::new(Mutex::new(
        IpPool::from_ranges(vec!["198.51.100.1-198.51.100.8".parse().unwrap()]).unwrap(),
    ));
    let firewall = Arc::new(ConfigureFirewall {
        calls: calls.clone(),
        flaky_unit: "none",
        armed: AtomicBool::new(false),
    });

    let store = open(&url).await;
    let first = coordinator(store.clone())
        .run(units(), pipeline(&calls, &pool, firewall.clone()))
        .await
        .unwrap();
    assert!(first.is_success());

    let second = coordinator(store)
        .run(units(), pipeline(&calls, &pool, firewall))
        .await
        .unwrap();
    assert!(second.is_success());
    for outcome in &second.outcomes {
        assert!(outcome.executed.is_empty(), "{}: {:?}", outcome.unit_id, outcome.executed);
        assert_eq!(outcome.skipped.len(), 4);
    }
    assert_eq!(calls.gateways.load(Ordering::SeqCst), 3);
    assert_eq!(pool.lock().unwrap().len(), 8 - 3);

    let _ = std::fs::remove_file(&path);
}

/// Records `unit:step`; fails once for `fail_once`
struct Tracked {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    fail_once: Mutex<Option<&'static str>>,
}

impl Tracked {
    fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail_once: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: log.clone(),
            fail_once: Mutex::new(fail_once),
        })
    }
}

#[async_trait]
impl Step for Tracked {
    fn name(&self) -> &str {
        self.name
    }

    async fn forward(&self, unit: &MigrationUnit) -> Result<ContextUpdate> {
        {
            let mut fail_once = self.fail_once.lock().unwrap();
            if *fail_once == Some(unit.id.as_str()) {
                *fail_once = None;
                return Err(AppError::RemoteOperationFailed(format!("{} rejected", self.name)));
            }
        }
        self.log.lock().unwrap().push(format!("{}:{}", unit.id, self.name));
        Ok(ContextUpdate::new().set_value(format!("{}_done", self.name), serde_json::json!(true)))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_middle_step_failure_resumes_only_the_failed_unit() {
    let path = std::env::temp_dir().join(format!("vdcmig-e2e-{}.db", uuid::Uuid::new_v4()));
    let url = path.to_str().unwrap().to_string();
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Arc::new(
        Pipeline::builder()
            .step(Tracked::new("create", &log, None))
            .step(Tracked::new("configure", &log, Some("vdc-2")))
            .step(Tracked::new("connect", &log, None))
            .build()
            .unwrap(),
    );
    let ids = || {
        ["vdc-1", "vdc-2", "vdc-3"]
            .iter()
            .map(|id| MigrationUnit::new(*id, format!("org-{id}")))
            .collect::<Vec<_>>()
    };

    let store = open(&url).await;
    let first = coordinator(store.clone()).run(ids(), pipeline.clone()).await.unwrap();
    assert!(matches!(
        first.outcome("vdc-2").unwrap().status,
        UnitStatus::Failed { ref step, .. } if step == "configure"
    ));
    for id in ["vdc-1", "vdc-3"] {
        let outcome = first.outcome(id).unwrap();
        assert!(outcome.status.is_completed(), "{id}: {}", outcome.status);
        assert_eq!(outcome.executed, vec!["create", "configure", "connect"]);
    }
    let record = store.load("vdc-2").await.unwrap().unwrap();
    assert!(record.is_done("create"));
    assert!(!record.is_done("configure"));
    drop(store);

    let store = open(&url).await;
    let second = coordinator(store).run(ids(), pipeline).await.unwrap();
    assert!(second.is_success(), "{:?}", second.outcomes);
    for id in ["vdc-1", "vdc-3"] {
        let outcome = second.outcome(id).unwrap();
        assert!(outcome.executed.is_empty());
        assert_eq!(outcome.skipped, vec!["create", "configure", "connect"]);
    }
    let resumed = second.outcome("vdc-2").unwrap();
    assert_eq!(resumed.skipped, vec!["create"]);
    assert_eq!(resumed.executed, vec!["configure", "connect"]);

    let log = log.lock().unwrap();
    for id in ["vdc-1", "vdc-2", "vdc-3"] {
        for step in ["create", "configure", "connect"] {
            let entry = format!("{id}:{step}");
            assert_eq!(log.iter().filter(|l| **l == entry).count(), 1, "{entry}");
        }
    }
    drop(log);

    let _ = std::fs::remove_file(&path);
}
