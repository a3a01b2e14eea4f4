//! Step executor
//!
//! Runs one step of one unit under checkpoint discipline:
//! - a step whose flag is set is skipped without invoking it
//! - the flag is set and persisted only after `forward` succeeds, and before
//!   the next step starts
//! - on failure the context is persisted, the flag stays unset and the error
//!   propagates unchanged
//!
//! Rollback mirrors this: the flag is cleared only after `reverse` succeeds.

use super::batch::ThreadedBatchRunner;
use crate::domain::{MigrationUnit, UnitPhase};
use crate::error::{AppError, Result};
use crate::port::{BatchItem, BatchStep, CheckpointStore, Step, TimeProvider};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// `forward` ran and its completion was persisted
    Done,
    /// Flag already set; `forward` was not invoked
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStatus {
    RolledBack,
    /// Step never completed; nothing to undo
    NotExecuted,
}

pub struct StepExecutor {
    store: Arc<dyn CheckpointStore>,
    time_provider: Arc<dyn TimeProvider>,
    batch_runner: ThreadedBatchRunner,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        time_provider: Arc<dyn TimeProvider>,
        batch_width: usize,
    ) -> Self {
        Self {
            store,
            time_provider,
            batch_runner: ThreadedBatchRunner::new(batch_width),
        }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Load the unit's persisted flags and context. Returns false if the unit
    /// has no record yet (first run).
    pub async fn hydrate(&self, unit: &mut MigrationUnit) -> Result<bool> {
        match self.store.load(&unit.id).await? {
            Some(record) => {
                info!(
                    unit_id = %unit.id,
                    completed = record.completed.completed().len(),
                    "Restored checkpoint"
                );
                unit.restore(record);
                Ok(true)
            }
            None => {
                debug!(unit_id = %unit.id, "No checkpoint, starting fresh");
                Ok(false)
            }
        }
    }

    /// Persist the unit's current flags and context
    pub async fn persist(&self, unit: &MigrationUnit) -> Result<()> {
        let record = unit.to_record(self.time_provider.now_millis());
        self.store.save(&record).await
    }

    /// Persist after a failure. The step's own error wins over a save error.
    async fn persist_after_failure(&self, unit: &MigrationUnit, step: &str) {
        if let Err(e) = self.persist(unit).await {
            warn!(unit_id = %unit.id, step = %step, error = %e, "Failed to persist context after step failure");
        }
    }

    /// Flag is set in memory only; make it durable or take it back
    async fn commit_done(&self, unit: &mut MigrationUnit, step: &str) -> Result<()> {
        unit.registry.mark_done(step);
        if let Err(e) = self.persist(unit).await {
            unit.registry.clear(step);
            error!(unit_id = %unit.id, step = %step, error = %e, "Failed to persist step completion");
            return Err(e);
        }
        Ok(())
    }

    pub async fn run(&self, unit: &mut MigrationUnit, step: &dyn Step) -> Result<StepStatus> {
        let name = step.name();
        if unit.is_done(name) {
            debug!(unit_id = %unit.id, step = %name, "Step already done, skipping");
            return Ok(StepStatus::Skipped);
        }

        unit.phase = UnitPhase::Running {
            step: name.to_string(),
        };
        info!(unit_id = %unit.id, step = %name, "Running step");

        match step.forward(unit).await {
            Ok(update) => {
                unit.context.apply(name, update);
                self.commit_done(unit, name).await?;
                info!(unit_id = %unit.id, step = %name, "Step completed");
                Ok(StepStatus::Done)
            }
            Err(e) => {
                error!(unit_id = %unit.id, step = %name, error = %e, "Step failed");
                self.persist_after_failure(unit, name).await;
                Err(e)
            }
        }
    }

    /// Run a threaded step. Items finished in an earlier attempt are not
    /// re-run; the step completes only when every item has succeeded.
    pub async fn run_batch(&self, unit: &mut MigrationUnit, step: Arc<dyn BatchStep>) -> Result<StepStatus> {
        let name = step.name().to_string();
        if unit.is_done(&name) {
            debug!(unit_id = %unit.id, step = %name, "Step already done, skipping");
            return Ok(StepStatus::Skipped);
        }

        unit.phase = UnitPhase::Running { step: name.clone() };

        let items = match step.items(unit).await {
            Ok(items) => items,
            Err(e) => {
                error!(unit_id = %unit.id, step = %name, error = %e, "Failed to list batch items");
                self.persist_after_failure(unit, &name).await;
                return Err(e);
            }
        };
        let total = items.len();
        let finished = unit.batch_progress.get(&name).cloned().unwrap_or_default();
        let pending: Vec<(String, BatchItem)> = items
            .into_iter()
            .filter(|item| !finished.contains(&item.id))
            .map(|item| (item.id.clone(), item))
            .collect();

        info!(
            unit_id = %unit.id,
            step = %name,
            total = total,
            pending = pending.len(),
            width = self.batch_runner.width(),
            "Running threaded step"
        );

        let unit_id = unit.id.clone();
        let worker = step.clone();
        let report = self
            .batch_runner
            .run(pending, move |item| {
                let step = worker.clone();
                let unit_id = unit_id.clone();
                async move { step.process(&unit_id, item).await }
            })
            .await;

        if report.is_success() {
            let mut progress = unit.batch_progress.remove(&name).unwrap_or_default();
            if let Err(e) = self.commit_done(unit, &name).await {
                // Keep finished items so a retry only repeats the save
                progress.extend(report.succeeded);
                unit.batch_progress.insert(name, progress);
                return Err(e);
            }
            info!(unit_id = %unit.id, step = %name, "Step completed");
            return Ok(StepStatus::Done);
        }

        unit.batch_progress
            .entry(name.clone())
            .or_default()
            .extend(report.succeeded.iter().cloned());
        self.persist_after_failure(unit, &name).await;

        let first_error = report
            .failed
            .first()
            .map(|f| format!("{}: {}", f.item, f.error))
            .unwrap_or_default();
        error!(
            unit_id = %unit.id,
            step = %name,
            failed = report.failed.len(),
            "Threaded step failed"
        );
        Err(AppError::BatchFailed {
            step: name,
            failed: report.failed.len(),
            total,
            first_error,
        })
    }

    /// Undo a completed step. A step without a reverse action only has its
    /// flag cleared.
    pub async fn run_rollback(&self, unit: &mut MigrationUnit, step: &dyn Step) -> Result<RollbackStatus> {
        let name = step.name();
        if !unit.is_done(name) {
            debug!(unit_id = %unit.id, step = %name, "Step never completed, nothing to roll back");
            return Ok(RollbackStatus::NotExecuted);
        }

        if step.has_reverse() {
            info!(unit_id = %unit.id, step = %name, "Rolling back step");
            if let Err(e) = step.reverse(unit).await {
                error!(unit_id = %unit.id, step = %name, error = %e, "Rollback failed");
                return Err(e);
            }
        } else {
            info!(unit_id = %unit.id, step = %name, "Step has no reverse action, clearing flag");
        }

        self.commit_cleared(unit, name).await?;
        Ok(RollbackStatus::RolledBack)
    }

    pub async fn run_batch_rollback(&self, unit: &mut MigrationUnit, step: &dyn BatchStep) -> Result<RollbackStatus> {
        let name = step.name();
        if !unit.is_done(name) && !unit.batch_progress.contains_key(name) {
            debug!(unit_id = %unit.id, step = %name, "Step never ran, nothing to roll back");
            return Ok(RollbackStatus::NotExecuted);
        }

        if step.has_reverse() {
            info!(unit_id = %unit.id, step = %name, "Rolling back threaded step");
            if let Err(e) = step.reverse(unit).await {
                error!(unit_id = %unit.id, step = %name, error = %e, "Rollback failed");
                return Err(e);
            }
        }

        unit.batch_progress.remove(name);
        self.commit_cleared(unit, name).await?;
        Ok(RollbackStatus::RolledBack)
    }

    async fn commit_cleared(&self, unit: &mut MigrationUnit, step: &str) -> Result<()> {
        unit.registry.clear(step);
        if let Err(e) = self.persist(unit).await {
            unit.registry.mark_done(step);
            error!(unit_id = %unit.id, step = %step, error = %e, "Failed to persist rollback");
            return Err(e);
        }
        info!(unit_id = %unit.id, step = %step, "Step rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContextUpdate;
    use crate::port::checkpoint_store::mocks::InMemoryCheckpointStore;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use crate::port::FnStep;
    use async_trait::async_trait;
    use futures::FutureExt;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn executor(store: Arc<InMemoryCheckpointStore>) -> StepExecutor {
        StepExecutor::new(store, Arc::new(FixedTimeProvider::new(1_000)), 4)
    }

    fn counting_step(name: &str, calls: Arc<AtomicUsize>) -> FnStep {
        FnStep::new(name, move |_unit| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                ContextUpdate::new()
                    .set("edge_gateway_id", "gw-42")
                    .map_err(AppError::from)
            }
            .boxed()
        })
    }

    fn failing_step(name: &str) -> FnStep {
        FnStep::new(name, |_unit| {
            async { Err(AppError::RemoteOperationFailed("quota exceeded".to_string())) }.boxed()
        })
    }

    #[tokio::test]
    async fn test_completed_step_is_skipped() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let exec = executor(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let step = counting_step("createEdgeGateway", calls.clone());

        let mut unit = MigrationUnit::new("vdc-1", "Finance");
        assert_eq!(exec.run(&mut unit, &step).await.unwrap(), StepStatus::Done);
        assert_eq!(exec.run(&mut unit, &step).await.unwrap(), StepStatus::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completion_is_durable_before_next_step() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let exec = executor(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let step = counting_step("createEdgeGateway", calls);

        let mut unit = MigrationUnit::new("vdc-1", "Finance");
        exec.run(&mut unit, &step).await.unwrap();

        let record = store.get("vdc-1").unwrap();
        assert!(record.is_done("createEdgeGateway"));
        assert_eq!(
            record.context.get::<String>("edge_gateway_id").unwrap().as_deref(),
            Some("gw-42")
        );
        assert_eq!(record.context.written_by("edge_gateway_id"), Some("createEdgeGateway"));
        assert_eq!(record.updated_at, 1_000);
    }

    #[tokio::test]
    async fn test_hydrated_unit_skips_completed_steps() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let step = counting_step("createEdgeGateway", calls.clone());

        let mut first = MigrationUnit::new("vdc-1", "Finance");
        executor(store.clone()).run(&mut first, &step).await.unwrap();

        // New process, same store
        let exec = executor(store.clone());
        let mut unit = MigrationUnit::new("vdc-1", "Finance");
        assert!(exec.hydrate(&mut unit).await.unwrap());
        assert_eq!(exec.run(&mut unit, &step).await.unwrap(), StepStatus::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_flag_unset_and_propagates() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let exec = executor(store.clone());
        let mut unit = MigrationUnit::new("vdc-1", "Finance");

        let err = exec.run(&mut unit, &failing_step("createOrgVdcNetworks")).await.unwrap_err();
        assert!(matches!(err, AppError::RemoteOperationFailed(ref m) if m == "quota exceeded"));
        assert!(!unit.is_done("createOrgVdcNetworks"));
        assert!(!store.get("vdc-1").unwrap().is_done("createOrgVdcNetworks"));
    }

    #[tokio::test]
    async fn test_save_failure_keeps_step_pending() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        store.set_fail_saves(true);
        let exec = executor(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let step = counting_step("createEdgeGateway", calls.clone());
        let mut unit = MigrationUnit::new("vdc-1", "Finance");

        let err = exec.run(&mut unit, &step).await.unwrap_err();
        assert!(matches!(err, AppError::Checkpoint(_)));
        assert!(!unit.is_done("createEdgeGateway"));

        store.set_fail_saves(false);
        assert_eq!(exec.run(&mut unit, &step).await.unwrap(), StepStatus::Done);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rollback_of_never_executed_step_is_noop() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let exec = executor(store.clone());
        let reversed = Arc::new(AtomicUsize::new(0));
        let r = reversed.clone();
        let step = counting_step("createEdgeGateway", Arc::new(AtomicUsize::new(0))).with_reverse(move |_| {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });

        let mut unit = MigrationUnit::new("vdc-1", "Finance");
        assert_eq!(
            exec.run_rollback(&mut unit, &step).await.unwrap(),
            RollbackStatus::NotExecuted
        );
        assert_eq!(reversed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rollback_clears_flag_after_reverse() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let exec = executor(store.clone());
        let reversed = Arc::new(AtomicUsize::new(0));
        let r = reversed.clone();
        let step = counting_step("createEdgeGateway", Arc::new(AtomicUsize::new(0))).with_reverse(move |_| {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });

        let mut unit = MigrationUnit::new("vdc-1", "Finance");
        exec.run(&mut unit, &step).await.unwrap();
        assert_eq!(
            exec.run_rollback(&mut unit, &step).await.unwrap(),
            RollbackStatus::RolledBack
        );
        assert_eq!(reversed.load(Ordering::SeqCst), 1);
        assert!(!store.get("vdc-1").unwrap().is_done("createEdgeGateway"));
    }

    #[tokio::test]
    async fn test_failed_reverse_keeps_flag() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let exec = executor(store.clone());
        let step = counting_step("createEdgeGateway", Arc::new(AtomicUsize::new(0))).with_reverse(|_| {
            async { Err(AppError::RemoteOperationFailed("gateway in use".to_string())) }.boxed()
        });

        let mut unit = MigrationUnit::new("vdc-1", "Finance");
        exec.run(&mut unit, &step).await.unwrap();
        assert!(exec.run_rollback(&mut unit, &step).await.is_err());
        assert!(unit.is_done("createEdgeGateway"));
        assert!(store.get("vdc-1").unwrap().is_done("createEdgeGateway"));
    }

    #[tokio::test]
    async fn test_rollback_without_reverse_clears_flag() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let exec = executor(store.clone());
        let step = counting_step("prepareTargetVdc", Arc::new(AtomicUsize::new(0)));

        let mut unit = MigrationUnit::new("vdc-1", "Finance");
        exec.run(&mut unit, &step).await.unwrap();
        assert_eq!(
            exec.run_rollback(&mut unit, &step).await.unwrap(),
            RollbackStatus::RolledBack
        );
        assert!(!unit.is_done("prepareTargetVdc"));
    }

    /// Moves disks; fails the ids listed in `fail` once each
    struct DiskMoves {
        ids: Vec<&'static str>,
        fail: Mutex<BTreeSet<String>>,
        processed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BatchStep for DiskMoves {
        fn name(&self) -> &str {
            "moveNamedDisks"
        }

        async fn items(&self, _unit: &MigrationUnit) -> Result<Vec<BatchItem>> {
            Ok(self
                .ids
                .iter()
                .map(|id| BatchItem::new(*id, json!({ "disk": id })))
                .collect())
        }

        async fn process(&self, _unit_id: &str, item: BatchItem) -> Result<()> {
            self.processed.lock().unwrap().push(item.id.clone());
            if self.fail.lock().unwrap().remove(&item.id) {
                return Err(AppError::RemoteOperationFailed(format!("{} busy", item.id)));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_batch_resumes_only_unfinished_items() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let exec = executor(store.clone());
        let step = Arc::new(DiskMoves {
            ids: vec!["d1", "d2", "d3", "d4"],
            fail: Mutex::new(["d3".to_string()].into_iter().collect()),
            processed: Mutex::new(Vec::new()),
        });

        let mut unit = MigrationUnit::new("vdc-1", "Finance");
        let err = exec.run_batch(&mut unit, step.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::BatchFailed { failed: 1, total: 4, .. }));
        assert!(!unit.is_done("moveNamedDisks"));

        let persisted = store.get("vdc-1").unwrap();
        assert_eq!(persisted.batch_progress["moveNamedDisks"].len(), 3);

        step.processed.lock().unwrap().clear();
        assert_eq!(exec.run_batch(&mut unit, step.clone()).await.unwrap(), StepStatus::Done);
        assert_eq!(*step.processed.lock().unwrap(), vec!["d3".to_string()]);
        assert!(unit.batch_progress.is_empty());
        assert!(store.get("vdc-1").unwrap().is_done("moveNamedDisks"));
    }

    #[tokio::test]
    async fn test_batch_progress_survives_failed_completion_save() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let exec = executor(store.clone());
        let step = Arc::new(DiskMoves {
            ids: vec!["d1", "d2", "d3"],
            fail: Mutex::new(["d2".to_string()].into_iter().collect()),
            processed: Mutex::new(Vec::new()),
        });
        let mut unit = MigrationUnit::new("vdc-1", "Finance");
        tokio_test::assert_err!(exec.run_batch(&mut unit, step.clone()).await);

        // d2 now succeeds but the completion save does not
        store.set_fail_saves(true);
        let err = exec.run_batch(&mut unit, step.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Checkpoint(_)));
        assert!(!unit.is_done("moveNamedDisks"));
        assert_eq!(unit.batch_progress["moveNamedDisks"].len(), 3);

        store.set_fail_saves(false);
        step.processed.lock().unwrap().clear();
        assert_eq!(exec.run_batch(&mut unit, step.clone()).await.unwrap(), StepStatus::Done);
        assert!(step.processed.lock().unwrap().is_empty());
        assert!(unit.batch_progress.is_empty());
    }
}
