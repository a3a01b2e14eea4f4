//! Concurrency coordinator
//!
//! Drives every unit of a run through the shared pipeline on its own task.
//! Units interact only through the barrier registry:
//! - a failed unit trips fail-fast, releasing all barrier waiters
//! - gated steps are not started after a sibling failure; ungated steps are
//! - an interrupted unit abandons its barriers so no sibling waits forever
//!
//! A panic inside a unit's task is reported as that unit's failure.

use super::barrier::BarrierRegistry;
use super::executor::{RollbackStatus, StepExecutor, StepStatus};
use super::panic_guard::describe_join_error;
use super::pipeline::{BarrierSpec, Pipeline, Stage};
use super::resume::ResumePlan;
use super::shutdown::ShutdownToken;
use crate::domain::{MigrationUnit, UnitId, UnitPhase};
use crate::error::{AppError, Result};
use crate::port::IdProvider;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    Completed,
    /// The unit's own step failed
    Failed { step: String, error: String },
    /// Stopped because a sibling failed
    Aborted { reason: String },
    /// Stopped by a shutdown request before `before`
    Interrupted { before: String },
}

impl UnitStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, UnitStatus::Completed)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitStatus::Completed => write!(f, "completed"),
            UnitStatus::Failed { step, error } => write!(f, "failed at {}: {}", step, error),
            UnitStatus::Aborted { reason } => write!(f, "aborted: {}", reason),
            UnitStatus::Interrupted { before } => write!(f, "interrupted before {}", before),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub unit_id: UnitId,
    pub unit_name: String,
    pub status: UnitStatus,
    /// Steps that ran (or were rolled back) in this run, in order
    pub executed: Vec<String>,
    /// Steps skipped because their flag already said so
    pub skipped: Vec<String>,
    /// Final in-memory state; `None` if the unit's task panicked
    pub unit: Option<MigrationUnit>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    /// One outcome per unit, in input order
    pub outcomes: Vec<UnitOutcome>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_completed())
    }

    pub fn outcome(&self, unit_id: &str) -> Option<&UnitOutcome> {
        self.outcomes.iter().find(|o| o.unit_id == unit_id)
    }

    /// Units whose own step failed
    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, UnitStatus::Failed { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Rollback,
}

pub struct ConcurrencyCoordinator {
    executor: Arc<StepExecutor>,
    id_provider: Arc<dyn IdProvider>,
    shutdown: Option<ShutdownToken>,
}

impl ConcurrencyCoordinator {
    pub fn new(executor: Arc<StepExecutor>, id_provider: Arc<dyn IdProvider>) -> Self {
        Self {
            executor,
            id_provider,
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, token: ShutdownToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Run the pipeline forward for every unit concurrently
    pub async fn run(&self, units: Vec<MigrationUnit>, pipeline: Arc<Pipeline>) -> Result<RunReport> {
        self.execute(units, pipeline, Direction::Forward).await
    }

    /// Undo completed steps for every unit, in reverse pipeline order.
    /// Units roll back independently; barriers are not crossed.
    pub async fn rollback(&self, units: Vec<MigrationUnit>, pipeline: Arc<Pipeline>) -> Result<RunReport> {
        self.execute(units, pipeline, Direction::Rollback).await
    }

    async fn execute(
        &self,
        units: Vec<MigrationUnit>,
        pipeline: Arc<Pipeline>,
        direction: Direction,
    ) -> Result<RunReport> {
        let mut seen = HashSet::new();
        for unit in &units {
            if !seen.insert(unit.id.clone()) {
                return Err(AppError::Validation(format!("duplicate unit id: {}", unit.id)));
            }
        }

        let run_id = self.id_provider.generate_id();
        let span = info_span!("migration_run", run_id = %run_id, direction = ?direction);

        async move {
            info!(units = units.len(), stages = pipeline.len(), "Run started");
            let barriers = Arc::new(BarrierRegistry::new(units.len()));

            let mut handles = Vec::with_capacity(units.len());
            for unit in units {
                let worker = UnitWorker {
                    executor: self.executor.clone(),
                    pipeline: pipeline.clone(),
                    barriers: barriers.clone(),
                    shutdown: self.shutdown.clone(),
                };
                let unit_id = unit.id.clone();
                let unit_name = unit.name.clone();
                let unit_span = info_span!("unit", unit_id = %unit_id);
                let guard_barriers = barriers.clone();

                let handle = tokio::spawn(async move {
                    let inner = tokio::spawn(
                        async move {
                            match direction {
                                Direction::Forward => worker.forward(unit).await,
                                Direction::Rollback => worker.reverse(unit).await,
                            }
                        }
                        .instrument(unit_span),
                    );
                    match inner.await {
                        Ok(outcome) => outcome,
                        Err(join_err) => {
                            let message = describe_join_error(join_err);
                            error!(unit_id = %unit_id, error = %message, "Unit task died");
                            guard_barriers.fail(&unit_id);
                            UnitOutcome {
                                unit_id,
                                unit_name,
                                status: UnitStatus::Failed {
                                    step: "<unknown>".to_string(),
                                    error: message,
                                },
                                executed: Vec::new(),
                                skipped: Vec::new(),
                                unit: None,
                            }
                        }
                    }
                });
                handles.push(handle);
            }

            let mut outcomes = Vec::with_capacity(handles.len());
            for handle in handles {
                match handle.await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => return Err(AppError::Internal(format!("unit supervisor lost: {}", e))),
                }
            }

            let completed = outcomes.iter().filter(|o| o.status.is_completed()).count();
            if completed == outcomes.len() {
                info!(completed = completed, "Run finished");
            } else {
                warn!(
                    completed = completed,
                    total = outcomes.len(),
                    "Run finished with incomplete units"
                );
            }
            Ok(RunReport { run_id, outcomes })
        }
        .instrument(span)
        .await
    }
}

struct UnitWorker {
    executor: Arc<StepExecutor>,
    pipeline: Arc<Pipeline>,
    barriers: Arc<BarrierRegistry>,
    shutdown: Option<ShutdownToken>,
}

impl UnitWorker {
    fn interrupted(&self) -> bool {
        self.shutdown.as_ref().is_some_and(ShutdownToken::is_shutdown)
    }

    async fn forward(self, mut unit: MigrationUnit) -> UnitOutcome {
        let mut executed = Vec::new();
        let mut skipped = Vec::new();

        let status = match self.executor.hydrate(&mut unit).await {
            Ok(_) => {
                let plan = ResumePlan::compute(&self.pipeline, &unit.registry);
                info!(
                    completed = plan.completed.len(),
                    remaining = plan.remaining.len(),
                    next_step = plan.next_step().unwrap_or("-"),
                    "Unit started"
                );
                self.drive(&mut unit, &mut executed, &mut skipped).await
            }
            Err(e) => {
                error!(error = %e, "Could not load checkpoint");
                self.barriers.fail(&unit.id);
                UnitStatus::Failed {
                    step: "<checkpoint>".to_string(),
                    error: e.to_string(),
                }
            }
        };

        unit.phase = match &status {
            UnitStatus::Completed => UnitPhase::Completed,
            UnitStatus::Failed { step, error } => UnitPhase::Failed {
                step: step.clone(),
                reason: error.clone(),
            },
            other => UnitPhase::Aborted {
                reason: other.to_string(),
            },
        };
        info!(status = %status, executed = executed.len(), skipped = skipped.len(), "Unit finished");

        UnitOutcome {
            unit_id: unit.id.clone(),
            unit_name: unit.name.clone(),
            status,
            executed,
            skipped,
            unit: Some(unit),
        }
    }

    async fn drive(
        &self,
        unit: &mut MigrationUnit,
        executed: &mut Vec<String>,
        skipped: &mut Vec<String>,
    ) -> UnitStatus {
        for stage in self.pipeline.stages() {
            let name = stage.name();

            if self.interrupted() {
                warn!(before = %name, "Shutdown requested, stopping unit");
                self.barriers.abandon(&unit.id);
                return UnitStatus::Interrupted {
                    before: name.to_string(),
                };
            }

            let result = match stage {
                Stage::Barrier(spec) => match self.cross_barrier(unit, spec).await {
                    Ok(()) => continue,
                    Err(AppError::Interrupted(_)) => {
                        return UnitStatus::Interrupted {
                            before: name.to_string(),
                        }
                    }
                    Err(e) => return UnitStatus::Aborted { reason: e.to_string() },
                },
                _ if stage.is_gated() && !unit.is_done(name) && self.barriers.failed_unit().is_some() => {
                    let reason = AppError::SiblingFailed {
                        unit: unit.id.clone(),
                        barrier: name.to_string(),
                    };
                    warn!(step = %name, "Not starting gated step after sibling failure");
                    return UnitStatus::Aborted {
                        reason: reason.to_string(),
                    };
                }
                Stage::Step { step, .. } => self.executor.run(unit, step.as_ref()).await,
                Stage::Batch { step, .. } => self.executor.run_batch(unit, step.clone()).await,
            };

            match result {
                Ok(StepStatus::Done) => executed.push(name.to_string()),
                Ok(StepStatus::Skipped) => skipped.push(name.to_string()),
                Err(e) => {
                    self.barriers.fail(&unit.id);
                    return UnitStatus::Failed {
                        step: name.to_string(),
                        error: e.to_string(),
                    };
                }
            }
        }
        UnitStatus::Completed
    }

    async fn cross_barrier(&self, unit: &mut MigrationUnit, spec: &BarrierSpec) -> Result<()> {
        unit.phase = UnitPhase::AtBarrier {
            barrier: spec.name.clone(),
        };
        let contributions: BTreeMap<String, serde_json::Value> = spec
            .share_keys
            .iter()
            .filter_map(|key| unit.context.get_value(key).map(|v| (key.clone(), v.clone())))
            .collect();

        info!(barrier = %spec.name, "Waiting at barrier");
        let shared = self.barriers.arrive(&spec.name, &unit.id, contributions).await?;
        for (key, values) in shared {
            unit.context.set_shared(key, values);
        }
        info!(barrier = %spec.name, "Passed barrier");
        Ok(())
    }

    async fn reverse(self, mut unit: MigrationUnit) -> UnitOutcome {
        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let status = match self.executor.hydrate(&mut unit).await {
            Ok(_) => self.unwind(&mut unit, &mut executed, &mut skipped).await,
            Err(e) => UnitStatus::Failed {
                step: "<checkpoint>".to_string(),
                error: e.to_string(),
            },
        };
        info!(status = %status, rolled_back = executed.len(), "Unit rollback finished");

        UnitOutcome {
            unit_id: unit.id.clone(),
            unit_name: unit.name.clone(),
            status,
            executed,
            skipped,
            unit: Some(unit),
        }
    }

    async fn unwind(
        &self,
        unit: &mut MigrationUnit,
        executed: &mut Vec<String>,
        skipped: &mut Vec<String>,
    ) -> UnitStatus {
        for stage in self.pipeline.stages().iter().rev() {
            let name = stage.name();
            if self.interrupted() {
                warn!(before = %name, "Shutdown requested, stopping rollback");
                return UnitStatus::Interrupted {
                    before: name.to_string(),
                };
            }

            let result = match stage {
                Stage::Barrier(_) => continue,
                Stage::Step { step, .. } => self.executor.run_rollback(unit, step.as_ref()).await,
                Stage::Batch { step, .. } => self.executor.run_batch_rollback(unit, step.as_ref()).await,
            };

            match result {
                Ok(RollbackStatus::RolledBack) => executed.push(name.to_string()),
                Ok(RollbackStatus::NotExecuted) => skipped.push(name.to_string()),
                Err(e) => {
                    return UnitStatus::Failed {
                        step: name.to_string(),
                        error: e.to_string(),
                    }
                }
            }
        }
        UnitStatus::Completed
    }
}
