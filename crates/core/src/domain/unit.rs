// Migration Unit Domain Model

use super::checkpoint::{CheckpointRecord, CompletionRegistry};
use super::context::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stable identifier of a source workload container (e.g. an org VDC id)
pub type UnitId = String;

/// Where a unit's worker currently is. Replaces ad hoc "has reached X" markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitPhase {
    Pending,
    Running { step: String },
    AtBarrier { barrier: String },
    Completed,
    Failed { step: String, reason: String },
    Aborted { reason: String },
}

impl UnitPhase {
    pub fn is_live(&self) -> bool {
        !matches!(
            self,
            UnitPhase::Failed { .. } | UnitPhase::Aborted { .. } | UnitPhase::Completed
        )
    }
}

impl std::fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitPhase::Pending => write!(f, "PENDING"),
            UnitPhase::Running { step } => write!(f, "RUNNING({})", step),
            UnitPhase::AtBarrier { barrier } => write!(f, "AT_BARRIER({})", barrier),
            UnitPhase::Completed => write!(f, "COMPLETED"),
            UnitPhase::Failed { step, .. } => write!(f, "FAILED({})", step),
            UnitPhase::Aborted { .. } => write!(f, "ABORTED"),
        }
    }
}

/// One workload container being migrated. Owned by exactly one worker.
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    pub id: UnitId,
    pub name: String,
    pub context: Context,
    pub registry: CompletionRegistry,
    pub batch_progress: BTreeMap<String, BTreeSet<String>>,
    pub phase: UnitPhase,
}

impl MigrationUnit {
    pub fn new(id: impl Into<UnitId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            context: Context::new(),
            registry: CompletionRegistry::new(),
            batch_progress: BTreeMap::new(),
            phase: UnitPhase::Pending,
        }
    }

    pub fn is_done(&self, step: &str) -> bool {
        self.registry.is_done(step)
    }

    /// Replace in-memory state with a persisted record
    pub fn restore(&mut self, record: CheckpointRecord) {
        self.registry = record.completed;
        self.context = record.context;
        self.batch_progress = record.batch_progress;
    }

    /// Snapshot for persistence
    pub fn to_record(&self, now_millis: i64) -> CheckpointRecord {
        CheckpointRecord {
            unit_id: self.id.clone(),
            unit_name: self.name.clone(),
            completed: self.registry.clone(),
            context: self.context.clone(),
            batch_progress: self.batch_progress.clone(),
            updated_at: now_millis,
        }
    }
}
