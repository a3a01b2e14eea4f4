// Checkpoint Domain Model

use super::context::Context;
use super::unit::UnitId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Step name -> completed flag for one unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionRegistry(BTreeMap<String, bool>);

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self, step: &str) -> bool {
        self.0.get(step).copied().unwrap_or(false)
    }

    pub fn mark_done(&mut self, step: &str) {
        self.0.insert(step.to_string(), true);
    }

    pub fn clear(&mut self, step: &str) {
        self.0.insert(step.to_string(), false);
    }

    /// Names of completed steps, sorted
    pub fn completed(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, done)| **done)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Durable snapshot of a unit's completion flags and context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub unit_id: UnitId,
    pub unit_name: String,
    pub completed: CompletionRegistry,
    pub context: Context,
    /// Threaded step name -> ids of items already finished
    #[serde(default)]
    pub batch_progress: BTreeMap<String, BTreeSet<String>>,
    pub updated_at: i64, // epoch ms
}

impl CheckpointRecord {
    pub fn empty(unit_id: impl Into<UnitId>, unit_name: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            unit_name: unit_name.into(),
            completed: CompletionRegistry::new(),
            context: Context::new(),
            batch_progress: BTreeMap::new(),
            updated_at: 0,
        }
    }

    pub fn is_done(&self, step: &str) -> bool {
        self.completed.is_done(step)
    }
}
