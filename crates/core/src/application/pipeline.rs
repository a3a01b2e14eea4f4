// Migration Pipeline
// Ordered stages shared by every unit of a run.

use crate::domain::DomainError;
use crate::error::Result;
use crate::port::{BatchStep, Step, StepLibrary};
use std::collections::HashSet;
use std::sync::Arc;

/// A synchronization point. Facts listed in `share_keys` are collected from
/// every unit's context on arrival and handed to all units on release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierSpec {
    pub name: String,
    pub share_keys: Vec<String>,
}

#[derive(Clone)]
pub enum Stage {
    /// `gated` steps are not started once any unit of the run has failed
    Step { step: Arc<dyn Step>, gated: bool },
    Batch { step: Arc<dyn BatchStep>, gated: bool },
    Barrier(BarrierSpec),
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Stage::Step { step, .. } => step.name(),
            Stage::Batch { step, .. } => step.name(),
            Stage::Barrier(spec) => &spec.name,
        }
    }

    pub fn is_gated(&self) -> bool {
        match self {
            Stage::Step { gated, .. } | Stage::Batch { gated, .. } => *gated,
            Stage::Barrier(_) => true,
        }
    }

    pub fn is_barrier(&self) -> bool {
        matches!(self, Stage::Barrier(_))
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Step { gated, .. } => write!(f, "Step({}, gated={})", self.name(), gated),
            Stage::Batch { gated, .. } => write!(f, "Batch({}, gated={})", self.name(), gated),
            Stage::Barrier(spec) => write!(f, "Barrier({})", spec.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Names of checkpointed steps in execution order (barriers excluded)
    pub fn step_names(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| !s.is_barrier())
            .map(Stage::name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[derive(Default, Debug)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn step(mut self, step: Arc<dyn Step>) -> Self {
        self.stages.push(Stage::Step { step, gated: false });
        self
    }

    pub fn gated_step(mut self, step: Arc<dyn Step>) -> Self {
        self.stages.push(Stage::Step { step, gated: true });
        self
    }

    pub fn batch(mut self, step: Arc<dyn BatchStep>) -> Self {
        self.stages.push(Stage::Batch { step, gated: false });
        self
    }

    pub fn gated_batch(mut self, step: Arc<dyn BatchStep>) -> Self {
        self.stages.push(Stage::Batch { step, gated: true });
        self
    }

    pub fn barrier(self, name: impl Into<String>) -> Self {
        self.barrier_sharing(name, &[])
    }

    pub fn barrier_sharing(mut self, name: impl Into<String>, share_keys: &[&str]) -> Self {
        self.stages.push(Stage::Barrier(BarrierSpec {
            name: name.into(),
            share_keys: share_keys.iter().map(|k| k.to_string()).collect(),
        }));
        self
    }

    /// Append a step (plain or threaded) looked up by name
    pub fn named(self, library: &StepLibrary, name: &str, gated: bool) -> Result<Self> {
        if let Some(step) = library.step(name) {
            return Ok(if gated { self.gated_step(step) } else { self.step(step) });
        }
        if let Some(step) = library.batch(name) {
            return Ok(if gated { self.gated_batch(step) } else { self.batch(step) });
        }
        Err(DomainError::UnknownStep(name.to_string()).into())
    }

    /// Stage names must be non-empty and unique: they key checkpoint flags
    pub fn build(self) -> Result<Pipeline> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            let name = stage.name();
            if name.trim().is_empty() {
                return Err(DomainError::ValidationError("stage name must not be empty".to_string()).into());
            }
            if !seen.insert(name.to_string()) {
                return Err(DomainError::ValidationError(format!("duplicate stage name: {}", name)).into());
            }
        }
        Ok(Pipeline { stages: self.stages })
    }
}
