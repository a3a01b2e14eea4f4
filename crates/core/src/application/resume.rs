// Resume planning: which steps a unit will skip or run on the next attempt

use super::pipeline::Pipeline;
use crate::domain::CompletionRegistry;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumePlan {
    /// Steps whose flags are set, in pipeline order
    pub completed: Vec<String>,
    /// Steps that will run, in pipeline order
    pub remaining: Vec<String>,
}

impl ResumePlan {
    pub fn compute(pipeline: &Pipeline, registry: &CompletionRegistry) -> Self {
        Self::from_step_names(&pipeline.step_names(), registry)
    }

    pub fn from_step_names(step_names: &[&str], registry: &CompletionRegistry) -> Self {
        let (completed, remaining): (Vec<&str>, Vec<&str>) =
            step_names.iter().copied().partition(|name| registry.is_done(name));
        Self {
            completed: completed.into_iter().map(str::to_string).collect(),
            remaining: remaining.into_iter().map(str::to_string).collect(),
        }
    }

    /// First step that will actually execute
    pub fn next_step(&self) -> Option<&str> {
        self.remaining.first().map(String::as_str)
    }

    pub fn is_finished(&self) -> bool {
        self.remaining.is_empty()
    }
}
