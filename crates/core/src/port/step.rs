// Step Library Port
// Migration steps are supplied by the domain layer (gateway creation, network
// creation, firewall configuration, ...). The core only sequences them.

use crate::domain::{ContextUpdate, MigrationUnit};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named, checkpointable forward action with an optional reverse action.
///
/// `forward` runs again whenever its completion flag is false, including after
/// a run that failed midway and left remote state changed. Authors must make it
/// safe to re-invoke in that situation.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Do the work; return the facts to record in the unit's Context
    async fn forward(&self, unit: &MigrationUnit) -> Result<ContextUpdate>;

    fn has_reverse(&self) -> bool {
        false
    }

    /// Undo the work of a completed `forward`
    async fn reverse(&self, _unit: &MigrationUnit) -> Result<()> {
        Err(AppError::NotReversible(self.name().to_string()))
    }
}

/// One independent sub-operation inside a threaded step (e.g. one disk move)
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub id: String,
    pub payload: serde_json::Value,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// A step whose work fans out over independent items run on a bounded pool
#[async_trait]
pub trait BatchStep: Send + Sync {
    fn name(&self) -> &str;

    /// All items this step covers for the unit, completed or not
    async fn items(&self, unit: &MigrationUnit) -> Result<Vec<BatchItem>>;

    /// Process one item. Runs concurrently with other items of the same unit.
    async fn process(&self, unit_id: &str, item: BatchItem) -> Result<()>;

    fn has_reverse(&self) -> bool {
        false
    }

    async fn reverse(&self, _unit: &MigrationUnit) -> Result<()> {
        Err(AppError::NotReversible(self.name().to_string()))
    }
}

type ForwardFn = dyn Fn(&MigrationUnit) -> BoxFuture<'static, Result<ContextUpdate>> + Send + Sync;
type ReverseFn = dyn Fn(&MigrationUnit) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Step built from closures. The closures receive the unit by reference and
/// must clone whatever their future needs.
pub struct FnStep {
    name: String,
    forward: Box<ForwardFn>,
    reverse: Option<Box<ReverseFn>>,
}

impl FnStep {
    pub fn new<F>(name: impl Into<String>, forward: F) -> Self
    where
        F: Fn(&MigrationUnit) -> BoxFuture<'static, Result<ContextUpdate>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            forward: Box::new(forward),
            reverse: None,
        }
    }

    pub fn with_reverse<R>(mut self, reverse: R) -> Self
    where
        R: Fn(&MigrationUnit) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.reverse = Some(Box::new(reverse));
        self
    }
}

#[async_trait]
impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forward(&self, unit: &MigrationUnit) -> Result<ContextUpdate> {
        (self.forward)(unit).await
    }

    fn has_reverse(&self) -> bool {
        self.reverse.is_some()
    }

    async fn reverse(&self, unit: &MigrationUnit) -> Result<()> {
        match &self.reverse {
            Some(reverse) => reverse(unit).await,
            None => Err(AppError::NotReversible(self.name.clone())),
        }
    }
}

/// Registry of named steps supplied by the domain layer
#[derive(Default, Clone)]
pub struct StepLibrary {
    steps: BTreeMap<String, Arc<dyn Step>>,
    batches: BTreeMap<String, Arc<dyn BatchStep>>,
}

impl StepLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step: Arc<dyn Step>) -> &mut Self {
        self.steps.insert(step.name().to_string(), step);
        self
    }

    pub fn register_batch(&mut self, step: Arc<dyn BatchStep>) -> &mut Self {
        self.batches.insert(step.name().to_string(), step);
        self
    }

    pub fn step(&self, name: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(name).cloned()
    }

    pub fn batch(&self, name: &str) -> Option<Arc<dyn BatchStep>> {
        self.batches.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps
            .keys()
            .chain(self.batches.keys())
            .map(String::as_str)
            .collect()
    }
}
