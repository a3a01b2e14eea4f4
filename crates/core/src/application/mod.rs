// Application Layer - Orchestration of migration units

pub mod barrier;
pub mod batch;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod executor;
pub mod lock;
mod panic_guard;
pub mod pipeline;
pub mod poller;
pub mod resume;
pub mod session;
pub mod shutdown;

// Re-exports
pub use barrier::{BarrierRegistry, SharedFacts};
pub use batch::{BatchFailure, BatchReport, ThreadedBatchRunner};
pub use config::OrchestratorConfig;
pub use coordinator::{ConcurrencyCoordinator, RunReport, UnitOutcome, UnitStatus};
pub use executor::{RollbackStatus, StepExecutor, StepStatus};
pub use lock::{ResourceLock, ResourceLockToken};
pub use pipeline::{BarrierSpec, Pipeline, PipelineBuilder, Stage};
pub use poller::AsyncTaskPoller;
pub use resume::ResumePlan;
pub use session::invoke_with_reauth;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
