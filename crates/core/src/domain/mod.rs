// Domain Layer - Pure migration model and address algebra

pub mod checkpoint;
pub mod context;
pub mod error;
pub mod ip;
pub mod task;
pub mod unit;

// Re-exports
pub use checkpoint::{CheckpointRecord, CompletionRegistry};
pub use context::{Context, ContextUpdate};
pub use error::DomainError;
pub use ip::{IpPool, IpRange, Subnet};
pub use task::{AsyncTask, TaskHandle, TaskState};
pub use unit::{MigrationUnit, UnitId, UnitPhase};
