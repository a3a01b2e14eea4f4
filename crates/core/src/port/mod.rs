// Port Layer - Interfaces for external collaborators

pub mod checkpoint_store;
pub mod id_provider; // For deterministic testing
pub mod remote_call;
pub mod step;
pub mod time_provider;

// Re-exports
pub use checkpoint_store::CheckpointStore;
pub use id_provider::IdProvider;
pub use remote_call::{Method, RemoteCall, RemoteError, RemoteRequest, RemoteResponse};
pub use step::{BatchItem, BatchStep, FnStep, Step, StepLibrary};
pub use time_provider::TimeProvider;
