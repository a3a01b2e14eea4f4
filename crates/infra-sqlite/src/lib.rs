// vdcmig Infrastructure - SQLite Adapter
// Implements: CheckpointStore

mod checkpoint_store;
mod connection;
mod error;
mod migration;

pub use checkpoint_store::SqliteCheckpointStore;
pub use connection::create_pool;
pub use migration::run_migrations;
