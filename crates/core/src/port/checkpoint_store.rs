// Checkpoint Store Port (Interface)

use crate::domain::CheckpointRecord;
use crate::error::Result;
use async_trait::async_trait;

/// Durable storage for per-unit checkpoint records.
///
/// Must survive process restarts. `save` must be atomic from the point of view
/// of a later `load`: a reader sees either the previous or the new record.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the latest record for a unit (`None` if the unit never ran)
    async fn load(&self, unit_id: &str) -> Result<Option<CheckpointRecord>>;

    /// Persist (insert or replace) a unit's record
    async fn save(&self, record: &CheckpointRecord) -> Result<()>;

    /// All stored records, ordered by unit id
    async fn list(&self) -> Result<Vec<CheckpointRecord>>;

    /// Remove a unit's record. Returns false if none existed.
    async fn delete(&self, unit_id: &str) -> Result<bool>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Process-local store. Cloning records on the way in and out mimics a
    /// real serialization boundary.
    #[derive(Default)]
    pub struct InMemoryCheckpointStore {
        records: Mutex<BTreeMap<String, CheckpointRecord>>,
        save_count: AtomicUsize,
        fail_saves: AtomicBool,
    }

    impl InMemoryCheckpointStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn save_count(&self) -> usize {
            self.save_count.load(Ordering::SeqCst)
        }

        /// Make every following save fail
        pub fn set_fail_saves(&self, fail: bool) {
            self.fail_saves.store(fail, Ordering::SeqCst);
        }

        pub fn get(&self, unit_id: &str) -> Option<CheckpointRecord> {
            self.records.lock().unwrap().get(unit_id).cloned()
        }
    }

    #[async_trait]
    impl CheckpointStore for InMemoryCheckpointStore {
        async fn load(&self, unit_id: &str) -> Result<Option<CheckpointRecord>> {
            Ok(self.records.lock().unwrap().get(unit_id).cloned())
        }

        async fn save(&self, record: &CheckpointRecord) -> Result<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(AppError::Checkpoint("store unavailable".to_string()));
            }
            self.save_count.fetch_add(1, Ordering::SeqCst);
            self.records
                .lock()
                .unwrap()
                .insert(record.unit_id.clone(), record.clone());
            Ok(())
        }

        async fn list(&self) -> Result<Vec<CheckpointRecord>> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }

        async fn delete(&self, unit_id: &str) -> Result<bool> {
            Ok(self.records.lock().unwrap().remove(unit_id).is_some())
        }
    }
}
