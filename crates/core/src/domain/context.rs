// Unit Context - facts accumulated across steps
//
// Steps never mutate the map directly: they return a ContextUpdate which the
// executor applies under the step's name, so every key carries the step that
// last wrote it and the context version at that time.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One stored value plus its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub value: serde_json::Value,
    pub written_by: String,
    pub version: u64,
}

/// Versioned key/value store owned by a single MigrationUnit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    version: u64,
    entries: BTreeMap<String, ContextEntry>,
    /// Facts copied in from sibling units after a barrier: key -> unit id -> value.
    /// Written only by the coordinator.
    #[serde(default)]
    shared: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incremented once per applied non-empty update
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Typed read. `Ok(None)` when the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> serde_json::Result<Option<T>> {
        match self.entries.get(key) {
            Some(entry) => serde_json::from_value(entry.value.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Name of the step that last wrote `key`
    pub fn written_by(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.written_by.as_str())
    }

    pub fn entry(&self, key: &str) -> Option<&ContextEntry> {
        self.entries.get(key)
    }

    /// Apply a step's update. Returns false if the update was empty.
    pub fn apply(&mut self, step: &str, update: ContextUpdate) -> bool {
        if update.is_empty() {
            return false;
        }
        self.version += 1;
        for key in update.removals {
            self.entries.remove(&key);
        }
        for (key, value) in update.sets {
            self.entries.insert(
                key,
                ContextEntry {
                    value,
                    written_by: step.to_string(),
                    version: self.version,
                },
            );
        }
        true
    }

    /// Per-unit values of `key` contributed by every unit at a barrier
    pub fn shared(&self, key: &str) -> Option<&BTreeMap<String, serde_json::Value>> {
        self.shared.get(key)
    }

    pub fn set_shared(&mut self, key: impl Into<String>, values: BTreeMap<String, serde_json::Value>) {
        self.shared.insert(key.into(), values);
    }
}

/// Changes a step asks to make to its unit's Context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextUpdate {
    sets: BTreeMap<String, serde_json::Value>,
    removals: BTreeSet<String>,
}

impl ContextUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize and record `value` under `key`
    pub fn set<T: Serialize + ?Sized>(self, key: impl Into<String>, value: &T) -> serde_json::Result<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.set_value(key, value))
    }

    pub fn set_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let key = key.into();
        self.removals.remove(&key);
        self.sets.insert(key, value);
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.sets.remove(&key);
        self.removals.insert(key);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.removals.is_empty()
    }
}
