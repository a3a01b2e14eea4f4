//! Barrier registry
//!
//! Named rendezvous points for all units of one run, with fail-fast: once any
//! unit reports a fatal failure, every waiter and every later arrival is
//! released with `SiblingFailed` instead of waiting for a unit that will never
//! arrive. An interrupted unit abandons the run and releases waiters with
//! `Interrupted`.
//!
//! Waiters subscribe to a watch channel before checking state, so no wake-up
//! between check and wait is lost.

use crate::domain::UnitId;
use crate::error::{AppError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Facts handed to every unit when a barrier releases: key -> unit id -> value
pub type SharedFacts = BTreeMap<String, BTreeMap<UnitId, Value>>;

#[derive(Default)]
struct RegistryState {
    /// barrier -> unit id -> contributed facts
    arrivals: HashMap<String, BTreeMap<UnitId, BTreeMap<String, Value>>>,
    failed_unit: Option<UnitId>,
    abandoned_by: Option<UnitId>,
}

pub struct BarrierRegistry {
    participants: usize,
    state: Mutex<RegistryState>,
    changed: watch::Sender<u64>,
}

enum Check {
    Released(SharedFacts),
    SiblingFailed,
    Abandoned(UnitId),
    Waiting,
}

impl BarrierRegistry {
    pub fn new(participants: usize) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            participants,
            state: Mutex::new(RegistryState::default()),
            changed,
        }
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("barrier state poisoned".to_string()))
    }

    fn notify(&self) {
        self.changed.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    fn check(&self, state: &RegistryState, barrier: &str) -> Check {
        if let Some(arrived) = state.arrivals.get(barrier) {
            if arrived.len() >= self.participants {
                let mut shared = SharedFacts::new();
                for (unit_id, facts) in arrived {
                    for (key, value) in facts {
                        shared
                            .entry(key.clone())
                            .or_default()
                            .insert(unit_id.clone(), value.clone());
                    }
                }
                return Check::Released(shared);
            }
        }
        if state.failed_unit.is_some() {
            return Check::SiblingFailed;
        }
        if let Some(unit) = &state.abandoned_by {
            return Check::Abandoned(unit.clone());
        }
        Check::Waiting
    }

    /// Arrive at `barrier` and wait until every participant has arrived.
    ///
    /// # Errors
    /// - `SiblingFailed` if any unit failed before the barrier released
    /// - `Interrupted` if a unit abandoned the run
    pub async fn arrive(
        &self,
        barrier: &str,
        unit_id: &str,
        contributions: BTreeMap<String, Value>,
    ) -> Result<SharedFacts> {
        let mut rx = self.changed.subscribe();

        {
            let mut state = self.lock()?;
            if state.failed_unit.is_some() {
                warn!(unit_id = %unit_id, barrier = %barrier, "Sibling already failed, not waiting");
                return Err(AppError::SiblingFailed {
                    unit: unit_id.to_string(),
                    barrier: barrier.to_string(),
                });
            }
            let arrived = state.arrivals.entry(barrier.to_string()).or_default();
            arrived.insert(unit_id.to_string(), contributions);
            debug!(
                unit_id = %unit_id,
                barrier = %barrier,
                arrived = arrived.len(),
                participants = self.participants,
                "Arrived at barrier"
            );
        }
        self.notify();

        loop {
            let outcome = {
                let state = self.lock()?;
                self.check(&state, barrier)
            };
            match outcome {
                Check::Released(shared) => {
                    debug!(unit_id = %unit_id, barrier = %barrier, "Barrier released");
                    return Ok(shared);
                }
                Check::SiblingFailed => {
                    warn!(unit_id = %unit_id, barrier = %barrier, "Released by sibling failure");
                    return Err(AppError::SiblingFailed {
                        unit: unit_id.to_string(),
                        barrier: barrier.to_string(),
                    });
                }
                Check::Abandoned(by) => {
                    warn!(unit_id = %unit_id, barrier = %barrier, abandoned_by = %by, "Barrier abandoned");
                    return Err(AppError::Interrupted(barrier.to_string()));
                }
                Check::Waiting => {}
            }
            if rx.changed().await.is_err() {
                return Err(AppError::Internal("barrier registry dropped".to_string()));
            }
        }
    }

    /// Record a fatal failure and release every waiter. Only the first
    /// failure is kept.
    pub fn fail(&self, unit_id: &str) {
        match self.lock() {
            Ok(mut state) => {
                if state.failed_unit.is_none() {
                    info!(unit_id = %unit_id, "Unit failed, releasing barrier waiters");
                    state.failed_unit = Some(unit_id.to_string());
                }
            }
            Err(e) => warn!(error = %e, "Could not record unit failure"),
        }
        self.notify();
    }

    /// A unit stopped without failing; nobody should wait for it
    pub fn abandon(&self, unit_id: &str) {
        match self.lock() {
            Ok(mut state) => {
                if state.abandoned_by.is_none() {
                    info!(unit_id = %unit_id, "Unit interrupted, abandoning barriers");
                    state.abandoned_by = Some(unit_id.to_string());
                }
            }
            Err(e) => warn!(error = %e, "Could not record abandonment"),
        }
        self.notify();
    }

    /// Unit whose failure tripped fail-fast, if any
    pub fn failed_unit(&self) -> Option<UnitId> {
        self.lock().ok().and_then(|s| s.failed_unit.clone())
    }

    pub fn arrived(&self, barrier: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|s| s.arrivals.get(barrier).map(BTreeMap::len))
            .unwrap_or(0)
    }
}
