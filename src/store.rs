//! The process-wide result store.
//!
//! [`Store`] owns the [`ResultSet`] and the per-period availability flags
//! behind one read/write lock. The ingestion pipeline is the only writer and
//! holds the exclusive lock for a whole bulk load or a whole period reload;
//! query handlers take the shared lock for the span of one request.
//!
//! The [`Phase`] lives outside that lock so that health checks answer while a
//! bulk load is still running.

use std::collections::BTreeMap;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;

use crate::models::{PeriodId, PeriodResult, ResultSet};

/// Store lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Nothing loaded yet.
    Cold,
    /// Initial bulk load finished; incremental reloads may follow.
    Warm,
}

/// Outcome of looking up a period for reading.
#[derive(Debug)]
pub enum PeriodLookup<'a> {
    /// The period never finished ingesting.
    NotFound,
    /// Flagged available but no entry exists.
    Unavailable,
    Available(&'a PeriodResult),
}

#[derive(Debug)]
pub struct StoreState {
    pub results: ResultSet,
    pub available: BTreeMap<PeriodId, bool>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            results: ResultSet::default(),
            available: BTreeMap::new(),
        }
    }

    /// Replaces the period's entry with a fully built one and marks it
    /// available.
    pub fn install(&mut self, period: PeriodId, result: PeriodResult) {
        self.results.results.insert(period, result);
        self.available.insert(period, true);
    }

    pub fn is_available(&self, period: PeriodId) -> bool {
        self.available.get(&period).copied().unwrap_or(false)
    }

    pub fn lookup(&self, period: PeriodId) -> PeriodLookup<'_> {
        if !self.is_available(period) {
            return PeriodLookup::NotFound;
        }
        match self.results.results.get(&period) {
            Some(result) => PeriodLookup::Available(result),
            None => PeriodLookup::Unavailable,
        }
    }

    /// Available periods in id order.
    pub fn available_periods(&self) -> impl Iterator<Item = (PeriodId, &PeriodResult)> {
        self.available
            .iter()
            .filter(|(_, flag)| **flag)
            .filter_map(|(&id, _)| match self.results.results.get(&id) {
                Some(result) => Some((id, result)),
                None => {
                    tracing::warn!(
                        period = id,
                        "period is marked available but has no result entry"
                    );
                    None
                }
            })
    }
}

/// Shared handle to the store; wrap in `Arc` to share between the
/// pipeline and the server.
#[derive(Debug)]
pub struct Store {
    state: RwLock<StoreState>,
    phase: Mutex<Phase>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::new()),
            phase: Mutex::new(Phase::Cold),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
