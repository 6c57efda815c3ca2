//! In-process counters, for tests and for embedding without a metrics backend.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use super::{Counter, CounterRegistry, EventLabels};
use crate::{kind::ResourceKind, Error};

type Series = HashMap<(String, String), u64>;

/// Counters held in memory, keyed by lower-cased kind like the Prometheus backend.
#[derive(Default, Clone)]
pub struct MemoryCounters {
    counters: Arc<Mutex<HashMap<String, Arc<MemoryCounter>>>>,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current value of one series, zero if it was never incremented.
    pub fn get(&self, kind: &ResourceKind, type_: &str, reason: &str) -> u64 {
        self.counters
            .lock()
            .get(&kind.metric_subsystem())
            .map_or(0, |counter| counter.get(type_, reason))
    }

    /// The sum over all series of `kind`.
    pub fn total(&self, kind: &ResourceKind) -> u64 {
        self.counters
            .lock()
            .get(&kind.metric_subsystem())
            .map_or(0, |counter| counter.series.lock().values().sum())
    }
}

impl CounterRegistry for MemoryCounters {
    fn counter_for(&self, kind: &ResourceKind) -> Result<Arc<dyn Counter>, Error> {
        let counter: Arc<dyn Counter> = self
            .counters
            .lock()
            .entry(kind.metric_subsystem())
            .or_default()
            .clone();
        Ok(counter)
    }
}

#[derive(Default)]
struct MemoryCounter {
    series: Mutex<Series>,
}

impl MemoryCounter {
    fn get(&self, type_: &str, reason: &str) -> u64 {
        self.series
            .lock()
            .get(&(type_.to_owned(), reason.to_owned()))
            .copied()
            .unwrap_or(0)
    }
}

impl Counter for MemoryCounter {
    fn inc(&self, labels: &EventLabels<'_>) {
        *self
            .series
            .lock()
            .entry((labels.type_.to_owned(), labels.reason.to_owned()))
            .or_insert(0) += 1;
    }
}
