//! The counter seam between reconciliation and the metrics backend.

use std::sync::Arc;

use crate::{kind::ResourceKind, Error};

pub mod memory;
pub mod prometheus;

/// Label name for the event type, e.g. `Normal` or `Warning`.
pub const LABEL_TYPE: &str = "type";
/// Label name for the event reason, e.g. `BackoffLimitExceeded`.
pub const LABEL_REASON: &str = "reason";

/// The label set identifying one time series of an event counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventLabels<'a> {
    pub type_: &'a str,
    pub reason: &'a str,
}

/// A labeled counter for the events of one resource kind.
///
/// Implementations must tolerate concurrent `inc` calls.
pub trait Counter: Send + Sync {
    /// Increments the series identified by `labels` by one.
    fn inc(&self, labels: &EventLabels<'_>);
}

/// Produces the counter for each tracked resource kind.
pub trait CounterRegistry: Send + Sync {
    /// Returns the counter for `kind`, creating it on first use.
    ///
    /// Repeated calls for the same kind refer to the same series.
    fn counter_for(&self, kind: &ResourceKind) -> Result<Arc<dyn Counter>, Error>;
}

impl<R: CounterRegistry + ?Sized> CounterRegistry for Arc<R> {
    fn counter_for(&self, kind: &ResourceKind) -> Result<Arc<dyn Counter>, Error> {
        (**self).counter_for(kind)
    }
}
