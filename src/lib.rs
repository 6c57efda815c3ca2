//! kube-event-metrics aggregates Kubernetes events into counters
//! without retaining the events themselves.
//!
//! For each tracked resource kind, an [`EventController`](controller::EventController)
//! watches the events whose involved object is of that kind
//! and increments the counter `<namespace>_<kind>_event_total{type, reason}`
//! once per delivery that occurred after the controller started.
//! Events older than the controller are never counted,
//! so restarts and leader handovers do not double-count.

pub mod config;
pub use config::{events, Config, RestartPolicy};
pub mod controller;
pub mod counter;
pub mod feed;
pub mod kind;
pub use kind::ResourceKind;
mod runner;
pub use runner::{run, run_with, RunError};


/// Errors constructing an event controller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The event watch could not be opened, e.g. due to missing RBAC permissions.
    #[error("failed to watch events of {kind}: {source}")]
    Subscribe {
        kind: ResourceKind,
        #[source]
        source: kube_client::Error,
    },
    /// The counter could not be registered in the metrics registry.
    #[error("failed to register event counter: {0}")]
    Metrics(#[source] prometheus::Error),
}
