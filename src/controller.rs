//! Per-kind event counting.
//!
//! An [`EventController`] owns one [`EventFeed`], one counter and an epoch captured at
//! construction. Every delivered event whose `lastTimestamp` is strictly after the epoch
//! increments the counter at `{type, reason}`; older events were either counted by a
//! previous instance (before a restart or lease handover) or intentionally excluded.

use std::{fmt, sync::Arc};

use futures::{stream, StreamExt};
use k8s_openapi::{
    api::core::v1::Event,
    chrono::{DateTime, Utc},
};
use kube_client::Client;
use tokio_util::sync::CancellationToken;

use crate::{
    counter::{Counter, CounterRegistry, EventLabels},
    feed::{self, EventFeed, FeedError},
    kind::ResourceKind,
    Error,
};

/// The decision function applied to every delivered event.
#[derive(Clone)]
pub struct Reconciler {
    epoch: DateTime<Utc>,
    counter: Arc<dyn Counter>,
}

impl Reconciler {
    pub fn new(epoch: DateTime<Utc>, counter: Arc<dyn Counter>) -> Self {
        Self { epoch, counter }
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Counts `event` if it last occurred after the epoch.
    ///
    /// Never blocks and never fails; the returned outcome only reports the decision.
    pub fn reconcile(&self, event: &Event) -> Outcome {
        let Some(last) = event.last_timestamp.as_ref() else {
            return Outcome::Malformed(MissingField::LastTimestamp);
        };
        if last.0 <= self.epoch {
            return Outcome::BeforeEpoch;
        }

        let Some(type_) = event.type_.as_deref() else {
            return Outcome::Malformed(MissingField::Type);
        };
        let Some(reason) = event.reason.as_deref() else {
            return Outcome::Malformed(MissingField::Reason);
        };

        self.counter.inc(&EventLabels { type_, reason });
        Outcome::Counted
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// The result of reconciling one event.
///
/// Every outcome is a success: the dispatch loop continues with the next delivery immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The counter was incremented.
    Counted,
    /// The event last occurred at or before the epoch.
    BeforeEpoch,
    /// The event lacks a field required for the decision and was skipped.
    Malformed(MissingField),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Type,
    Reason,
    LastTimestamp,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Type => "type",
            Self::Reason => "reason",
            Self::LastTimestamp => "lastTimestamp",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The feed is open and events are being reconciled.
    Active,
    /// The feed is closed; no further event is reconciled.
    Terminated,
}

/// Counts of reconciliation outcomes over one controller lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub counted: u64,
    pub skipped: u64,
    pub malformed: u64,
}

impl RunStats {
    fn record(&mut self, outcome: Outcome) {
        let slot = match outcome {
            Outcome::Counted => &mut self.counted,
            Outcome::BeforeEpoch => &mut self.skipped,
            Outcome::Malformed(_) => &mut self.malformed,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Why [`EventController::run`] returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The cancellation token was triggered.
    Cancelled(RunStats),
    /// The feed ended without error, e.g. a finite feed from [`feed::from_events`].
    FeedClosed(RunStats),
}

impl Termination {
    pub fn stats(&self) -> RunStats {
        match self {
            Self::Cancelled(stats) | Self::FeedClosed(stats) => *stats,
        }
    }
}

/// Failure of the feed while reconciling; no further events are reconciled.
#[derive(Debug, thiserror::Error)]
#[error("event feed for {kind} failed after {} counted events", .stats.counted)]
pub struct FeedFailure {
    pub kind: ResourceKind,
    pub stats: RunStats,
    #[source]
    pub source: FeedError,
}

/// Counts the events of one resource kind.
pub struct EventController {
    kind: ResourceKind,
    reconciler: Reconciler,
    feed: EventFeed,
    state: State,
}

impl EventController {
    /// Opens the event feed for `kind` and resolves its counter from `counters`.
    ///
    /// The epoch is captured before the feed is opened,
    /// so no event occurring after the watch is open can fall at or before the epoch.
    pub async fn new(
        client: Client,
        kind: ResourceKind,
        counters: &dyn CounterRegistry,
    ) -> Result<Self, Error> {
        let epoch = Utc::now();
        let counter = counters.counter_for(&kind)?;
        let feed = feed::watch(client, &kind).await?;
        log::info!(
            "Started {} with epoch {}",
            kind.controller_name(),
            epoch.to_rfc3339()
        );
        Ok(Self::from_parts(kind, epoch, feed, counter))
    }

    /// Assembles a controller from an already open feed.
    pub fn from_parts(
        kind: ResourceKind,
        epoch: DateTime<Utc>,
        feed: EventFeed,
        counter: Arc<dyn Counter>,
    ) -> Self {
        Self {
            kind,
            reconciler: Reconciler::new(epoch, counter),
            feed,
            state: State::Active,
        }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.reconciler.epoch()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Reconciles events from the feed until it ends or `cancel` is triggered.
    ///
    /// Cancellation takes priority over pending deliveries.
    /// The feed is dropped, closing the watch, before this function returns,
    /// and the controller is [`Terminated`](State::Terminated) from then on:
    /// running it again reconciles nothing.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<Termination, FeedFailure> {
        let name = self.kind.controller_name();
        let mut stats = RunStats::default();
        if self.state == State::Terminated {
            return Ok(Termination::FeedClosed(stats));
        }

        let result = loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(Termination::Cancelled(stats)),
                item = self.feed.next() => item,
            };

            match item {
                Some(Ok(event)) => {
                    let outcome = self.reconciler.reconcile(&event);
                    if let Outcome::Malformed(field) = outcome {
                        log::debug!(
                            "{name}: skipping event {:?} without {field}",
                            event.metadata.name
                        );
                    }
                    stats.record(outcome);
                }
                Some(Err(source)) => {
                    break Err(FeedFailure {
                        kind: self.kind.clone(),
                        stats,
                        source,
                    })
                }
                None => break Ok(Termination::FeedClosed(stats)),
            }
        };

        self.feed = stream::empty().boxed();
        self.state = State::Terminated;
        match &result {
            Ok(termination) => log::info!("{name} terminated: {termination:?}"),
            Err(err) => log::warn!("{name} terminated: {err}"),
        }
        result
    }
}

impl fmt::Debug for EventController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventController")
            .field("kind", &self.kind)
            .field("epoch", &self.reconciler.epoch)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
