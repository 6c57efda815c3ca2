use std::time::Duration;

use kube_core::Resource;

use crate::kind::ResourceKind;

/// Parameters for [`run`](crate::run).
#[derive(Debug, Clone, Default)]
pub struct Config {
    kinds: Vec<ResourceKind>,
    restart: RestartPolicy,
}

/// Starts a config with no tracked kinds.
pub fn events() -> Config {
    Config::default()
}

impl Config {
    /// Tracks the events of the statically typed resource `K`.
    pub fn track<K: Resource<DynamicType = ()>>(self) -> Self {
        self.track_kind(ResourceKind::of::<K>())
    }

    /// Tracks the events of `kind`.
    ///
    /// Tracking a kind twice has no effect, since each kind has exactly one controller.
    pub fn track_kind(mut self, kind: ResourceKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    /// Sets the behavior when the feed of a kind terminates.
    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    pub fn kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.restart
    }
}

/// What to do when the event feed of a kind ends or fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Stop counting the kind. A feed failure is returned from [`run`](crate::run).
    #[default]
    Never,
    /// Open a new feed after `backoff` with a new controller and a fresh epoch.
    ///
    /// Events that occurred while no feed was open are not counted.
    FreshEpoch { backoff: Duration },
}
