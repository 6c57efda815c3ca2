//! Counters registered in a [`prometheus::Registry`].

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use prometheus::{IntCounterVec, Opts, Registry};

use super::{Counter, CounterRegistry, EventLabels, LABEL_REASON, LABEL_TYPE};
use crate::{kind::ResourceKind, Error};

/// The metric namespace used unless overridden with [`PrometheusCounters::with_namespace`].
pub const DEFAULT_NAMESPACE: &str = "operator";

const EVENT_TOTAL: &str = "event_total";
const EVENT_TOTAL_HELP: &str = "The total number of events for a given type and reason.";

/// Registers one `<namespace>_<kind>_event_total` counter vector per resource kind.
pub struct PrometheusCounters {
    registry: Registry,
    namespace: String,
    counters: Mutex<HashMap<String, IntCounterVec>>,
}

impl PrometheusCounters {
    pub fn new(registry: Registry) -> Self {
        Self::with_namespace(registry, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(registry: Registry, namespace: impl Into<String>) -> Self {
        Self {
            registry,
            namespace: namespace.into(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl CounterRegistry for PrometheusCounters {
    fn counter_for(&self, kind: &ResourceKind) -> Result<Arc<dyn Counter>, Error> {
        let subsystem = kind.metric_subsystem();

        let mut counters = self.counters.lock();
        if let Some(vec) = counters.get(&subsystem) {
            return Ok(Arc::new(vec.clone()));
        }

        let opts = Opts::new(EVENT_TOTAL, EVENT_TOTAL_HELP)
            .namespace(self.namespace.clone())
            .subsystem(subsystem.clone());
        let vec = IntCounterVec::new(opts, &[LABEL_TYPE, LABEL_REASON]).map_err(Error::Metrics)?;
        self.registry
            .register(Box::new(vec.clone()))
            .map_err(Error::Metrics)?;
        log::debug!("Registered event counter for {kind}");

        counters.insert(subsystem, vec.clone());
        Ok(Arc::new(vec))
    }
}

impl Counter for IntCounterVec {
    fn inc(&self, labels: &EventLabels<'_>) {
        self.with_label_values(&[labels.type_, labels.reason]).inc();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use prometheus::Registry;

    use super::PrometheusCounters;
    use crate::{
        counter::{CounterRegistry, EventLabels},
        kind::ResourceKind,
    };

    fn sample(registry: &Registry, name: &str, type_: &str, reason: &str) -> Option<u64> {
        registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)?
            .get_metric()
            .iter()
            .find(|metric| {
                let labels = metric.get_label();
                labels
                    .iter()
                    .any(|pair| pair.get_name() == "type" && pair.get_value() == type_)
                    && labels
                        .iter()
                        .any(|pair| pair.get_name() == "reason" && pair.get_value() == reason)
            })
            .map(|metric| metric.get_counter().get_value() as u64)
    }

    #[test]
    fn name_derives_from_lowercased_kind() {
        let registry = Registry::new();
        let counters = PrometheusCounters::new(registry.clone());
        let counter = counters
            .counter_for(&ResourceKind::new("batch", "v1", "Job"))
            .unwrap();

        counter.inc(&EventLabels {
            type_: "Warning",
            reason: "BackoffLimitExceeded",
        });

        assert_eq!(
            sample(
                &registry,
                "operator_job_event_total",
                "Warning",
                "BackoffLimitExceeded"
            ),
            Some(1)
        );
    }

    #[test]
    fn repeated_lookup_shares_series() {
        let registry = Registry::new();
        let counters = PrometheusCounters::with_namespace(registry.clone(), "karpenter");
        let kind = ResourceKind::new("", "v1", "Node");

        let first = counters.counter_for(&kind).unwrap();
        let second = counters.counter_for(&kind).unwrap();
        let labels = EventLabels {
            type_: "Normal",
            reason: "Ready",
        };
        first.inc(&labels);
        second.inc(&labels);

        assert_eq!(
            sample(&registry, "karpenter_node_event_total", "Normal", "Ready"),
            Some(2)
        );
    }

    #[test]
    fn kinds_are_registered_separately() {
        let registry = Registry::new();
        let counters = PrometheusCounters::new(registry.clone());
        let pod = counters.counter_for(&ResourceKind::new("", "v1", "Pod")).unwrap();
        counters.counter_for(&ResourceKind::new("", "v1", "Node")).unwrap();

        pod.inc(&EventLabels {
            type_: "Warning",
            reason: "Evicted",
        });

        assert_eq!(
            sample(&registry, "operator_pod_event_total", "Warning", "Evicted"),
            Some(1)
        );
        assert_eq!(
            sample(&registry, "operator_node_event_total", "Warning", "Evicted"),
            None
        );
    }

    #[test]
    fn shared_counters_through_arc() {
        let counters = Arc::new(PrometheusCounters::new(Registry::new()));
        let registry: &dyn CounterRegistry = &counters;

        registry
            .counter_for(&ResourceKind::new("", "v1", "Pod"))
            .unwrap()
            .inc(&EventLabels {
                type_: "Warning",
                reason: "Evicted",
            });

        assert_eq!(
            sample(
                counters.registry(),
                "operator_pod_event_total",
                "Warning",
                "Evicted"
            ),
            Some(1)
        );
    }
}
