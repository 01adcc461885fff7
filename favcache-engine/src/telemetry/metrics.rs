//! Prometheus Metrics Definitions
//!
//! Registered once in the default registry. A registration failure is
//! logged when the first metric is recorded and every later recording
//! becomes a no-op; hydration never depends on metrics.

use favcache_catalog::{CallOutcome, GatewayObserver};
use favcache_core::FreshnessState;
use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder,
};

use crate::tasks::TaskOutcome;

/// Global metrics instance - initialized on first use
pub static METRICS: Lazy<Result<HydrationMetrics, prometheus::Error>> =
    Lazy::new(HydrationMetrics::new);

/// Container for all hydration metrics.
#[derive(Clone)]
pub struct HydrationMetrics {
    /// Cache lookups - labels: state (fresh/refreshable/expired/missing)
    pub cache_lookups_total: IntCounterVec,

    /// Upstream catalog calls - labels: result
    pub upstream_calls_total: IntCounterVec,

    /// Catalog payloads that failed to decode and were served as absent
    pub malformed_payloads_total: IntCounterVec,

    /// Background task terminal outcomes - labels: outcome
    pub background_tasks_total: IntCounterVec,

    /// Catalog calls currently holding a concurrency slot
    pub upstream_in_flight: IntGauge,
}

impl HydrationMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            cache_lookups_total: register_int_counter_vec!(
                "favcache_cache_lookups_total",
                "Cache lookups by freshness state",
                &["state"]
            )?,
            upstream_calls_total: register_int_counter_vec!(
                "favcache_upstream_calls_total",
                "Upstream catalog calls by result",
                &["result"]
            )?,
            malformed_payloads_total: register_int_counter_vec!(
                "favcache_malformed_payloads_total",
                "Catalog payloads mapped to absence after a decode failure",
                &["source"]
            )?,
            background_tasks_total: register_int_counter_vec!(
                "favcache_background_tasks_total",
                "Background tasks by terminal outcome",
                &["outcome"]
            )?,
            upstream_in_flight: register_int_gauge!(
                "favcache_upstream_in_flight",
                "Upstream catalog calls currently in flight"
            )?,
        })
    }

    pub fn record_lookup(&self, state: FreshnessState) {
        self.cache_lookups_total
            .with_label_values(&[state.as_str()])
            .inc();
    }

    pub fn record_task(&self, outcome: TaskOutcome) {
        self.background_tasks_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn record_upstream(&self, outcome: CallOutcome) {
        self.upstream_calls_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        if outcome == CallOutcome::Malformed {
            self.malformed_payloads_total
                .with_label_values(&["catalog"])
                .inc();
        }
    }
}

/// Instance accessor; `None` if registration failed.
pub fn metrics() -> Option<&'static HydrationMetrics> {
    match METRICS.as_ref() {
        Ok(m) => Some(m),
        Err(e) => {
            static REPORTED: std::sync::Once = std::sync::Once::new();
            REPORTED.call_once(|| {
                tracing::warn!(error = %e, "Prometheus metrics unavailable");
            });
            None
        }
    }
}

pub fn record_lookup(state: FreshnessState) {
    if let Some(m) = metrics() {
        m.record_lookup(state);
    }
}

pub fn record_task_outcome(outcome: TaskOutcome) {
    if let Some(m) = metrics() {
        m.record_task(outcome);
    }
}

/// Feeds gateway events straight into [`METRICS`] as they happen.
///
/// Stateless, so any number of gateways and orchestrators may share it
/// without counting an event twice.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusGatewayObserver;

impl GatewayObserver for PrometheusGatewayObserver {
    fn call_started(&self) {
        if let Some(m) = metrics() {
            m.upstream_in_flight.inc();
        }
    }

    fn call_finished(&self) {
        if let Some(m) = metrics() {
            m.upstream_in_flight.dec();
        }
    }

    fn outcome(&self, outcome: CallOutcome) {
        if let Some(m) = metrics() {
            m.record_upstream(outcome);
        }
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        assert!(metrics().is_some());
        record_lookup(FreshnessState::Fresh);
        record_task_outcome(TaskOutcome::Completed);

        let text = render().unwrap();
        assert!(text.contains("favcache_cache_lookups_total"));
        assert!(text.contains("favcache_background_tasks_total"));
    }

    // The only test in this binary touching the upstream series, so the
    // deltas below are exact.
    #[test]
    fn test_observer_records_each_event_once() {
        let m = metrics().unwrap();
        let calls = |result: &str| m.upstream_calls_total.with_label_values(&[result]).get();
        let malformed = || m.malformed_payloads_total.with_label_values(&["catalog"]).get();

        let hits_before = calls("hit");
        let malformed_before = malformed();
        let distinct_before = calls("malformed");
        let in_flight_before = m.upstream_in_flight.get();

        // Two handles on the same stateless observer, as two orchestrators
        // sharing one gateway would hold.
        let first = PrometheusGatewayObserver;
        let second = first;
        first.call_started();
        second.call_started();
        assert_eq!(m.upstream_in_flight.get(), in_flight_before + 2);

        first.outcome(CallOutcome::Hit);
        second.outcome(CallOutcome::Hit);
        first.outcome(CallOutcome::Malformed);
        first.call_finished();
        second.call_finished();

        assert_eq!(calls("hit"), hits_before + 2);
        assert_eq!(calls("malformed"), distinct_before + 1);
        assert_eq!(malformed(), malformed_before + 1);
        assert_eq!(m.upstream_in_flight.get(), in_flight_before);
    }
}
