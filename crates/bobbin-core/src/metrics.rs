//! Request counters and response-time average.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

/// Weight of a new sample in the response-time average. A moving average on
/// purpose: recent latency matters more than the session mean.
const EMA_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Counters {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub deduplicated: u64,
    pub cancelled: u64,
}

/// Orchestrator-wide metrics. Reset only by `clear()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    #[serde(flatten)]
    pub counters: Counters,
    pub circuit_rejections: u64,
    pub avg_response_ms: f64,
    /// Same counters, tagged by namespace.
    pub namespaces: BTreeMap<String, Counters>,
}

impl Metrics {
    pub fn record_submitted(&mut self, namespace: &str) {
        self.bump(namespace, |c| c.total += 1);
    }

    pub fn record_success(&mut self, namespace: &str, elapsed: Duration) {
        self.bump(namespace, |c| c.succeeded += 1);
        let sample = elapsed.as_secs_f64() * 1_000.0;
        self.avg_response_ms = self.avg_response_ms * (1.0 - EMA_WEIGHT) + sample * EMA_WEIGHT;
    }

    pub fn record_failure(&mut self, namespace: &str) {
        self.bump(namespace, |c| c.failed += 1);
    }

    pub fn record_retry(&mut self, namespace: &str) {
        self.bump(namespace, |c| c.retried += 1);
    }

    pub fn record_deduplicated(&mut self, namespace: &str) {
        self.bump(namespace, |c| c.deduplicated += 1);
    }

    pub fn record_cancelled(&mut self, namespace: &str) {
        self.bump(namespace, |c| c.cancelled += 1);
    }

    pub fn record_circuit_rejection(&mut self) {
        self.circuit_rejections += 1;
    }

    pub fn namespace(&self, namespace: &str) -> Counters {
        self.namespaces.get(namespace).cloned().unwrap_or_default()
    }

    fn bump(&mut self, namespace: &str, f: impl Fn(&mut Counters)) {
        f(&mut self.counters);
        f(self.namespaces.entry(namespace.to_string()).or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_tagged_by_namespace() {
        let mut m = Metrics::default();
        m.record_submitted("wallet");
        m.record_submitted("tasks");
        m.record_retry("wallet");
        m.record_failure("tasks");

        assert_eq!(m.counters.total, 2);
        assert_eq!(m.namespace("wallet").retried, 1);
        assert_eq!(m.namespace("tasks").failed, 1);
        assert_eq!(m.namespace("missing"), Counters::default());
    }

    #[test]
    fn response_time_is_an_exponential_moving_average() {
        let mut m = Metrics::default();
        m.record_success("a", Duration::from_millis(100));
        assert!((m.avg_response_ms - 10.0).abs() < 1e-9);
        m.record_success("a", Duration::from_millis(100));
        assert!((m.avg_response_ms - 19.0).abs() < 1e-9);
    }

    #[test]
    fn serializes_flat_counters() {
        let mut m = Metrics::default();
        m.record_submitted("a");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["total"], 1);
        assert_eq!(v["namespaces"]["a"]["total"], 1);
    }
}
