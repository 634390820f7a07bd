//! Prometheus metrics registry (C11).
//!
//! A single process-wide [`prometheus::Registry`] that both the analyzer
//! loop and HTTP handlers record against; `insights-server`'s `/metrics`
//! route renders it in text exposition format.

use once_cell::sync::Lazy;
use prometheus::{
    HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
};

pub struct Metrics {
    pub registry: Registry,
    /// Duration of HTTP handler calls, labeled by route and status class.
    pub request_duration_seconds: HistogramVec,
    /// Completed LLM calls, labeled by outcome (`success`, `transient_error`, `api_error`).
    pub llm_requests_total: IntCounterVec,
    /// Current depth of the work queue (C2).
    pub queue_depth: IntGauge,
    /// Admission requests rejected due to backpressure, labeled by reason.
    pub backpressure_events_total: IntCounterVec,
    /// Circuit breaker state as a gauge: 0 closed, 1 open, 2 half-open (C7).
    pub circuit_state: IntGauge,
    /// Conversations skipped before reaching the LLM, labeled by reason (C4).
    pub prefilter_skips_total: IntCounterVec,
    /// Analysis cache outcomes, labeled `hit`/`miss` (C5).
    pub cache_lookups_total: IntCounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request handler latency in seconds",
            ),
            &["route", "status_class"],
        )
        .expect("valid histogram metric");

        let llm_requests_total = IntCounterVec::new(
            Opts::new("llm_requests_total", "Completed LLM requests by outcome"),
            &["outcome"],
        )
        .expect("valid counter metric");

        let queue_depth = IntGauge::new("queue_depth", "Current work queue depth")
            .expect("valid gauge metric");

        let backpressure_events_total = IntCounterVec::new(
            Opts::new(
                "backpressure_events_total",
                "Admission requests rejected due to backpressure",
            ),
            &["reason"],
        )
        .expect("valid counter metric");

        let circuit_state = IntGauge::new("circuit_state", "Circuit breaker state (0=closed, 1=open, 2=half_open)")
            .expect("valid gauge metric");

        let prefilter_skips_total = IntCounterVec::new(
            Opts::new("prefilter_skips_total", "Conversations skipped by the pre-filter"),
            &["reason"],
        )
        .expect("valid counter metric");

        let cache_lookups_total = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Analysis cache lookups by outcome"),
            &["outcome"],
        )
        .expect("valid counter metric");

        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(llm_requests_total.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(queue_depth.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(backpressure_events_total.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(circuit_state.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(prefilter_skips_total.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(cache_lookups_total.clone()))
            .expect("metric registers once");

        Self {
            registry,
            request_duration_seconds,
            llm_requests_total,
            queue_depth,
            backpressure_events_total,
            circuit_state,
            prefilter_skips_total,
            cache_lookups_total,
        }
    }

    /// Maps a [`crate::breaker::CircuitBreaker`] state label to the gauge value.
    pub fn set_circuit_state(&self, label: &str) {
        let value = match label {
            "closed" => 0,
            "open" => 1,
            _ => 2,
        };
        self.circuit_state.set(value);
    }
}

/// Process-wide metrics instance.
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_panicking() {
        let metrics = Metrics::new();
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn set_circuit_state_maps_labels_to_gauge_values() {
        let metrics = Metrics::new();
        metrics.set_circuit_state("closed");
        assert_eq!(metrics.circuit_state.get(), 0);
        metrics.set_circuit_state("open");
        assert_eq!(metrics.circuit_state.get(), 1);
        metrics.set_circuit_state("half_open");
        assert_eq!(metrics.circuit_state.get(), 2);
    }
}
