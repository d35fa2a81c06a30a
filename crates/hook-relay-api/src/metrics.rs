//! Prometheus metrics for the relay.
//!
//! Metrics live in a registry owned by [`RelayMetrics`] rather than the
//! process-global default, so several router instances (one per test) can
//! coexist in one process.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Relay metrics for observability
#[derive(Debug)]
pub struct RelayMetrics {
    registry: Registry,

    pub webhook_requests_total: IntCounter,
    pub webhook_rejected_total: IntCounter,
    pub webhook_rewritten_total: IntCounter,
    pub webhook_forward_failures_total: IntCounter,
    pub webhook_duration_seconds: Histogram,
    pub downstream_responses_total: IntCounterVec,
}

impl RelayMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let webhook_requests_total = IntCounter::new(
            "webhook_requests_total",
            "Total webhook deliveries received",
        )?;
        let webhook_rejected_total = IntCounter::new(
            "webhook_rejected_total",
            "Deliveries rejected because the source address is not a GitHub address",
        )?;
        let webhook_rewritten_total = IntCounter::new(
            "webhook_rewritten_total",
            "Comment deliveries rewritten into push envelopes",
        )?;
        let webhook_forward_failures_total = IntCounter::new(
            "webhook_forward_failures_total",
            "Deliveries that could not be forwarded downstream",
        )?;
        let webhook_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "webhook_duration_seconds",
                "Time from receiving a delivery to relaying the downstream response",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;
        let downstream_responses_total = IntCounterVec::new(
            Opts::new(
                "downstream_responses_total",
                "Downstream responses by HTTP status",
            ),
            &["status"],
        )?;

        registry.register(Box::new(webhook_requests_total.clone()))?;
        registry.register(Box::new(webhook_rejected_total.clone()))?;
        registry.register(Box::new(webhook_rewritten_total.clone()))?;
        registry.register(Box::new(webhook_forward_failures_total.clone()))?;
        registry.register(Box::new(webhook_duration_seconds.clone()))?;
        registry.register(Box::new(downstream_responses_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            webhook_requests_total,
            webhook_rejected_total,
            webhook_rewritten_total,
            webhook_forward_failures_total,
            webhook_duration_seconds,
            downstream_responses_total,
        }))
    }

    /// Record one downstream response status.
    pub fn record_downstream_status(&self, status: u16) {
        self.downstream_responses_total
            .with_label_values(&[status.to_string().as_str()])
            .inc();
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
