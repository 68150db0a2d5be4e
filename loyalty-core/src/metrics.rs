//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger and the
//! reconciliation poller.
//!
//! # Metrics
//!
//! - `loyalty_orders_submitted_total{outcome}` - Order submissions by outcome
//! - `loyalty_withdrawals_total{outcome}` - Withdrawal requests by outcome
//! - `loyalty_oracle_lookups_total{result}` - Oracle lookups by result
//! - `loyalty_resolutions_total{result}` - Resolutions applied or refused
//! - `loyalty_rate_limited_ticks_total` - Ticks aborted by oracle backpressure
//! - `loyalty_tick_duration_seconds` - Histogram of poller tick latencies
//!
//! Collectors are registered into the instance's own [`Registry`] only, so
//! any number of `Metrics` can coexist in one process.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Order submissions by outcome
    pub orders_submitted: IntCounterVec,

    /// Withdrawal requests by outcome
    pub withdrawals: IntCounterVec,

    /// Oracle lookups by result
    pub oracle_lookups: IntCounterVec,

    /// Resolutions by result (`applied`, `unchanged`, `rejected`)
    pub resolutions: IntCounterVec,

    /// Ticks ended early by a rate-limit signal
    pub rate_limited_ticks: IntCounter,

    /// Tick duration histogram
    pub tick_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let orders_submitted = IntCounterVec::new(
            Opts::new("loyalty_orders_submitted_total", "Order submissions by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(orders_submitted.clone()))?;

        let withdrawals = IntCounterVec::new(
            Opts::new("loyalty_withdrawals_total", "Withdrawal requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(withdrawals.clone()))?;

        let oracle_lookups = IntCounterVec::new(
            Opts::new("loyalty_oracle_lookups_total", "Accrual oracle lookups by result"),
            &["result"],
        )?;
        registry.register(Box::new(oracle_lookups.clone()))?;

        let resolutions = IntCounterVec::new(
            Opts::new("loyalty_resolutions_total", "Oracle resolutions by result"),
            &["result"],
        )?;
        registry.register(Box::new(resolutions.clone()))?;

        let rate_limited_ticks = IntCounter::new(
            "loyalty_rate_limited_ticks_total",
            "Poller ticks aborted by oracle backpressure",
        )?;
        registry.register(Box::new(rate_limited_ticks.clone()))?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new("loyalty_tick_duration_seconds", "Histogram of poller tick latencies")
                .buckets(vec![0.005, 0.010, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        Ok(Self {
            orders_submitted,
            withdrawals,
            oracle_lookups,
            resolutions,
            rate_limited_ticks,
            tick_duration,
            registry,
        })
    }

    /// Record an order submission outcome
    pub fn record_order(&self, outcome: &str) {
        self.orders_submitted.with_label_values(&[outcome]).inc();
    }

    /// Record a withdrawal outcome
    pub fn record_withdrawal(&self, outcome: &str) {
        self.withdrawals.with_label_values(&[outcome]).inc();
    }

    /// Record an oracle lookup result
    pub fn record_lookup(&self, result: &str) {
        self.oracle_lookups.with_label_values(&[result]).inc();
    }

    /// Record a resolution result
    pub fn record_resolution(&self, result: &str) {
        self.resolutions.with_label_values(&[result]).inc();
    }

    /// Record a tick aborted by backpressure
    pub fn record_rate_limited_tick(&self) {
        self.rate_limited_ticks.inc();
    }

    /// Record tick duration
    pub fn record_tick_duration(&self, duration_seconds: f64) {
        self.tick_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.rate_limited_ticks.get(), 0);
        assert_eq!(metrics.orders_submitted.with_label_values(&["accepted"]).get(), 0);
    }

    #[test]
    fn test_instances_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_order("accepted");
        first.record_order("accepted");

        assert_eq!(first.orders_submitted.with_label_values(&["accepted"]).get(), 2);
        assert_eq!(second.orders_submitted.with_label_values(&["accepted"]).get(), 0);
    }

    #[test]
    fn test_render_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.record_withdrawal("insufficient_balance");
        metrics.record_rate_limited_tick();
        metrics.record_tick_duration(0.02);

        let text = metrics.render().unwrap();
        assert!(text.contains("loyalty_withdrawals_total{outcome=\"insufficient_balance\"} 1"));
        assert!(text.contains("loyalty_rate_limited_ticks_total 1"));
        assert!(text.contains("loyalty_tick_duration_seconds_count 1"));
    }
}
