//! Metrics Collector

use crate::Result;
use anyhow::Context;
use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Registry, TextEncoder};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error};

/// Point-in-time copy of the counters, for the management API
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub changed_keys: u64,
    pub contexts_created: u64,
    pub context_build_failures: u64,
    pub active_contexts: u64,
}

/// Collects refresh and context metrics and exports them for Prometheus
pub struct Metrics {
    prometheus_registry: Registry,

    refresh_total: Counter,
    refresh_failures_total: Counter,
    changed_keys_total: Counter,
    refresh_duration: Histogram,
    contexts_created_total: Counter,
    context_build_failures_total: Counter,
    active_contexts: Gauge,

    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    changed_keys: AtomicU64,
    contexts_created: AtomicU64,
    context_build_failures: AtomicU64,
    live_contexts: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let prometheus_registry = Registry::new();

        let refresh_total = Counter::new("ctxhub_refresh_total", "Completed configuration refreshes")
            .context("Failed to create refresh_total counter")?;

        let refresh_failures_total = Counter::new(
            "ctxhub_refresh_failures_total",
            "Configuration refreshes that failed",
        )
        .context("Failed to create refresh_failures_total counter")?;

        let changed_keys_total = Counter::new(
            "ctxhub_changed_keys_total",
            "Property keys reported as changed by refreshes",
        )
        .context("Failed to create changed_keys_total counter")?;

        let refresh_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ctxhub_refresh_duration_seconds",
                "Duration of configuration refreshes in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .context("Failed to create refresh_duration histogram")?;

        let contexts_created_total = Counter::new(
            "ctxhub_contexts_created_total",
            "Named contexts built",
        )
        .context("Failed to create contexts_created_total counter")?;

        let context_build_failures_total = Counter::new(
            "ctxhub_context_build_failures_total",
            "Named context builds that failed",
        )
        .context("Failed to create context_build_failures_total counter")?;

        let active_contexts = Gauge::new("ctxhub_active_contexts", "Named contexts currently cached")
            .context("Failed to create active_contexts gauge")?;

        prometheus_registry
            .register(Box::new(refresh_total.clone()))
            .context("Failed to register refresh_total")?;
        prometheus_registry
            .register(Box::new(refresh_failures_total.clone()))
            .context("Failed to register refresh_failures_total")?;
        prometheus_registry
            .register(Box::new(changed_keys_total.clone()))
            .context("Failed to register changed_keys_total")?;
        prometheus_registry
            .register(Box::new(refresh_duration.clone()))
            .context("Failed to register refresh_duration")?;
        prometheus_registry
            .register(Box::new(contexts_created_total.clone()))
            .context("Failed to register contexts_created_total")?;
        prometheus_registry
            .register(Box::new(context_build_failures_total.clone()))
            .context("Failed to register context_build_failures_total")?;
        prometheus_registry
            .register(Box::new(active_contexts.clone()))
            .context("Failed to register active_contexts")?;

        Ok(Self {
            prometheus_registry,
            refresh_total,
            refresh_failures_total,
            changed_keys_total,
            refresh_duration,
            contexts_created_total,
            context_build_failures_total,
            active_contexts,
            refreshes: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
            changed_keys: AtomicU64::new(0),
            contexts_created: AtomicU64::new(0),
            context_build_failures: AtomicU64::new(0),
            live_contexts: AtomicU64::new(0),
        })
    }

    /// Record a completed refresh
    pub fn record_refresh(&self, changed_keys: usize, duration: Duration) {
        self.refresh_total.inc();
        self.changed_keys_total.inc_by(changed_keys as f64);
        self.refresh_duration.observe(duration.as_secs_f64());
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        self.changed_keys.fetch_add(changed_keys as u64, Ordering::Relaxed);

        debug!(changed_keys, duration_ms = duration.as_millis() as u64, "Refresh recorded");
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failures_total.inc();
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_context_created(&self) {
        self.contexts_created_total.inc();
        self.contexts_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_context_build_failure(&self) {
        self.context_build_failures_total.inc();
        self.context_build_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the number of cached named contexts
    pub fn set_active_contexts(&self, count: usize) {
        self.active_contexts.set(count as f64);
        self.live_contexts.store(count as u64, Ordering::Relaxed);
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            changed_keys: self.changed_keys.load(Ordering::Relaxed),
            contexts_created: self.contexts_created.load(Ordering::Relaxed),
            context_build_failures: self.context_build_failures.load(Ordering::Relaxed),
            active_contexts: self.live_contexts.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}
