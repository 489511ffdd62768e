//! Observability infrastructure for the cost meter
//!
//! Provides:
//! - Prometheus metrics (collection latency, price cache behaviour, cost and publish counters)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MeterMetricsInner> = OnceLock::new();

struct MeterMetricsInner {
    collection_latency_seconds: HistogramVec,
    collection_errors: IntCounterVec,
    batches_emitted: IntCounterVec,
    price_cache_hits: IntCounter,
    price_cache_misses: IntCounter,
    price_fetch_latency_seconds: Histogram,
    price_fetch_errors: IntCounter,
    price_cached_points: IntGauge,
    costs_computed: IntCounterVec,
    costs_failed: IntCounter,
    series_published: IntCounter,
    publish_errors: IntCounterVec,
}

impl MeterMetricsInner {
    fn new() -> Self {
        Self {
            collection_latency_seconds: register_histogram_vec!(
                "cost_meter_collection_latency_seconds",
                "Time spent in a single collector run",
                &["collector"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            collection_errors: register_int_counter_vec!(
                "cost_meter_collection_errors_total",
                "Total number of failed collector runs",
                &["collector"]
            )
            .expect("Failed to register collection_errors"),

            batches_emitted: register_int_counter_vec!(
                "cost_meter_batches_emitted_total",
                "Total number of run stat batches handed to the meter",
                &["collector"]
            )
            .expect("Failed to register batches_emitted"),

            price_cache_hits: register_int_counter!(
                "cost_meter_price_cache_hits_total",
                "Price lookups served without contacting the provider"
            )
            .expect("Failed to register price_cache_hits"),

            price_cache_misses: register_int_counter!(
                "cost_meter_price_cache_misses_total",
                "Price lookups that required a provider fetch"
            )
            .expect("Failed to register price_cache_misses"),

            price_fetch_latency_seconds: register_histogram!(
                "cost_meter_price_fetch_latency_seconds",
                "Time spent fetching price history from the provider",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register price_fetch_latency_seconds"),

            price_fetch_errors: register_int_counter!(
                "cost_meter_price_fetch_errors_total",
                "Total number of failed provider fetches"
            )
            .expect("Failed to register price_fetch_errors"),

            price_cached_points: register_int_gauge!(
                "cost_meter_price_cached_points",
                "Number of price points held in the cache"
            )
            .expect("Failed to register price_cached_points"),

            costs_computed: register_int_counter_vec!(
                "cost_meter_costs_computed_total",
                "Total number of samples with a computed cost",
                &["resource"]
            )
            .expect("Failed to register costs_computed"),

            costs_failed: register_int_counter!(
                "cost_meter_costs_failed_total",
                "Total number of samples whose cost could not be computed"
            )
            .expect("Failed to register costs_failed"),

            series_published: register_int_counter!(
                "cost_meter_series_published_total",
                "Total number of series handed to the sinks"
            )
            .expect("Failed to register series_published"),

            publish_errors: register_int_counter_vec!(
                "cost_meter_publish_errors_total",
                "Total number of failed publishes per sink",
                &["sink"]
            )
            .expect("Failed to register publish_errors"),
        }
    }
}

/// Meter metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MeterMetrics {
    _private: (),
}

impl Default for MeterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MeterMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MeterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MeterMetricsInner {
        GLOBAL_METRICS.get_or_init(MeterMetricsInner::new)
    }

    pub fn observe_collection_latency(&self, collector: &str, duration_secs: f64) {
        self.inner()
            .collection_latency_seconds
            .with_label_values(&[collector])
            .observe(duration_secs);
    }

    pub fn inc_collection_errors(&self, collector: &str) {
        self.inner()
            .collection_errors
            .with_label_values(&[collector])
            .inc();
    }

    pub fn inc_batches_emitted(&self, collector: &str) {
        self.inner()
            .batches_emitted
            .with_label_values(&[collector])
            .inc();
    }

    pub fn inc_price_cache_hits(&self) {
        self.inner().price_cache_hits.inc();
    }

    pub fn inc_price_cache_misses(&self) {
        self.inner().price_cache_misses.inc();
    }

    pub fn observe_price_fetch_latency(&self, duration_secs: f64) {
        self.inner().price_fetch_latency_seconds.observe(duration_secs);
    }

    pub fn inc_price_fetch_errors(&self) {
        self.inner().price_fetch_errors.inc();
    }

    pub fn set_price_cached_points(&self, count: usize) {
        self.inner().price_cached_points.set(count as i64);
    }

    pub fn inc_costs_computed(&self, resource: &str) {
        self.inner()
            .costs_computed
            .with_label_values(&[resource])
            .inc();
    }

    pub fn inc_costs_failed(&self) {
        self.inner().costs_failed.inc();
    }

    pub fn add_series_published(&self, count: usize) {
        self.inner().series_published.inc_by(count as u64);
    }

    pub fn inc_publish_errors(&self, sink: &str) {
        self.inner().publish_errors.with_label_values(&[sink]).inc();
    }
}

/// Structured logger for meter events
///
/// Provides consistent JSON-formatted logging for lifecycle events,
/// computed costs and failures.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, provider: &str, collectors: &[String], sinks: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            price_provider = %provider,
            collectors = ?collectors,
            sinks = %sinks,
            "Cost agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Cost agent shutting down"
        );
    }

    /// Log a computed cost for one sample
    pub fn log_cost(
        &self,
        resource: &str,
        tags: &str,
        total: f64,
        cpu_ratio: f64,
        memory_ratio: f64,
        start: u64,
        end: u64,
    ) {
        info!(
            event = "cost_computed",
            node = %self.node_name,
            resource = %resource,
            tags = %tags,
            cost = total,
            cpu_ratio = cpu_ratio,
            memory_ratio = memory_ratio,
            start = start,
            end = end,
            "Computed resource cost"
        );
    }

    /// Log a sample whose cost could not be computed
    pub fn log_cost_failed(&self, resource: &str, tags: &str, error: &str) {
        warn!(
            event = "cost_failed",
            node = %self.node_name,
            resource = %resource,
            tags = %tags,
            error = %error,
            "Failed to compute resource cost"
        );
    }

    /// Log a failed collector run
    pub fn log_collection_failed(&self, collector: &str, error: &str) {
        warn!(
            event = "collection_failed",
            node = %self.node_name,
            collector = %collector,
            error = %error,
            "Collector run failed, retrying on next tick"
        );
    }

    /// Log a publish that failed on one or more sinks
    pub fn log_publish_failed(&self, failed_sinks: &[&str], error: &str) {
        warn!(
            event = "publish_failed",
            node = %self.node_name,
            sinks = ?failed_sinks,
            error = %error,
            "Failed to publish cost series"
        );
    }
}
