//! Prometheus metrics collection.
//!
//! HTTP request counts and latency are recorded by middleware. Hub gauges and
//! counters are synced from [`HubStats`] right before each scrape.

use fanout_core::HubStats;
use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::fmt;
use std::sync::Arc;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Matched route pattern
    pub path: String,
    /// Response status code
    pub status: u16,
}

/// Metrics state container.
#[derive(Clone)]
pub struct MetricsState {
    /// Prometheus registry.
    pub registry: Arc<RwLock<Registry>>,
    /// HTTP request counter.
    pub http_requests_total: Family<HttpLabels, Counter>,
    /// HTTP request duration histogram (seconds).
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,
    /// HTTP requests in flight.
    pub http_active_requests: Gauge,
    /// Connected clients.
    pub clients_connected: Gauge,
    /// Topics with at least one subscriber.
    pub topics_active: Gauge,
    /// Events published.
    pub events_published: Counter,
    /// Successful deliveries.
    pub deliveries: Counter,
    /// Failed deliveries.
    pub delivery_failures: Counter,
    /// Recipients skipped by filters.
    pub deliveries_filtered: Counter,
    /// Evicted clients.
    pub evictions: Counter,
}

impl fmt::Debug for MetricsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsState").finish_non_exhaustive()
    }
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // HTTP metrics
        let http_requests_total = Family::<HttpLabels, Counter>::default();
        registry.register(
            "fanout_http_requests",
            "Total HTTP requests",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<HttpLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 16))
            });
        registry.register(
            "fanout_http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration_seconds.clone(),
        );

        let http_active_requests = Gauge::default();
        registry.register(
            "fanout_http_active_requests",
            "Number of HTTP requests in flight",
            http_active_requests.clone(),
        );

        // Hub metrics
        let clients_connected = Gauge::default();
        registry.register(
            "fanout_clients_connected",
            "Number of connected clients",
            clients_connected.clone(),
        );

        let topics_active = Gauge::default();
        registry.register(
            "fanout_topics_active",
            "Number of topics with subscribers",
            topics_active.clone(),
        );

        let events_published = Counter::default();
        registry.register(
            "fanout_events_published",
            "Total events published",
            events_published.clone(),
        );

        let deliveries = Counter::default();
        registry.register(
            "fanout_deliveries",
            "Total successful deliveries",
            deliveries.clone(),
        );

        let delivery_failures = Counter::default();
        registry.register(
            "fanout_delivery_failures",
            "Total failed deliveries",
            delivery_failures.clone(),
        );

        let deliveries_filtered = Counter::default();
        registry.register(
            "fanout_deliveries_filtered",
            "Total recipients skipped by subscription filters",
            deliveries_filtered.clone(),
        );

        let evictions = Counter::default();
        registry.register(
            "fanout_evictions",
            "Total clients evicted",
            evictions.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            http_requests_total,
            http_request_duration_seconds,
            http_active_requests,
            clients_connected,
            topics_active,
            events_published,
            deliveries,
            delivery_failures,
            deliveries_filtered,
            evictions,
        }
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: path.to_string(),
            status,
        };

        self.http_requests_total.get_or_create(&labels).inc();
        self.http_request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Sync hub gauges and counters.
    pub fn refresh(&self, stats: &HubStats) {
        self.clients_connected.set(stats.current_connections as i64);
        self.topics_active.set(stats.current_topics as i64);
        advance(&self.events_published, stats.total_events);
        advance(&self.deliveries, stats.total_deliveries);
        advance(&self.delivery_failures, stats.total_failed_deliveries);
        advance(&self.deliveries_filtered, stats.total_filtered);
        advance(&self.evictions, stats.total_evictions);
    }

    /// Encode metrics for Prometheus scraping.
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)?;
        Ok(buffer)
    }
}

/// Move a counter forward to `total`. Counters never go back.
fn advance(counter: &Counter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
