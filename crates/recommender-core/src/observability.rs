//! Observability for the recommender
//!
//! Prometheus metrics live in the default registry and are registered once
//! per process; `RecommenderMetrics` is a cheap handle to them. Significant
//! events are logged through `StructuredLogger` with an `event` field.

use crate::models::{RecommendationRequest, RecommendationResponse};
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Histogram, IntCounterVec,
    IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

static GLOBAL_METRICS: OnceLock<RecommenderMetricsInner> = OnceLock::new();

struct RecommenderMetricsInner {
    recommendation_latency_seconds: Histogram,
    pricing_latency_seconds: Histogram,
    recommendations: IntCounterVec,
    pricing_sources: IntCounterVec,
    catalog_refreshes: IntCounterVec,
    catalogs_cached: IntGauge,
}

impl RecommenderMetricsInner {
    fn new() -> Self {
        Self {
            recommendation_latency_seconds: register_histogram!(
                "nodepool_recommender_recommendation_latency_seconds",
                "Time spent answering a recommendation request",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register recommendation_latency_seconds"),

            pricing_latency_seconds: register_histogram!(
                "nodepool_recommender_pricing_latency_seconds",
                "Time spent resolving spot prices for a request",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register pricing_latency_seconds"),

            recommendations: register_int_counter_vec!(
                "nodepool_recommender_recommendations_total",
                "Recommendation requests by outcome",
                &["outcome"]
            )
            .expect("Failed to register recommendations_total"),

            pricing_sources: register_int_counter_vec!(
                "nodepool_recommender_pricing_source_total",
                "Spot price resolutions by the backend that answered",
                &["source"]
            )
            .expect("Failed to register pricing_source_total"),

            catalog_refreshes: register_int_counter_vec!(
                "nodepool_recommender_catalog_refresh_total",
                "Catalog snapshot refreshes by result",
                &["result"]
            )
            .expect("Failed to register catalog_refresh_total"),

            catalogs_cached: register_int_gauge!(
                "nodepool_recommender_catalogs_cached",
                "Provider/region catalog snapshots held in memory"
            )
            .expect("Failed to register catalogs_cached"),
        }
    }
}

/// Handle to the process-wide recommender metrics
#[derive(Clone)]
pub struct RecommenderMetrics {
    _private: (),
}

impl Default for RecommenderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RecommenderMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(RecommenderMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RecommenderMetricsInner {
        GLOBAL_METRICS.get_or_init(RecommenderMetricsInner::new)
    }

    pub fn observe_recommendation_latency(&self, duration: Duration) {
        self.inner()
            .recommendation_latency_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn observe_pricing_latency(&self, duration: Duration) {
        self.inner()
            .pricing_latency_seconds
            .observe(duration.as_secs_f64());
    }

    /// `outcome` is `success` or an error code
    pub fn inc_recommendation(&self, outcome: &str) {
        self.inner()
            .recommendations
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_pricing_source(&self, source: &str) {
        self.inner()
            .pricing_sources
            .with_label_values(&[source])
            .inc();
    }

    pub fn inc_catalog_refresh(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.inner()
            .catalog_refreshes
            .with_label_values(&[result])
            .inc();
    }

    pub fn set_catalogs_cached(&self, count: usize) {
        self.inner().catalogs_cached.set(count as i64);
    }

    pub fn recommendations(&self, outcome: &str) -> u64 {
        self.inner()
            .recommendations
            .with_label_values(&[outcome])
            .get()
    }
}

/// Structured logger for recommender events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_recommendation(
        &self,
        request: &RecommendationRequest,
        response: &RecommendationResponse,
        elapsed: Duration,
    ) {
        info!(
            event = "recommendation_served",
            instance = %self.instance,
            provider = %response.provider,
            region = %response.region,
            target_cpu = request.requirement.cpu,
            target_memory_bytes = request.requirement.memory_bytes,
            node_pools = response.node_pools.len(),
            nodes = response.achieved.nodes,
            achieved_cpu = response.achieved.cpu,
            total_price = response.total_price,
            elapsed_ms = elapsed.as_millis() as u64,
            "Recommendation served"
        );
    }

    pub fn log_recommendation_failed(
        &self,
        request: &RecommendationRequest,
        code: &str,
        error: &str,
        elapsed: Duration,
    ) {
        warn!(
            event = "recommendation_failed",
            instance = %self.instance,
            provider = %request.provider,
            region = %request.region,
            code = %code,
            error = %error,
            elapsed_ms = elapsed.as_millis() as u64,
            "Recommendation failed"
        );
    }

    pub fn log_catalog_refresh_failed(&self, provider: &str, region: &str, error: &str) {
        warn!(
            event = "catalog_refresh_failed",
            instance = %self.instance,
            provider = %provider,
            region = %region,
            error = %error,
            "Catalog refresh failed, keeping previous snapshot"
        );
    }

    pub fn log_startup(&self, version: &str, providers: &[String], metrics_backend: bool) {
        info!(
            event = "service_started",
            instance = %self.instance,
            version = %version,
            providers = ?providers,
            metrics_backend = metrics_backend,
            "Node-pool recommender started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Node-pool recommender shutting down"
        );
    }
}
