//! Recommendation engine
//!
//! Ties the catalog registry, candidate selection and the optimizer into one
//! request pipeline, under a per-request deadline. Health and metrics are
//! updated along the way.

mod optimizer;


pub use optimizer::{Layout, Optimizer, OptimizerConfig};

use crate::catalog::{CatalogRegistry, RefreshOutcome};
use crate::error::RecommendError;
use crate::health::{components, HealthRegistry};
use crate::models::{RecommendationRequest, RecommendationResponse};
use crate::observability::{RecommenderMetrics, StructuredLogger};
use crate::pricing::{PriceSource, ResolvedPrices};
use crate::selector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of distinct instance types per recommendation
    pub diversification: usize,
    /// Deadline for a whole request, pricing included
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            diversification: 2,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Engine {
    registry: Arc<CatalogRegistry>,
    optimizer: Optimizer,
    health: HealthRegistry,
    metrics: RecommenderMetrics,
    logger: StructuredLogger,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: Arc<CatalogRegistry>, health: HealthRegistry, config: EngineConfig) -> Self {
        let optimizer = Optimizer::new(OptimizerConfig {
            diversification: config.diversification,
        });
        Self {
            registry,
            optimizer,
            health,
            metrics: RecommenderMetrics::new(),
            logger: StructuredLogger::new(hostname()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<CatalogRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Register the components this engine reports on
    pub async fn register_components(&self) {
        self.health.register(components::CATALOG).await;
        self.health.register(components::PRICING_HISTORY).await;
        if self.registry.has_metrics_backend() {
            self.health.register(components::PRICING_METRICS).await;
        }
    }

    /// Recommend node pools for one request
    ///
    /// Dropping the returned future, or hitting the request deadline, aborts
    /// any pricing queries still in flight.
    pub async fn recommend(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse, RecommendError> {
        let start = Instant::now();

        let result = match request.validate() {
            Ok(()) => {
                match tokio::time::timeout(self.config.request_timeout, self.run(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(RecommendError::Timeout(self.config.request_timeout)),
                }
            }
            Err(err) => Err(err),
        };

        let elapsed = start.elapsed();
        self.metrics.observe_recommendation_latency(elapsed);
        match &result {
            Ok(response) => {
                self.metrics.inc_recommendation("success");
                self.logger.log_recommendation(request, response, elapsed);
            }
            Err(err) => {
                self.metrics.inc_recommendation(err.code());
                self.logger
                    .log_recommendation_failed(request, err.code(), &err.to_string(), elapsed);
            }
        }
        result
    }

    async fn run(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse, RecommendError> {
        let provider = request.provider.as_str();
        let region = request.region.as_str();

        let snapshot = match self.registry.list_instance_types(provider, region).await {
            Ok(snapshot) => {
                self.health.set_healthy(components::CATALOG).await;
                snapshot
            }
            Err(err) => {
                self.record_catalog_failure(&err).await;
                return Err(err);
            }
        };
        self.metrics.set_catalogs_cached(self.registry.cached());

        let eligible = selector::filter_catalog(&snapshot.instance_types, request);
        debug!(
            provider,
            region,
            catalog = snapshot.instance_types.len(),
            eligible = eligible.len(),
            "Filtered catalog"
        );

        let mut zones = request.zones.clone();
        let prices = if request.spot_allowed() && !eligible.is_empty() {
            let ids: Vec<String> = eligible.iter().map(|t| t.id.clone()).collect();
            let resolved = match self
                .registry
                .resolve_spot_prices(provider, region, &request.zones, &ids)
                .await
            {
                Ok(resolved) => resolved,
                Err(err) => {
                    self.record_catalog_failure(&err).await;
                    return Err(err);
                }
            };
            self.record_pricing(&resolved).await;
            zones = resolved.zones.clone();
            Some(resolved)
        } else {
            None
        };

        let candidates = selector::partition(eligible, prices.as_ref(), request.spot_allowed());
        let optimizer = self.optimizer.clone();
        let owned = request.clone();
        let layout = tokio::task::spawn_blocking(move || optimizer.optimize(&candidates, &owned)).await??;

        Ok(RecommendationResponse {
            provider: request.provider.clone(),
            region: request.region.clone(),
            zones,
            node_pools: layout.node_pools,
            total_price: layout.total_price,
            achieved: layout.achieved,
        })
    }

    async fn record_catalog_failure(&self, err: &RecommendError) {
        if matches!(err, RecommendError::CatalogUnavailable { .. }) {
            self.health
                .set_unhealthy(components::CATALOG, err.to_string())
                .await;
        }
    }

    async fn record_pricing(&self, resolved: &ResolvedPrices) {
        self.metrics.observe_pricing_latency(resolved.elapsed);
        self.metrics.inc_pricing_source(resolved.source.as_str());

        if self.registry.has_metrics_backend() {
            match &resolved.metrics_error {
                Some(err) => {
                    self.health
                        .set_degraded(components::PRICING_METRICS, err.clone())
                        .await
                }
                None => self.health.set_healthy(components::PRICING_METRICS).await,
            }
        }

        match (&resolved.history_error, resolved.source) {
            (Some(err), _) => {
                self.health
                    .set_degraded(components::PRICING_HISTORY, err.clone())
                    .await
            }
            (None, PriceSource::History) => {
                self.health.set_healthy(components::PRICING_HISTORY).await
            }
            _ => {}
        }
    }

    /// Distinct vCPU counts offered in a region
    pub async fn cpu_attribute_values(
        &self,
        provider: &str,
        region: &str,
    ) -> Result<Vec<u32>, RecommendError> {
        let snapshot = self.registry.list_instance_types(provider, region).await?;
        Ok(snapshot.vcpu_values())
    }

    /// Refresh every cached catalog, recording the outcome of each
    pub async fn refresh_catalogs(&self) -> Vec<RefreshOutcome> {
        let outcomes = self.registry.refresh_all().await;
        for outcome in &outcomes {
            self.metrics.inc_catalog_refresh(outcome.result.is_ok());
            if let Err(err) = &outcome.result {
                self.logger
                    .log_catalog_refresh_failed(&outcome.provider, &outcome.region, &err.to_string());
            }
        }
        self.metrics.set_catalogs_cached(self.registry.cached());
        outcomes
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "nodepool-recommender".to_string())
}
