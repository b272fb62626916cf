//! Spot price resolution
//!
//! Prices come from a time-series metrics backend when one is configured,
//! otherwise (or when any single query fails) from the provider's spot price
//! history. Results from the metrics backend are accepted all-or-nothing.

mod prometheus;

#[cfg(test)]
mod tests;

pub use self::prometheus::PrometheusSpotMetrics;

use crate::catalog::{ProviderApi, SpotPriceSample};
use crate::error::PricingError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Tuning for spot price resolution
#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Maximum concurrent metrics queries per request
    pub fanout: usize,
    pub query_timeout: Duration,
    /// Averaging window of the metrics query
    pub window: Duration,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            fanout: 8,
            query_timeout: Duration::from_secs(5),
            window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Time-series backend answering spot price averages
#[async_trait]
pub trait SpotPriceMetrics: Send + Sync {
    /// Average spot price of `instance_type` across `zones` over `window`
    async fn average_spot_price(
        &self,
        region: &str,
        zones: &[String],
        instance_type: &str,
        window: Duration,
    ) -> Result<f64, PricingError>;
}

/// Where resolved spot prices came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Metrics,
    History,
    /// Neither backend produced prices
    None,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Metrics => "metrics",
            PriceSource::History => "history",
            PriceSource::None => "none",
        }
    }
}

/// Spot prices for one request's zone set
#[derive(Debug, Clone)]
pub struct ResolvedPrices {
    pub zones: Vec<String>,
    pub prices: HashMap<String, f64>,
    pub source: PriceSource,
    /// Why the metrics attempt was abandoned, when it was tried
    pub metrics_error: Option<String>,
    /// Why the history fallback failed, when it was tried
    pub history_error: Option<String>,
    pub elapsed: Duration,
}

impl ResolvedPrices {
    pub fn get(&self, instance_type: &str) -> Option<f64> {
        self.prices.get(instance_type).copied()
    }
}

pub struct SpotPriceResolver {
    metrics: Option<Arc<dyn SpotPriceMetrics>>,
    config: PricingConfig,
}

impl SpotPriceResolver {
    pub fn new(metrics: Option<Arc<dyn SpotPriceMetrics>>, config: PricingConfig) -> Self {
        Self { metrics, config }
    }

    pub fn has_metrics_backend(&self) -> bool {
        self.metrics.is_some()
    }

    pub async fn resolve(
        &self,
        api: &dyn ProviderApi,
        provider: &str,
        region: &str,
        zones: &[String],
        instance_types: &[String],
    ) -> ResolvedPrices {
        let start = Instant::now();
        let mut resolved = ResolvedPrices {
            zones: zones.to_vec(),
            prices: HashMap::new(),
            source: PriceSource::None,
            metrics_error: None,
            history_error: None,
            elapsed: Duration::ZERO,
        };

        if zones.is_empty() || instance_types.is_empty() {
            debug!(provider, region, "Nothing to price");
            return resolved;
        }

        if let Some(metrics) = &self.metrics {
            match self
                .from_metrics(Arc::clone(metrics), region, zones, instance_types)
                .await
            {
                Ok(prices) => {
                    resolved.prices = prices;
                    resolved.source = PriceSource::Metrics;
                    resolved.elapsed = start.elapsed();
                    return resolved;
                }
                Err(err) => {
                    warn!(
                        event = "pricing_degraded",
                        provider,
                        region,
                        error = %err,
                        "Couldn't get spot prices from the metrics backend, falling back to spot price history"
                    );
                    resolved.metrics_error = Some(err.to_string());
                }
            }
        }

        debug!(provider, region, "Getting spot prices from the spot price history API");
        match api.spot_price_history(provider, region, instance_types).await {
            Ok(samples) => {
                resolved.prices = average_over_zones(&samples, zones);
                resolved.source = PriceSource::History;
            }
            Err(err) => {
                warn!(
                    event = "pricing_fallback_failed",
                    provider,
                    region,
                    error = %err,
                    "Spot price history unavailable, recommending on-demand capacity only"
                );
                resolved.history_error = Some(err.to_string());
            }
        }

        resolved.elapsed = start.elapsed();
        resolved
    }

    /// One query per instance type, run concurrently; the first failure
    /// aborts the remaining queries and fails the whole attempt
    async fn from_metrics(
        &self,
        metrics: Arc<dyn SpotPriceMetrics>,
        region: &str,
        zones: &[String],
        instance_types: &[String],
    ) -> Result<HashMap<String, f64>, PricingError> {
        let permits = Arc::new(Semaphore::new(self.config.fanout.max(1)));
        let zones: Arc<[String]> = zones.into();
        let mut queries = JoinSet::new();

        for instance_type in instance_types {
            let metrics = Arc::clone(&metrics);
            let permits = Arc::clone(&permits);
            let zones = Arc::clone(&zones);
            let region = region.to_string();
            let instance_type = instance_type.clone();
            let query_timeout = self.config.query_timeout;
            let window = self.config.window;

            queries.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| PricingError::Unreachable(e.to_string()))?;
                let price = tokio::time::timeout(
                    query_timeout,
                    metrics.average_spot_price(&region, &zones, &instance_type, window),
                )
                .await
                .map_err(|_| PricingError::Timeout(instance_type.clone()))??;
                Ok::<_, PricingError>((instance_type, price))
            });
        }

        let mut prices = HashMap::with_capacity(instance_types.len());
        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok(Ok((instance_type, price))) => {
                    prices.insert(instance_type, price);
                }
                Ok(Err(err)) => {
                    queries.abort_all();
                    return Err(err);
                }
                Err(join_err) => {
                    queries.abort_all();
                    return Err(PricingError::Unreachable(join_err.to_string()));
                }
            }
        }

        Ok(prices)
    }
}

/// Average the latest sample of each zone, for types priced in every zone
///
/// Samples from zones outside `zones` are ignored; a type missing any
/// requested zone gets no price.
pub fn average_over_zones(samples: &[SpotPriceSample], zones: &[String]) -> HashMap<String, f64> {
    let mut latest: HashMap<&str, BTreeMap<&str, &SpotPriceSample>> = HashMap::new();

    for sample in samples {
        if !zones.iter().any(|z| z == &sample.zone) {
            continue;
        }
        if !sample.price.is_finite() || sample.price < 0.0 {
            continue;
        }
        let per_zone = latest.entry(sample.instance_type.as_str()).or_default();
        match per_zone.get(sample.zone.as_str()) {
            Some(existing) if existing.timestamp >= sample.timestamp => {}
            _ => {
                per_zone.insert(sample.zone.as_str(), sample);
            }
        }
    }

    let zone_count = zones
        .iter()
        .collect::<std::collections::BTreeSet<_>>()
        .len();

    latest
        .into_iter()
        .filter(|(_, per_zone)| per_zone.len() == zone_count)
        .map(|(instance_type, per_zone)| {
            let sum: f64 = per_zone.values().map(|s| s.price).sum();
            (instance_type.to_string(), sum / zone_count as f64)
        })
        .collect()
}
