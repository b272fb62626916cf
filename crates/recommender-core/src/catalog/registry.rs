//! Process-wide catalog registry
//!
//! Snapshots are immutable and shared through `Arc`; a refresh builds a new
//! snapshot and swaps it in, so requests holding the previous one are never
//! affected.

use super::{ProviderApi, ZONE_AVAILABLE};
use crate::error::RecommendError;
use crate::models::InstanceType;
use crate::pricing::{PricingConfig, ResolvedPrices, SpotPriceMetrics, SpotPriceResolver};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Providers served by the configured provider API
    pub providers: BTreeSet<String>,
    /// Freshness window of a cached snapshot
    pub ttl: Duration,
    pub pricing: PricingConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            providers: ["aws".to_string()].into_iter().collect(),
            ttl: Duration::from_secs(3600),
            pricing: PricingConfig::default(),
        }
    }
}

/// Instance types of one provider/region at a point in time
#[derive(Debug)]
pub struct CatalogSnapshot {
    pub provider: String,
    pub region: String,
    /// Sorted by id; spot prices are never set here
    pub instance_types: Vec<InstanceType>,
    pub fetched_at: DateTime<Utc>,
    loaded: Instant,
}

impl CatalogSnapshot {
    pub fn new(provider: &str, region: &str, mut instance_types: Vec<InstanceType>) -> Self {
        instance_types.sort_by(|a, b| a.id.cmp(&b.id));
        instance_types.dedup_by(|a, b| a.id == b.id);
        Self {
            provider: provider.to_string(),
            region: region.to_string(),
            instance_types,
            fetched_at: Utc::now(),
            loaded: Instant::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded.elapsed() < ttl
    }

    pub fn get(&self, id: &str) -> Option<&InstanceType> {
        self.instance_types
            .binary_search_by(|t| t.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.instance_types[i])
    }

    /// Distinct vCPU counts offered in the region, ascending
    pub fn vcpu_values(&self) -> Vec<u32> {
        self.instance_types
            .iter()
            .map(|t| t.vcpus)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Result of refreshing one cached snapshot
#[derive(Debug)]
pub struct RefreshOutcome {
    pub provider: String,
    pub region: String,
    pub result: Result<usize, RecommendError>,
}

type SnapshotKey = (String, String);

pub struct CatalogRegistry {
    api: Arc<dyn ProviderApi>,
    resolver: SpotPriceResolver,
    config: RegistryConfig,
    snapshots: DashMap<SnapshotKey, Arc<CatalogSnapshot>>,
}

impl CatalogRegistry {
    pub fn new(
        api: Arc<dyn ProviderApi>,
        metrics: Option<Arc<dyn SpotPriceMetrics>>,
        config: RegistryConfig,
    ) -> Self {
        let resolver = SpotPriceResolver::new(metrics, config.pricing.clone());
        Self {
            api,
            resolver,
            config,
            snapshots: DashMap::new(),
        }
    }

    pub fn supports(&self, provider: &str) -> bool {
        self.config.providers.contains(provider)
    }

    pub fn has_metrics_backend(&self) -> bool {
        self.resolver.has_metrics_backend()
    }

    /// Number of cached snapshots
    pub fn cached(&self) -> usize {
        self.snapshots.len()
    }

    fn check_provider(&self, provider: &str) -> Result<(), RecommendError> {
        if self.supports(provider) {
            Ok(())
        } else {
            Err(RecommendError::InvalidRequest(format!(
                "provider {} is not supported",
                provider
            )))
        }
    }

    /// All instance types of a region, served from a fresh snapshot when
    /// one is cached
    pub async fn list_instance_types(
        &self,
        provider: &str,
        region: &str,
    ) -> Result<Arc<CatalogSnapshot>, RecommendError> {
        self.check_provider(provider)?;

        let key = (provider.to_string(), region.to_string());
        if let Some(snapshot) = self.snapshots.get(&key).map(|s| Arc::clone(s.value())) {
            if snapshot.is_fresh(self.config.ttl) {
                return Ok(snapshot);
            }
            debug!(provider, region, "Catalog snapshot is stale, refreshing");
        }

        self.refresh(provider, region).await
    }

    /// Fetch the region from the provider and swap in a new snapshot
    pub async fn refresh(
        &self,
        provider: &str,
        region: &str,
    ) -> Result<Arc<CatalogSnapshot>, RecommendError> {
        self.check_provider(provider)?;

        let instance_types = self
            .api
            .describe_instance_types(provider, region)
            .await
            .map_err(|e| e.into_catalog_error(provider, region))?;

        if instance_types.is_empty() {
            return Err(RecommendError::EmptyCatalog {
                provider: provider.to_string(),
                region: region.to_string(),
            });
        }

        let snapshot = Arc::new(CatalogSnapshot::new(provider, region, instance_types));
        self.snapshots.insert(
            (provider.to_string(), region.to_string()),
            Arc::clone(&snapshot),
        );

        info!(
            event = "catalog_refreshed",
            provider,
            region,
            instance_types = snapshot.instance_types.len(),
            "Catalog snapshot refreshed"
        );
        Ok(snapshot)
    }

    /// Refresh every cached snapshot; failed refreshes keep the old one
    pub async fn refresh_all(&self) -> Vec<RefreshOutcome> {
        let keys: Vec<SnapshotKey> = self.snapshots.iter().map(|e| e.key().clone()).collect();
        let mut outcomes = Vec::with_capacity(keys.len());

        for (provider, region) in keys {
            let result = self
                .refresh(&provider, &region)
                .await
                .map(|s| s.instance_types.len());
            if let Err(err) = &result {
                warn!(provider = %provider, region = %region, error = %err, "Keeping previous catalog snapshot");
            }
            outcomes.push(RefreshOutcome {
                provider,
                region,
                result,
            });
        }

        outcomes
    }

    /// Zones currently marked available, sorted by name
    pub async fn available_zones(
        &self,
        provider: &str,
        region: &str,
    ) -> Result<Vec<String>, RecommendError> {
        let zones = self
            .api
            .describe_zones(provider, region)
            .await
            .map_err(|e| e.into_catalog_error(provider, region))?;

        let mut names: Vec<String> = zones
            .into_iter()
            .filter(|z| z.state == ZONE_AVAILABLE)
            .map(|z| z.name)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Average spot price per instance type across `zones`
    ///
    /// An empty zone set is replaced by every available zone of the region.
    /// Pricing backend failures never surface here; affected types simply
    /// stay without a spot price.
    pub async fn resolve_spot_prices(
        &self,
        provider: &str,
        region: &str,
        zones: &[String],
        instance_types: &[String],
    ) -> Result<ResolvedPrices, RecommendError> {
        self.check_provider(provider)?;

        let zones = if zones.is_empty() {
            self.available_zones(provider, region).await?
        } else {
            zones.to_vec()
        };

        Ok(self
            .resolver
            .resolve(self.api.as_ref(), provider, region, &zones, instance_types)
            .await)
    }
}
