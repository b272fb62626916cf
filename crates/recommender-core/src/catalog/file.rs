//! File-backed provider catalog
//!
//! Serves instance types, zones and spot price samples from a JSON document,
//! for offline operation and tests.

use super::{async_trait, ProviderApi, SpotPriceSample, Zone};
use crate::error::ProviderError;
use crate::models::InstanceType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Everything known about one region
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionCatalog {
    #[serde(default)]
    pub instance_types: Vec<InstanceType>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub spot_prices: Vec<SpotPriceSample>,
}

/// provider -> region -> catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    pub providers: BTreeMap<String, BTreeMap<String, RegionCatalog>>,
}

impl StaticCatalog {
    pub fn with_region(
        mut self,
        provider: impl Into<String>,
        region: impl Into<String>,
        catalog: RegionCatalog,
    ) -> Self {
        self.providers
            .entry(provider.into())
            .or_default()
            .insert(region.into(), catalog);
        self
    }
}

pub struct StaticProviderApi {
    catalog: StaticCatalog,
}

impl StaticProviderApi {
    pub fn new(catalog: StaticCatalog) -> Self {
        Self { catalog }
    }

    /// Load a catalog document from disk
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read catalog file {:?}", path))?;
        let catalog: StaticCatalog = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog file {:?}", path))?;
        Ok(Self::new(catalog))
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.catalog.providers.keys().cloned().collect()
    }

    fn region(&self, provider: &str, region: &str) -> Result<Option<&RegionCatalog>, ProviderError> {
        let regions = self
            .catalog
            .providers
            .get(provider)
            .ok_or_else(|| ProviderError::UnsupportedProvider(provider.to_string()))?;
        Ok(regions.get(region))
    }
}

#[async_trait]
impl ProviderApi for StaticProviderApi {
    async fn describe_instance_types(
        &self,
        provider: &str,
        region: &str,
    ) -> Result<Vec<InstanceType>, ProviderError> {
        // Spot prices are never part of the descriptive data
        Ok(self
            .region(provider, region)?
            .map(|r| {
                r.instance_types
                    .iter()
                    .map(|t| t.with_spot_price(None))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn describe_zones(
        &self,
        provider: &str,
        region: &str,
    ) -> Result<Vec<Zone>, ProviderError> {
        Ok(self
            .region(provider, region)?
            .map(|r| r.zones.clone())
            .unwrap_or_default())
    }

    async fn spot_price_history(
        &self,
        provider: &str,
        region: &str,
        instance_types: &[String],
    ) -> Result<Vec<SpotPriceSample>, ProviderError> {
        let wanted: HashSet<&str> = instance_types.iter().map(String::as_str).collect();
        Ok(self
            .region(provider, region)?
            .map(|r| {
                r.spot_prices
                    .iter()
                    .filter(|s| wanted.contains(s.instance_type.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
