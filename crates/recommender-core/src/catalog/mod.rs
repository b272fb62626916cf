//! Instance-type catalog and provider API adapters
//!
//! The registry keeps one immutable snapshot of instance types per
//! (provider, region) and resolves spot prices per request through the
//! pricing module. Provider APIs are reached through [`ProviderApi`], which
//! has a file-backed and an HTTP implementation.

mod file;
mod http;
mod registry;


pub use file::{RegionCatalog, StaticCatalog, StaticProviderApi};
pub use http::HttpProviderApi;
pub use registry::{CatalogRegistry, CatalogSnapshot, RefreshOutcome, RegistryConfig};

use crate::error::ProviderError;
use crate::models::InstanceType;
use serde::{Deserialize, Serialize};

pub use async_trait::async_trait;

/// Zone state marking capacity that can be launched
pub const ZONE_AVAILABLE: &str = "available";

/// An availability zone as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub state: String,
}

impl Zone {
    pub fn available(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ZONE_AVAILABLE.to_string(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == ZONE_AVAILABLE
    }
}

/// One observed spot price for an instance type in a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotPriceSample {
    pub zone: String,
    pub instance_type: String,
    pub price: f64,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: i64,
}

/// Descriptive and spot-history APIs of a cloud provider
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Instance types with static attributes and on-demand prices
    ///
    /// A region without offerings yields an empty list.
    async fn describe_instance_types(
        &self,
        provider: &str,
        region: &str,
    ) -> Result<Vec<InstanceType>, ProviderError>;

    async fn describe_zones(&self, provider: &str, region: &str)
        -> Result<Vec<Zone>, ProviderError>;

    /// Recent spot price samples for the given instance types, all zones
    async fn spot_price_history(
        &self,
        provider: &str,
        region: &str,
        instance_types: &[String],
    ) -> Result<Vec<SpotPriceSample>, ProviderError>;
}
