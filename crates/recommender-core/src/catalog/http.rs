//! HTTP client for a product-info gateway
//!
//! Endpoints, relative to the configured base URL:
//! - `GET api/v1/providers/{provider}/regions/{region}/products`
//! - `GET api/v1/providers/{provider}/regions/{region}/zones`
//! - `GET api/v1/providers/{provider}/regions/{region}/spot-price-history?instanceTypes=a,b`

use super::{async_trait, ProviderApi, SpotPriceSample, Zone};
use crate::error::ProviderError;
use crate::models::{InstanceType, NetworkTier, GIB};
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductDetails {
    #[serde(rename = "type")]
    instance_type: String,
    cpus_per_vm: f64,
    /// GiB
    mem_per_vm: f64,
    #[serde(default)]
    gpus_per_vm: f64,
    #[serde(default)]
    ntw_perf: String,
    #[serde(default)]
    ntw_perf_category: Option<String>,
    on_demand_price: f64,
    #[serde(default = "current_gen_default")]
    current_gen: bool,
}

fn current_gen_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ProductsResponse {
    #[serde(default)]
    products: Vec<ProductDetails>,
}

#[derive(Debug, Deserialize)]
struct ZonesResponse {
    #[serde(default)]
    zones: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
struct SpotHistoryResponse {
    #[serde(default)]
    samples: Vec<SpotPriceSample>,
}

/// Map a provider's network performance label onto a tier
pub(crate) fn tier_from_label(label: &str) -> Option<NetworkTier> {
    if let Ok(tier) = label.parse::<NetworkTier>() {
        return Some(tier);
    }
    let label = label.to_ascii_lowercase();
    if label.contains("very low") || label.contains("low") {
        Some(NetworkTier::Low)
    } else if label.contains("moderate") {
        Some(NetworkTier::Moderate)
    } else if label.starts_with("up to") || label == "high" {
        Some(NetworkTier::High)
    } else if label.contains("gigabit") {
        Some(NetworkTier::VeryHigh)
    } else {
        None
    }
}

impl ProductDetails {
    fn into_instance_type(self) -> Option<InstanceType> {
        let tier = self
            .ntw_perf_category
            .as_deref()
            .and_then(tier_from_label)
            .or_else(|| tier_from_label(&self.ntw_perf))?;
        if self.cpus_per_vm < 1.0 || self.mem_per_vm <= 0.0 || self.on_demand_price <= 0.0 {
            return None;
        }
        Some(InstanceType {
            id: self.instance_type,
            vcpus: self.cpus_per_vm.round() as u32,
            memory_bytes: (self.mem_per_vm * GIB as f64).round() as u64,
            gpus: self.gpus_per_vm.max(0.0).round() as u32,
            network_tier: tier,
            on_demand_price: self.on_demand_price,
            spot_price: None,
            current_generation: self.current_gen,
        })
    }
}

pub struct HttpProviderApi {
    client: Client,
    base_url: Url,
}

impl HttpProviderApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        // Keep the base path when joining relative endpoints
        let mut base_url = Url::parse(base_url).context("Invalid product info URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    fn region_url(&self, provider: &str, region: &str, endpoint: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(&format!(
                "api/v1/providers/{}/regions/{}/{}",
                provider, region, endpoint
            ))
            .map_err(|e| ProviderError::Malformed(format!("invalid request URL: {}", e)))
    }

    /// GET a JSON document; `None` when the region is unknown to the gateway
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, ProviderError> {
        debug!(url = %url, "Querying product info gateway");
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Unreachable(format!(
                    "product info API returned {}: {}",
                    status, body
                )))
            }
        }
    }
}

#[async_trait]
impl ProviderApi for HttpProviderApi {
    async fn describe_instance_types(
        &self,
        provider: &str,
        region: &str,
    ) -> Result<Vec<InstanceType>, ProviderError> {
        let url = self.region_url(provider, region, "products")?;
        let products: Option<ProductsResponse> = self.get_json(url).await?;

        Ok(products
            .map(|p| p.products)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|details| {
                let id = details.instance_type.clone();
                let converted = details.into_instance_type();
                if converted.is_none() {
                    warn!(instance_type = %id, "Skipping product with incomplete attributes");
                }
                converted
            })
            .collect())
    }

    async fn describe_zones(
        &self,
        provider: &str,
        region: &str,
    ) -> Result<Vec<Zone>, ProviderError> {
        let url = self.region_url(provider, region, "zones")?;
        let zones: Option<ZonesResponse> = self.get_json(url).await?;
        Ok(zones.map(|z| z.zones).unwrap_or_default())
    }

    async fn spot_price_history(
        &self,
        provider: &str,
        region: &str,
        instance_types: &[String],
    ) -> Result<Vec<SpotPriceSample>, ProviderError> {
        let mut url = self.region_url(provider, region, "spot-price-history")?;
        url.query_pairs_mut()
            .append_pair("instanceTypes", &instance_types.join(","));
        let history: Option<SpotHistoryResponse> = self.get_json(url).await?;
        Ok(history.map(|h| h.samples).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_tier_labels() {
        assert_eq!(tier_from_label("Low"), Some(NetworkTier::Low));
        assert_eq!(tier_from_label("Moderate"), Some(NetworkTier::Moderate));
        assert_eq!(tier_from_label("Up to 10 Gigabit"), Some(NetworkTier::High));
        assert_eq!(tier_from_label("25 Gigabit"), Some(NetworkTier::VeryHigh));
        assert_eq!(tier_from_label("very_high"), Some(NetworkTier::VeryHigh));
        assert_eq!(tier_from_label(""), None);
    }

    #[tokio::test]
    async fn test_describe_instance_types() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/providers/aws/regions/eu-west-1/products")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"products": [
                    {"type": "m5.xlarge", "cpusPerVm": 4, "memPerVm": 16, "gpusPerVm": 0,
                     "ntwPerf": "Up to 10 Gigabit", "onDemandPrice": 0.192, "currentGen": true},
                    {"type": "c4.large", "cpusPerVm": 2, "memPerVm": 3.75,
                     "ntwPerf": "Moderate", "ntwPerfCategory": "moderate", "onDemandPrice": 0.1, "currentGen": false},
                    {"type": "broken", "cpusPerVm": 0, "memPerVm": 1, "ntwPerf": "Low", "onDemandPrice": 0.01}
                ]}"#,
            )
            .create_async()
            .await;

        let api = HttpProviderApi::new(&server.url(), Duration::from_secs(5)).unwrap();
        let types = api.describe_instance_types("aws", "eu-west-1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].id, "m5.xlarge");
        assert_eq!(types[0].vcpus, 4);
        assert_eq!(types[0].memory_bytes, 16 * GIB);
        assert_eq!(types[0].network_tier, NetworkTier::High);
        assert!(types[0].spot_price.is_none());
        assert_eq!(types[1].network_tier, NetworkTier::Moderate);
        assert!(!types[1].current_generation);
    }

    #[tokio::test]
    async fn test_unknown_region_is_empty() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/providers/aws/regions/mars-1/products")
            .with_status(404)
            .create_async()
            .await;

        let api = HttpProviderApi::new(&server.url(), Duration::from_secs(5)).unwrap();
        let types = api.describe_instance_types("aws", "mars-1").await.unwrap();
        assert!(types.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_unreachable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/providers/aws/regions/eu-west-1/zones")
            .with_status(503)
            .create_async()
            .await;

        let api = HttpProviderApi::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = api.describe_zones("aws", "eu-west-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_spot_price_history_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/providers/aws/regions/eu-west-1/spot-price-history")
            .match_query(Matcher::UrlEncoded(
                "instanceTypes".into(),
                "m5.xlarge,c5.large".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"samples": [
                    {"zone": "eu-west-1a", "instanceType": "m5.xlarge", "price": 0.07, "timestamp": 100}
                ]}"#,
            )
            .create_async()
            .await;

        let api = HttpProviderApi::new(&server.url(), Duration::from_secs(5)).unwrap();
        let samples = api
            .spot_price_history(
                "aws",
                "eu-west-1",
                &["m5.xlarge".to_string(), "c5.large".to_string()],
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].instance_type, "m5.xlarge");
    }
}
