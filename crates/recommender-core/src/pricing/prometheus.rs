//! Prometheus-backed spot price averages
//!
//! Expects the `aws_spot_current_price` series exported by a spot price
//! exporter, labelled by region, instance type, zone and product description.

use super::SpotPriceMetrics;
use crate::error::PricingError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_PRODUCT_DESCRIPTION: &str = "Linux/UNIX";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    /// `[unix_seconds, "value"]`
    value: (f64, String),
}

pub struct PrometheusSpotMetrics {
    client: Client,
    query_url: Url,
    product_description: String,
}

impl PrometheusSpotMetrics {
    pub fn new(address: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        let mut base = Url::parse(address).context("Invalid Prometheus address")?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let query_url = base
            .join("api/v1/query")
            .context("Invalid Prometheus address")?;

        Ok(Self {
            client,
            query_url,
            product_description: DEFAULT_PRODUCT_DESCRIPTION.to_string(),
        })
    }

    pub fn with_product_description(mut self, description: impl Into<String>) -> Self {
        self.product_description = description.into();
        self
    }

    pub fn query(&self, region: &str, zones: &[String], instance_type: &str, window: Duration) -> String {
        format!(
            "avg(avg_over_time(aws_spot_current_price{{region=\"{}\", instance_type=\"{}\", availability_zone=~\"{}\", product_description=\"{}\"}}[{}]))",
            region,
            instance_type,
            zones.join("|"),
            self.product_description,
            range_selector(window)
        )
    }
}

/// PromQL range duration, e.g. `24h` or `90s`
fn range_selector(window: Duration) -> String {
    let secs = window.as_secs().max(1);
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[async_trait]
impl SpotPriceMetrics for PrometheusSpotMetrics {
    async fn average_spot_price(
        &self,
        region: &str,
        zones: &[String],
        instance_type: &str,
        window: Duration,
    ) -> Result<f64, PricingError> {
        let query = self.query(region, zones, instance_type, window);
        debug!(query = %query, "Sending Prometheus query");

        let time = chrono::Utc::now().timestamp().to_string();
        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", query.as_str()), ("time", time.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 400 && status.as_u16() != 422 {
            return Err(PricingError::Unreachable(format!(
                "Prometheus returned {}",
                status
            )));
        }

        let body: QueryResponse = response.json().await?;
        if body.status != "success" {
            return Err(PricingError::Malformed(
                body.error.unwrap_or_else(|| format!("query status {}", body.status)),
            ));
        }

        let data = body
            .data
            .ok_or_else(|| PricingError::Malformed("missing data".to_string()))?;
        if data.result_type != "vector" {
            return Err(PricingError::Malformed(format!(
                "unexpected result type {}",
                data.result_type
            )));
        }

        let sample = data
            .result
            .first()
            .ok_or_else(|| PricingError::EmptySeries(instance_type.to_string()))?;
        let price: f64 = sample
            .value
            .1
            .parse()
            .map_err(|_| PricingError::Malformed(format!("non-numeric value {}", sample.value.1)))?;

        if price.is_nan() {
            return Err(PricingError::EmptySeries(instance_type.to_string()));
        }
        if !price.is_finite() || price < 0.0 {
            return Err(PricingError::Malformed(format!("invalid price {}", price)));
        }
        Ok(price)
    }
}
