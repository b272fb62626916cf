use super::*;
use crate::catalog::{RegionCatalog, StaticCatalog, StaticProviderApi, Zone};
use crate::error::ProviderError;
use crate::models::InstanceType;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Metrics backend answering from a fixed table
struct TableMetrics {
    prices: HashMap<String, f64>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    seen_zones: Mutex<Vec<Vec<String>>>,
}

impl TableMetrics {
    fn new(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: prices.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            seen_zones: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SpotPriceMetrics for TableMetrics {
    async fn average_spot_price(
        &self,
        _region: &str,
        zones: &[String],
        instance_type: &str,
        _window: Duration,
    ) -> Result<f64, PricingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.seen_zones.lock().unwrap().push(zones.to_vec());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.prices
            .get(instance_type)
            .copied()
            .ok_or_else(|| PricingError::EmptySeries(instance_type.to_string()))
    }
}

/// Provider API whose spot history always fails
struct BrokenHistory;

#[async_trait]
impl ProviderApi for BrokenHistory {
    async fn describe_instance_types(
        &self,
        _provider: &str,
        _region: &str,
    ) -> Result<Vec<InstanceType>, ProviderError> {
        Ok(Vec::new())
    }

    async fn describe_zones(&self, _provider: &str, _region: &str) -> Result<Vec<Zone>, ProviderError> {
        Ok(Vec::new())
    }

    async fn spot_price_history(
        &self,
        _provider: &str,
        _region: &str,
        _instance_types: &[String],
    ) -> Result<Vec<SpotPriceSample>, ProviderError> {
        Err(ProviderError::Unreachable("connection refused".to_string()))
    }
}

fn sample(zone: &str, instance_type: &str, price: f64, timestamp: i64) -> SpotPriceSample {
    SpotPriceSample {
        zone: zone.to_string(),
        instance_type: instance_type.to_string(),
        price,
        timestamp,
    }
}

fn zones() -> Vec<String> {
    vec!["eu-west-1a".to_string(), "eu-west-1b".to_string()]
}

fn types(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn history_api() -> StaticProviderApi {
    let region = RegionCatalog {
        instance_types: Vec::new(),
        zones: vec![Zone::available("eu-west-1a"), Zone::available("eu-west-1b")],
        spot_prices: vec![
            sample("eu-west-1a", "m5.large", 0.04, 100),
            sample("eu-west-1b", "m5.large", 0.06, 100),
            sample("eu-west-1a", "c5.large", 0.03, 100),
            sample("eu-west-1b", "c5.large", 0.05, 100),
        ],
    };
    StaticProviderApi::new(StaticCatalog::default().with_region("aws", "eu-west-1", region))
}

#[tokio::test]
async fn test_metrics_prices_used_when_complete() {
    let metrics = Arc::new(TableMetrics::new(&[("m5.large", 0.041), ("c5.large", 0.031)]));
    let resolver = SpotPriceResolver::new(Some(metrics.clone() as Arc<dyn SpotPriceMetrics>), PricingConfig::default());

    let resolved = resolver
        .resolve(
            &history_api(),
            "aws",
            "eu-west-1",
            &zones(),
            &types(&["m5.large", "c5.large"]),
        )
        .await;

    assert_eq!(resolved.source, PriceSource::Metrics);
    assert_eq!(resolved.get("m5.large"), Some(0.041));
    assert_eq!(resolved.get("c5.large"), Some(0.031));
    assert!(resolved.metrics_error.is_none());
    assert_eq!(metrics.calls.load(Ordering::SeqCst), 2);

    // Every query is scoped to the request's zone set
    for seen in metrics.seen_zones.lock().unwrap().iter() {
        assert_eq!(seen, &zones());
    }
}

#[tokio::test]
async fn test_one_empty_series_falls_back_for_every_type() {
    // c5.large has no series, so the m5.large metrics price must not be used either
    let metrics = Arc::new(TableMetrics::new(&[("m5.large", 0.5)]));
    let resolver = SpotPriceResolver::new(Some(metrics as Arc<dyn SpotPriceMetrics>), PricingConfig::default());

    let resolved = resolver
        .resolve(
            &history_api(),
            "aws",
            "eu-west-1",
            &zones(),
            &types(&["m5.large", "c5.large"]),
        )
        .await;

    assert_eq!(resolved.source, PriceSource::History);
    assert!(resolved.metrics_error.is_some());
    assert!((resolved.get("m5.large").unwrap() - 0.05).abs() < 1e-9);
    assert!((resolved.get("c5.large").unwrap() - 0.04).abs() < 1e-9);
}

#[tokio::test]
async fn test_history_used_without_metrics_backend() {
    let resolver = SpotPriceResolver::new(None, PricingConfig::default());
    assert!(!resolver.has_metrics_backend());

    let resolved = resolver
        .resolve(
            &history_api(),
            "aws",
            "eu-west-1",
            &zones(),
            &types(&["m5.large"]),
        )
        .await;

    assert_eq!(resolved.source, PriceSource::History);
    assert!(resolved.metrics_error.is_none());
    assert!((resolved.get("m5.large").unwrap() - 0.05).abs() < 1e-9);
    assert_eq!(resolved.get("c5.large"), None);
}

#[tokio::test]
async fn test_both_backends_failing_leaves_types_unpriced() {
    let metrics = Arc::new(TableMetrics::new(&[]));
    let resolver = SpotPriceResolver::new(Some(metrics as Arc<dyn SpotPriceMetrics>), PricingConfig::default());

    let resolved = resolver
        .resolve(
            &BrokenHistory,
            "aws",
            "eu-west-1",
            &zones(),
            &types(&["m5.large", "c5.large"]),
        )
        .await;

    assert_eq!(resolved.source, PriceSource::None);
    assert!(resolved.prices.is_empty());
    assert!(resolved.metrics_error.is_some());
    assert!(resolved.history_error.is_some());
}

#[tokio::test]
async fn test_slow_query_times_out_and_falls_back() {
    let metrics = Arc::new(
        TableMetrics::new(&[("m5.large", 0.9), ("c5.large", 0.9)])
            .with_delay(Duration::from_millis(500)),
    );
    let config = PricingConfig {
        query_timeout: Duration::from_millis(20),
        ..PricingConfig::default()
    };
    let resolver = SpotPriceResolver::new(Some(metrics as Arc<dyn SpotPriceMetrics>), config);

    let resolved = resolver
        .resolve(
            &history_api(),
            "aws",
            "eu-west-1",
            &zones(),
            &types(&["m5.large", "c5.large"]),
        )
        .await;

    assert_eq!(resolved.source, PriceSource::History);
    assert!(resolved
        .metrics_error
        .as_deref()
        .unwrap()
        .contains("timed out"));
    assert!((resolved.get("m5.large").unwrap() - 0.05).abs() < 1e-9);
}

#[tokio::test]
async fn test_fanout_bounds_concurrent_queries() {
    let ids: Vec<String> = (0..12).map(|i| format!("t{}.large", i)).collect();
    let table: Vec<(&str, f64)> = ids.iter().map(|id| (id.as_str(), 0.1)).collect();
    let metrics = Arc::new(TableMetrics::new(&table).with_delay(Duration::from_millis(20)));
    let config = PricingConfig {
        fanout: 3,
        ..PricingConfig::default()
    };
    let resolver = SpotPriceResolver::new(Some(metrics.clone() as Arc<dyn SpotPriceMetrics>), config);

    let resolved = resolver
        .resolve(&history_api(), "aws", "eu-west-1", &zones(), &ids)
        .await;

    assert_eq!(resolved.source, PriceSource::Metrics);
    assert_eq!(resolved.prices.len(), 12);
    assert!(metrics.peak.load(Ordering::SeqCst) <= 3);
    assert!(metrics.peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_nothing_to_price() {
    let metrics = Arc::new(TableMetrics::new(&[("m5.large", 0.1)]));
    let resolver = SpotPriceResolver::new(Some(metrics.clone() as Arc<dyn SpotPriceMetrics>), PricingConfig::default());

    let resolved = resolver
        .resolve(&history_api(), "aws", "eu-west-1", &zones(), &[])
        .await;
    assert_eq!(resolved.source, PriceSource::None);

    let resolved = resolver
        .resolve(&history_api(), "aws", "eu-west-1", &[], &types(&["m5.large"]))
        .await;
    assert_eq!(resolved.source, PriceSource::None);
    assert_eq!(metrics.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_average_requires_every_zone() {
    let samples = vec![
        sample("eu-west-1a", "m5.large", 0.04, 100),
        sample("eu-west-1b", "m5.large", 0.06, 100),
        sample("eu-west-1a", "c5.large", 0.03, 100),
    ];

    let prices = average_over_zones(&samples, &zones());
    assert!((prices["m5.large"] - 0.05).abs() < 1e-9);
    assert!(!prices.contains_key("c5.large"));
}

#[test]
fn test_average_uses_latest_sample_per_zone() {
    let samples = vec![
        sample("eu-west-1a", "m5.large", 0.90, 50),
        sample("eu-west-1a", "m5.large", 0.04, 200),
        sample("eu-west-1b", "m5.large", 0.06, 100),
        sample("eu-west-1b", "m5.large", 0.80, 10),
    ];

    let prices = average_over_zones(&samples, &zones());
    assert!((prices["m5.large"] - 0.05).abs() < 1e-9);
}

#[test]
fn test_average_ignores_unrequested_zones_and_bad_prices() {
    let samples = vec![
        sample("eu-west-1a", "m5.large", 0.04, 100),
        sample("eu-west-1c", "m5.large", 9.0, 100),
        sample("eu-west-1a", "c5.large", f64::NAN, 100),
    ];

    let only_a = vec!["eu-west-1a".to_string()];
    let prices = average_over_zones(&samples, &only_a);
    assert_eq!(prices.len(), 1);
    assert!((prices["m5.large"] - 0.04).abs() < 1e-9);

    let keys: HashSet<&str> = prices.keys().map(String::as_str).collect();
    assert!(!keys.contains("c5.large"));
}
